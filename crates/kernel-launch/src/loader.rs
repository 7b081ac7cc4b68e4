use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::driver::{Driver, DriverStatus, RawFunction, RawModule};
use crate::error::{RuntimeError, RuntimeResult};

/// A module registered with the driver.
///
/// Modules are never unloaded: the handle stays valid for the rest of the
/// process. Each load creates a fresh handle, even for the same image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle {
    raw: RawModule,
}

impl ModuleHandle {
    pub fn from_raw(raw: RawModule) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> RawModule {
        self.raw
    }
}

/// An entry point resolved inside a [`ModuleHandle`].
///
/// Refers into its module by convention; it is only meaningful to the driver
/// that produced it and only while that module stays loaded.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct KernelFunction {
    module: ModuleHandle,
    raw: RawFunction,
    name: Arc<str>,
}

impl KernelFunction {
    pub fn new(module: ModuleHandle, raw: RawFunction, name: impl Into<Arc<str>>) -> Self {
        Self {
            module,
            raw,
            name: name.into(),
        }
    }

    pub fn module(&self) -> ModuleHandle {
        self.module
    }

    pub fn raw(&self) -> RawFunction {
        self.raw
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for KernelFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelFunction")
            .field("name", &self.name)
            .field("module", &self.module.raw.as_raw())
            .field("func", &self.raw.as_raw())
            .finish()
    }
}

/// Reads a compiled binary from `path`, registers it and resolves `entry_point`.
///
/// If the symbol lookup fails the module stays registered; the call as a whole
/// still fails and no function handle is returned.
pub fn load_binary<D: Driver + ?Sized>(
    driver: &D,
    path: impl AsRef<Path>,
    entry_point: &str,
) -> RuntimeResult<(ModuleHandle, KernelFunction)> {
    let path = path.as_ref();
    let symbol = entry_symbol(entry_point)?;
    let image = std::fs::read(path).map_err(|source| RuntimeError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    register(driver, &image, path, entry_point, &symbol)
}

/// Like [`load_binary`] for an image already in memory. `origin` only labels
/// errors and log lines.
pub fn load_image<D: Driver + ?Sized>(
    driver: &D,
    image: &[u8],
    origin: impl AsRef<Path>,
    entry_point: &str,
) -> RuntimeResult<(ModuleHandle, KernelFunction)> {
    let symbol = entry_symbol(entry_point)?;
    register(driver, image, origin.as_ref(), entry_point, &symbol)
}

fn register<D: Driver + ?Sized>(
    driver: &D,
    image: &[u8],
    path: &Path,
    entry_point: &str,
    symbol: &CString,
) -> RuntimeResult<(ModuleHandle, KernelFunction)> {
    let raw_module = driver.load_module(image).map_err(|status| {
        RuntimeError::from_status("module load", status, |status| {
            RuntimeError::ModuleRegistration {
                path: path.to_path_buf(),
                status,
            }
        })
    })?;
    let module = ModuleHandle::from_raw(raw_module);
    log::debug!(
        "{} registered {} ({} bytes) as module {:#x}",
        driver.name(),
        path.display(),
        image.len(),
        raw_module.as_raw()
    );

    // Only NOT_FOUND means the name is absent; any other status means the
    // module or its context could not be used for the lookup.
    let raw_function = driver.get_function(raw_module, symbol).map_err(|status| {
        RuntimeError::from_status("function lookup", status, |status| {
            if status == DriverStatus::NOT_FOUND {
                RuntimeError::SymbolNotFound {
                    path: PathBuf::from(path),
                    symbol: entry_point.to_string(),
                    status,
                }
            } else {
                RuntimeError::ModuleRegistration {
                    path: PathBuf::from(path),
                    status,
                }
            }
        })
    })?;
    log::debug!(
        "resolved entry point '{entry_point}' in module {:#x}",
        raw_module.as_raw()
    );

    Ok((module, KernelFunction::new(module, raw_function, entry_point)))
}

fn entry_symbol(entry_point: &str) -> RuntimeResult<CString> {
    let invalid = |reason| RuntimeError::InvalidEntryPoint {
        name: entry_point.to_string(),
        reason,
    };
    if entry_point.is_empty() {
        return Err(invalid("name is empty"));
    }
    CString::new(entry_point).map_err(|_| invalid("name contains NUL byte"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_symbol_rejects_empty_and_nul() {
        assert!(matches!(
            entry_symbol(""),
            Err(RuntimeError::InvalidEntryPoint { reason: "name is empty", .. })
        ));
        assert!(matches!(
            entry_symbol("ker\0nel"),
            Err(RuntimeError::InvalidEntryPoint { .. })
        ));
        assert_eq!(entry_symbol("kernel").unwrap().as_bytes(), b"kernel");
    }
}
