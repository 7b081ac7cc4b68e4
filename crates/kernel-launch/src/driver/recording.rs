//! In-process driver that accepts PTX text and records every call.
//!
//! Entry points come from `.entry` declarations in the image and each `.param`
//! contributes one parameter whose size follows its PTX type. Launches are
//! checked against those sizes the way a kernel's ABI would consume them, but no
//! code runs.

use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{Driver, DriverStatus, RawFunction, RawModule};
use crate::descriptor::Dim3;
use crate::marshal::ArgumentBuffer;

pub const MAX_THREADS_PER_BLOCK: u32 = 1024;
pub const MAX_SHARED_MEM_PER_BLOCK: u32 = 48 * 1024;

// Shared across instances so handles from one driver are unknown to another.
static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(0x1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    LoadModule { bytes: usize },
    GetFunction { module: RawModule, symbol: String },
    LaunchKernel { function: RawFunction },
}

/// A launch the driver accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLaunch {
    pub function: RawFunction,
    pub kernel: String,
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_mem_bytes: u32,
    pub bytes: Vec<u8>,
    pub sizes: Vec<usize>,
}

#[derive(Debug)]
struct EntryPoint {
    name: String,
    param_sizes: Vec<usize>,
}

#[derive(Default)]
struct State {
    modules: HashMap<RawModule, Vec<EntryPoint>>,
    functions: HashMap<RawFunction, (String, Vec<usize>)>,
    calls: Vec<DriverCall>,
    launches: Vec<RecordedLaunch>,
    fail_next_launch: Option<DriverStatus>,
    fail_next_lookup: Option<DriverStatus>,
}

#[derive(Default)]
pub struct RecordingDriver {
    state: Mutex<State>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn launches(&self) -> Vec<RecordedLaunch> {
        self.state().launches.clone()
    }

    /// Makes the next launch fail with `status` after it is recorded as a call.
    pub fn fail_next_launch(&self, status: DriverStatus) {
        self.state().fail_next_launch = Some(status);
    }

    /// Makes the next function lookup fail with `status`.
    pub fn fail_next_lookup(&self, status: DriverStatus) {
        self.state().fail_next_lookup = Some(status);
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the calls recorded so far.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Driver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn load_module(&self, image: &[u8]) -> Result<RawModule, DriverStatus> {
        let mut state = self.state();
        state.calls.push(DriverCall::LoadModule { bytes: image.len() });
        let text = std::str::from_utf8(image).map_err(|_| DriverStatus::INVALID_IMAGE)?;
        let text = text.trim_end_matches('\0');
        if !text.contains(".version") {
            return Err(DriverStatus::INVALID_IMAGE);
        }
        let entries = parse_entries(text).ok_or(DriverStatus::INVALID_IMAGE)?;
        let module = next_handle(RawModule::from_raw);
        state.modules.insert(module, entries);
        Ok(module)
    }

    fn get_function(&self, module: RawModule, symbol: &CStr) -> Result<RawFunction, DriverStatus> {
        let mut state = self.state();
        let symbol = symbol.to_string_lossy().into_owned();
        state.calls.push(DriverCall::GetFunction {
            module,
            symbol: symbol.clone(),
        });
        if let Some(status) = state.fail_next_lookup.take() {
            return Err(status);
        }
        let entries = state
            .modules
            .get(&module)
            .ok_or(DriverStatus::INVALID_HANDLE)?;
        let entry = entries
            .iter()
            .find(|entry| entry.name == symbol)
            .ok_or(DriverStatus::NOT_FOUND)?;
        let sizes = entry.param_sizes.clone();
        let function = next_handle(RawFunction::from_raw);
        state.functions.insert(function, (symbol, sizes));
        Ok(function)
    }

    fn launch_kernel(
        &self,
        function: RawFunction,
        grid: Dim3,
        block: Dim3,
        shared_mem_bytes: u32,
        args: &mut ArgumentBuffer,
    ) -> Result<(), DriverStatus> {
        let mut state = self.state();
        state.calls.push(DriverCall::LaunchKernel { function });
        if let Some(status) = state.fail_next_launch.take() {
            return Err(status);
        }
        let (kernel, param_sizes) = state
            .functions
            .get(&function)
            .cloned()
            .ok_or(DriverStatus::INVALID_HANDLE)?;
        if param_sizes != args.sizes()
            || block.volume() > u128::from(MAX_THREADS_PER_BLOCK)
            || shared_mem_bytes > MAX_SHARED_MEM_PER_BLOCK
        {
            return Err(DriverStatus::INVALID_VALUE);
        }
        state.launches.push(RecordedLaunch {
            function,
            kernel,
            grid,
            block,
            shared_mem_bytes,
            bytes: args.as_bytes().to_vec(),
            sizes: args.sizes().to_vec(),
        });
        Ok(())
    }
}

fn next_handle<T>(wrap: fn(usize) -> Option<T>) -> T {
    loop {
        if let Some(handle) = wrap(NEXT_HANDLE.fetch_add(0x10, Ordering::Relaxed)) {
            return handle;
        }
    }
}

/// Collects `.entry name(...)` declarations with their parameter sizes.
fn parse_entries(text: &str) -> Option<Vec<EntryPoint>> {
    let mut entries = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(".entry") {
        rest = &rest[pos + ".entry".len()..];
        let open = rest.find('(')?;
        let name = rest[..open].trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }
        let close = open + rest[open..].find(')')?;
        let param_sizes = rest[open + 1..close]
            .split(',')
            .filter(|decl| !decl.trim().is_empty())
            .map(param_size)
            .collect::<Option<Vec<_>>>()?;
        entries.push(EntryPoint {
            name: name.to_string(),
            param_sizes,
        });
        rest = &rest[close..];
    }
    Some(entries)
}

/// Size of one `.param` declaration, e.g. `.param .u64 k_param_0` or
/// `.param .align 8 .b8 k_param_1[16]`.
fn param_size(decl: &str) -> Option<usize> {
    let mut tokens = decl.split_whitespace();
    if tokens.next()? != ".param" {
        return None;
    }
    let mut width = None;
    let mut name = None;
    while let Some(token) = tokens.next() {
        if token == ".align" {
            tokens.next()?;
        } else if width.is_none() {
            width = ptx_type_width(token);
        } else if !token.starts_with('.') {
            name = Some(token);
        }
    }
    let width = width?;
    let count = match name?.split_once('[') {
        Some((_, len)) => len.trim_end_matches(']').parse::<usize>().ok()?,
        None => 1,
    };
    Some(width * count)
}

fn ptx_type_width(token: &str) -> Option<usize> {
    match token {
        ".u8" | ".s8" | ".b8" => Some(1),
        ".u16" | ".s16" | ".b16" | ".f16" => Some(2),
        ".u32" | ".s32" | ".b32" | ".f32" => Some(4),
        ".u64" | ".s64" | ".b64" | ".f64" => Some(8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PTX: &str = r#"
.version 8.0
.target sm_80
.address_size 64

.visible .entry scale(
	.param .u64 .ptr .global .align 1 scale_param_0,
	.param .u32 scale_param_1,
	.param .f32 scale_param_2
)
{
	ret;
}

.visible .entry noop()
{
	ret;
}

.visible .entry by_value(
	.param .align 8 .b8 by_value_param_0[16]
)
{
	ret;
}
"#;

    #[test]
    fn parses_entry_points_and_param_sizes() {
        let entries = parse_entries(PTX).unwrap();
        let summary = entries
            .iter()
            .map(|e| (e.name.as_str(), e.param_sizes.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                ("scale", vec![8, 4, 4]),
                ("noop", vec![]),
                ("by_value", vec![16]),
            ]
        );
    }

    #[test]
    fn rejects_non_ptx_images() {
        let driver = RecordingDriver::new();
        assert_eq!(
            driver.load_module(&[0x7f, b'E', b'L', b'F', 0xff]),
            Err(DriverStatus::INVALID_IMAGE)
        );
        assert_eq!(
            driver.load_module(b"just text"),
            Err(DriverStatus::INVALID_IMAGE)
        );
        assert_eq!(driver.call_count(), 2);
    }

    #[test]
    fn handles_are_unique_per_load() {
        let driver = RecordingDriver::new();
        let a = driver.load_module(PTX.as_bytes()).unwrap();
        let b = driver.load_module(PTX.as_bytes()).unwrap();
        assert_ne!(a, b);
        let symbol = CStr::from_bytes_with_nul(b"noop\0").unwrap();
        let fa = driver.get_function(a, symbol).unwrap();
        let fb = driver.get_function(b, symbol).unwrap();
        assert_ne!(fa, fb);
    }
}
