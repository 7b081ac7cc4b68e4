
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use kernel_launch::driver::recording::DriverCall;
use kernel_launch::{DriverStatus, RuntimeError};
use ptx_support::{recording_runtime, scale_binary, write_file, SCALE_PTX};

#[test]
fn load_binary_resolves_entry_point() -> Result<()> {
    let (_dir, path) = scale_binary();
    let (driver, runtime) = recording_runtime();

    let (module, function) = runtime.load_binary(&path, "scale_kernel")?;
    assert_eq!(function.name(), "scale_kernel");
    assert_eq!(function.module(), module);
    assert!(matches!(
        driver.calls().as_slice(),
        [
            DriverCall::LoadModule { .. },
            DriverCall::GetFunction { symbol, .. },
        ] if symbol == "scale_kernel"
    ));
    Ok(())
}

#[test]
fn missing_path_fails_with_load_error_before_driver() {
    let dir = tempfile::tempdir().unwrap();
    let (driver, runtime) = recording_runtime();

    let err = runtime
        .load_binary(dir.path().join("absent.cubin"), "scale_kernel")
        .unwrap_err();
    match err {
        RuntimeError::Load { path, .. } => assert!(path.ends_with("absent.cubin")),
        other => panic!("expected LoadError, got {other:?}"),
    }
    assert_eq!(driver.call_count(), 0);
}

#[test]
fn directory_path_is_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let (_driver, runtime) = recording_runtime();
    let err = runtime.load_binary(dir.path(), "scale_kernel").unwrap_err();
    assert!(matches!(err, RuntimeError::Load { .. }), "{err:?}");
}

#[test]
fn rejected_image_fails_with_registration_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(dir.path(), "corrupt.cubin", [0x7f, b'E', b'L', b'F', 0, 0xfe]);
    let (_driver, runtime) = recording_runtime();

    let err = runtime.load_binary(&path, "scale_kernel").unwrap_err();
    match err {
        RuntimeError::ModuleRegistration { path: p, status } => {
            assert_eq!(p, path);
            assert_eq!(status, DriverStatus::INVALID_IMAGE);
        }
        other => panic!("expected ModuleRegistrationError, got {other:?}"),
    }
}

#[test]
fn absent_symbol_fails_with_symbol_not_found() {
    let (_dir, path) = scale_binary();
    let (_driver, runtime) = recording_runtime();

    let err = runtime.load_binary(&path, "missing_kernel").unwrap_err();
    match &err {
        RuntimeError::SymbolNotFound { symbol, status, .. } => {
            assert_eq!(symbol, "missing_kernel");
            assert_eq!(*status, DriverStatus::NOT_FOUND);
        }
        other => panic!("expected SymbolNotFoundError, got {other:?}"),
    }
    assert_eq!(err.status(), Some(DriverStatus::NOT_FOUND));
    assert!(err.to_string().contains("missing_kernel"));
}

#[test]
fn lookup_failure_other_than_not_found_is_not_a_missing_symbol() {
    let (_dir, path) = scale_binary();
    let (driver, runtime) = recording_runtime();

    driver.fail_next_lookup(DriverStatus::INVALID_HANDLE);
    let err = runtime.load_binary(&path, "scale_kernel").unwrap_err();
    match err {
        RuntimeError::ModuleRegistration { path: p, status } => {
            assert_eq!(p, path);
            assert_eq!(status, DriverStatus::INVALID_HANDLE);
        }
        other => panic!("expected ModuleRegistrationError, got {other:?}"),
    }

    driver.fail_next_lookup(DriverStatus::ILLEGAL_ADDRESS);
    let err = runtime.load_binary(&path, "scale_kernel").unwrap_err();
    assert!(matches!(err, RuntimeError::DeferredDevice { .. }), "{err:?}");
}

#[test]
fn empty_entry_point_is_rejected_without_io() {
    let (driver, runtime) = recording_runtime();
    let err = runtime.load_binary("/does/not/matter", "").unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidEntryPoint { .. }));
    assert_eq!(driver.call_count(), 0);
}

#[test]
fn each_load_creates_a_fresh_module() -> Result<()> {
    let (_dir, path) = scale_binary();
    let (_driver, runtime) = recording_runtime();

    let (first_module, first_fn) = runtime.load_binary(&path, "scale_kernel")?;
    let (second_module, second_fn) = runtime.load_binary(&path, "scale_kernel")?;
    assert_ne!(first_module, second_module);
    assert_ne!(first_fn.raw(), second_fn.raw());
    Ok(())
}

#[test]
fn load_image_uses_origin_in_errors() {
    let (_driver, runtime) = recording_runtime();
    let err = runtime
        .load_image(SCALE_PTX.as_bytes(), "inline://scale", "other")
        .unwrap_err();
    assert!(err.to_string().contains("inline://scale"), "{err}");
}

#[test]
fn concurrent_loads_return_distinct_handles() -> Result<()> {
    let (_dir, path) = scale_binary();
    let (_driver, runtime) = recording_runtime();
    let path = Arc::new(path);

    let workers = (0..8)
        .map(|_| {
            let runtime = runtime.clone();
            let path = Arc::clone(&path);
            thread::spawn(move || {
                (0..16)
                    .map(|_| runtime.load_binary(path.as_path(), "scale_kernel"))
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .collect::<Vec<_>>();

    let mut modules = HashSet::new();
    let mut functions = HashSet::new();
    for worker in workers {
        let loaded = worker.join().expect("loader thread panicked")?;
        for (module, function) in loaded {
            assert!(modules.insert(module));
            assert!(functions.insert(function.raw()));
        }
    }
    assert_eq!(modules.len(), 8 * 16);
    Ok(())
}
