use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::driver::DriverStatus;

/// Failure surfaced by the loader, descriptor, marshaler or invoker.
///
/// Every variant carries enough context (path, symbol, field or driver status) to
/// diagnose the failure without re-running it. Nothing here is retried.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to read kernel binary {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid entry point name {name:?}: {reason}")]
    InvalidEntryPoint { name: String, reason: &'static str },
    #[error("driver rejected kernel binary {}: {status}", path.display())]
    ModuleRegistration { path: PathBuf, status: DriverStatus },
    #[error("entry point '{symbol}' not found in {}: {status}", path.display())]
    SymbolNotFound {
        path: PathBuf,
        symbol: String,
        status: DriverStatus,
    },
    #[error("invalid launch configuration: {field} = {value}")]
    InvalidLaunchConfig { field: &'static str, value: i64 },
    #[error("failed to allocate {bytes} bytes for kernel arguments")]
    Allocation { bytes: usize },
    #[error("driver rejected launch of '{kernel}': {status}")]
    Launch { kernel: String, status: DriverStatus },
    /// A device-side fault from some earlier launch, observed by `op`. The fault
    /// cannot be attributed to a specific launch.
    #[error("deferred device error observed during {op}: {status}")]
    DeferredDevice { op: &'static str, status: DriverStatus },
    #[error("GPU driver unavailable: {message}")]
    DriverUnavailable { message: String },
    #[error("arguments do not match signature of '{kernel}': {message}")]
    ArgumentMismatch { kernel: String, message: String },
    #[error("invalid kernel metadata {}: {message}", path.display())]
    Metadata { path: PathBuf, message: String },
}

impl RuntimeError {
    pub fn driver_unavailable(message: impl Into<String>) -> Self {
        RuntimeError::DriverUnavailable {
            message: message.into(),
        }
    }

    /// Driver status attached to this error, if any.
    pub fn status(&self) -> Option<DriverStatus> {
        match self {
            RuntimeError::ModuleRegistration { status, .. }
            | RuntimeError::SymbolNotFound { status, .. }
            | RuntimeError::Launch { status, .. }
            | RuntimeError::DeferredDevice { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Routes sticky device faults to [`RuntimeError::DeferredDevice`] and
    /// everything else through `otherwise`.
    pub(crate) fn from_status(
        op: &'static str,
        status: DriverStatus,
        otherwise: impl FnOnce(DriverStatus) -> RuntimeError,
    ) -> Self {
        if status.is_sticky() {
            log::warn!("sticky device error {status} surfaced during {op}");
            RuntimeError::DeferredDevice { op, status }
        } else {
            otherwise(status)
        }
    }
}

/// Convenience alias for results returned by runtime routines.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticky_status_becomes_deferred_device_error() {
        let err = RuntimeError::from_status("cuLaunchKernel", DriverStatus::new(700), |status| {
            RuntimeError::Launch {
                kernel: "k".to_string(),
                status,
            }
        });
        assert!(matches!(
            err,
            RuntimeError::DeferredDevice {
                op: "cuLaunchKernel",
                ..
            }
        ));
        assert_eq!(err.status(), Some(DriverStatus::new(700)));
    }

    #[test]
    fn non_sticky_status_uses_fallback() {
        let err = RuntimeError::from_status("cuLaunchKernel", DriverStatus::new(1), |status| {
            RuntimeError::Launch {
                kernel: "k".to_string(),
                status,
            }
        });
        assert!(matches!(err, RuntimeError::Launch { .. }));
        assert_eq!(
            err.to_string(),
            "driver rejected launch of 'k': CUDA_ERROR_INVALID_VALUE (1)"
        );
    }
}
