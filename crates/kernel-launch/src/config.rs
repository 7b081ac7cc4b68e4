use std::env;
use std::path::PathBuf;

use crate::error::{RuntimeError, RuntimeResult};

pub const CUDA_LIBRARY_ENV: &str = "KERNEL_LAUNCH_CUDA_LIBRARY";
pub const DEVICE_ENV: &str = "KERNEL_LAUNCH_DEVICE";

/// How the process-wide CUDA driver is brought up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverConfig {
    /// Explicit driver library; the platform default names are probed when unset.
    pub library: Option<PathBuf>,
    pub device_ordinal: i32,
}

impl DriverConfig {
    pub fn from_env() -> RuntimeResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RuntimeResult<Self> {
        let library = non_empty(lookup(CUDA_LIBRARY_ENV)).map(PathBuf::from);
        let device_ordinal = match non_empty(lookup(DEVICE_ENV)) {
            Some(value) => value.parse::<i32>().ok().filter(|v| *v >= 0).ok_or_else(|| {
                RuntimeError::driver_unavailable(format!(
                    "{DEVICE_ENV} must be a non-negative device ordinal, got '{value}'"
                ))
            })?,
            None => 0,
        };
        Ok(Self {
            library,
            device_ordinal,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = DriverConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, DriverConfig::default());
    }

    #[test]
    fn reads_trimmed_values() {
        let cfg = DriverConfig::from_lookup(lookup(&[
            (CUDA_LIBRARY_ENV, " /opt/cuda/libcuda.so.1 "),
            (DEVICE_ENV, "2"),
        ]))
        .unwrap();
        assert_eq!(cfg.library, Some(PathBuf::from("/opt/cuda/libcuda.so.1")));
        assert_eq!(cfg.device_ordinal, 2);
    }

    #[test]
    fn blank_values_are_ignored() {
        let cfg =
            DriverConfig::from_lookup(lookup(&[(CUDA_LIBRARY_ENV, "  "), (DEVICE_ENV, "")]))
                .unwrap();
        assert_eq!(cfg, DriverConfig::default());
    }

    #[test]
    fn rejects_bad_device_ordinal() {
        for bad in ["gpu0", "-1"] {
            let err = DriverConfig::from_lookup(lookup(&[(DEVICE_ENV, bad)])).unwrap_err();
            assert!(matches!(err, RuntimeError::DriverUnavailable { .. }));
        }
    }
}
