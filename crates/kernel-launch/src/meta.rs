//! Metadata sidecar written by the kernel compiler next to each binary.
//!
//! ```json
//! {
//!   "schema_version": 1,
//!   "arch": "sm_80",
//!   "kernel_symbol": "add_kernel",
//!   "param_abi": ["*fp32", "*fp32", "i32"],
//!   "shared_mem_bytes": 0,
//!   "num_warps": 4
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::abi::KernelSignature;
use crate::error::{RuntimeError, RuntimeResult};

pub const WARP_SIZE: u32 = 32;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KernelMeta {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub arch: Option<String>,
    pub kernel_symbol: String,
    #[serde(default)]
    pub param_abi: Vec<String>,
    #[serde(default)]
    pub shared_mem_bytes: u32,
    #[serde(default = "default_num_warps")]
    pub num_warps: u32,
}

fn default_num_warps() -> u32 {
    4
}

impl KernelMeta {
    pub fn read(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| RuntimeError::Metadata {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::parse(path, &text)
    }

    /// Parses sidecar JSON; `path` only labels errors.
    pub fn parse(path: impl AsRef<Path>, text: &str) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let meta: KernelMeta = serde_json::from_str(text).map_err(|err| RuntimeError::Metadata {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if meta.kernel_symbol.trim().is_empty() {
            return Err(RuntimeError::Metadata {
                path: path.to_path_buf(),
                message: "kernel_symbol is empty".to_string(),
            });
        }
        if meta.num_warps == 0 || meta.num_warps.checked_mul(WARP_SIZE).is_none() {
            return Err(RuntimeError::Metadata {
                path: path.to_path_buf(),
                message: format!("num_warps {} is out of range", meta.num_warps),
            });
        }
        meta.signature().map_err(|message| RuntimeError::Metadata {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(meta)
    }

    /// `kernel.cubin` -> `kernel.meta.json` in the same directory.
    pub fn sidecar_path(binary: impl AsRef<Path>) -> PathBuf {
        binary.as_ref().with_extension("meta.json")
    }

    pub fn signature(&self) -> Result<KernelSignature, String> {
        KernelSignature::from_tags(self.param_abi.iter().map(String::as_str))
    }

    pub fn threads_per_block(&self) -> u32 {
        self.num_warps * WARP_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{ParamKind, ScalarKind};

    #[test]
    fn parses_compiler_sidecar_and_ignores_unknown_fields() {
        let meta = KernelMeta::parse(
            "k.meta.json",
            r#"{
                "schema_version": 1,
                "tool": "tritoncc",
                "arch": "sm_80",
                "kernel_symbol": "scale_kernel",
                "param_abi": ["*fp32", "i32", "fp32"],
                "shared_mem_bytes": 512,
                "num_warps": 8
            }"#,
        )
        .unwrap();
        assert_eq!(meta.kernel_symbol, "scale_kernel");
        assert_eq!(meta.threads_per_block(), 256);
        assert_eq!(meta.shared_mem_bytes, 512);
        assert_eq!(
            meta.signature().unwrap().params(),
            &[
                ParamKind::Pointer,
                ParamKind::Scalar(ScalarKind::I32),
                ParamKind::Scalar(ScalarKind::F32)
            ]
        );
    }

    #[test]
    fn defaults_apply_to_minimal_sidecar() {
        let meta = KernelMeta::parse("k.meta.json", r#"{"kernel_symbol": "k"}"#).unwrap();
        assert_eq!(meta.num_warps, 4);
        assert_eq!(meta.shared_mem_bytes, 0);
        assert!(meta.param_abi.is_empty());
    }

    #[test]
    fn rejects_bad_sidecars() {
        for text in [
            r#"{"kernel_symbol": ""}"#,
            r#"{"kernel_symbol": "k", "num_warps": 0}"#,
            r#"{"kernel_symbol": "k", "param_abi": ["f128"]}"#,
            r#"{"param_abi": []}"#,
            "not json",
        ] {
            let err = KernelMeta::parse("bad.meta.json", text).unwrap_err();
            assert!(matches!(err, RuntimeError::Metadata { .. }), "{text}");
        }
    }

    #[test]
    fn sidecar_sits_next_to_binary() {
        assert_eq!(
            KernelMeta::sidecar_path("/kernels/add.cubin"),
            PathBuf::from("/kernels/add.meta.json")
        );
    }
}
