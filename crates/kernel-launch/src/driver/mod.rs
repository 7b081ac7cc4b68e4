//! Seam between the runtime and the GPU driver.
//!
//! The runtime only needs three driver entry points: register a module image,
//! resolve a named function inside it, and enqueue a launch. [`cuda::CudaDriver`]
//! binds them to the CUDA driver API; [`recording::RecordingDriver`] implements
//! them in-process for tests and dry runs.

pub mod cuda;
pub mod recording;

use std::ffi::CStr;
use std::fmt;
use std::num::NonZeroUsize;

use crate::descriptor::Dim3;
use crate::marshal::ArgumentBuffer;

/// Raw result code returned by a driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverStatus(i32);

impl DriverStatus {
    pub const SUCCESS: DriverStatus = DriverStatus(0);
    pub const INVALID_VALUE: DriverStatus = DriverStatus(1);
    pub const INVALID_IMAGE: DriverStatus = DriverStatus(200);
    pub const INVALID_HANDLE: DriverStatus = DriverStatus(400);
    pub const NOT_FOUND: DriverStatus = DriverStatus(500);
    pub const ILLEGAL_ADDRESS: DriverStatus = DriverStatus(700);
    pub const LAUNCH_FAILED: DriverStatus = DriverStatus(719);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Device faults that leave the context unusable. They are reported by
    /// whichever driver call happens to run next, not by the faulting launch.
    pub const fn is_sticky(self) -> bool {
        matches!(self.0, 700 | 702 | 714..=719)
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "CUDA_SUCCESS",
            1 => "CUDA_ERROR_INVALID_VALUE",
            2 => "CUDA_ERROR_OUT_OF_MEMORY",
            3 => "CUDA_ERROR_NOT_INITIALIZED",
            4 => "CUDA_ERROR_DEINITIALIZED",
            100 => "CUDA_ERROR_NO_DEVICE",
            101 => "CUDA_ERROR_INVALID_DEVICE",
            200 => "CUDA_ERROR_INVALID_IMAGE",
            201 => "CUDA_ERROR_INVALID_CONTEXT",
            209 => "CUDA_ERROR_NO_BINARY_FOR_GPU",
            218 => "CUDA_ERROR_INVALID_PTX",
            222 => "CUDA_ERROR_UNSUPPORTED_PTX_VERSION",
            300 => "CUDA_ERROR_INVALID_SOURCE",
            301 => "CUDA_ERROR_FILE_NOT_FOUND",
            400 => "CUDA_ERROR_INVALID_HANDLE",
            500 => "CUDA_ERROR_NOT_FOUND",
            600 => "CUDA_ERROR_NOT_READY",
            700 => "CUDA_ERROR_ILLEGAL_ADDRESS",
            701 => "CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES",
            702 => "CUDA_ERROR_LAUNCH_TIMEOUT",
            714 => "CUDA_ERROR_HARDWARE_STACK_ERROR",
            715 => "CUDA_ERROR_ILLEGAL_INSTRUCTION",
            716 => "CUDA_ERROR_MISALIGNED_ADDRESS",
            717 => "CUDA_ERROR_INVALID_ADDRESS_SPACE",
            718 => "CUDA_ERROR_INVALID_PC",
            719 => "CUDA_ERROR_LAUNCH_FAILED",
            999 => "CUDA_ERROR_UNKNOWN",
            _ => return None,
        };
        Some(name)
    }

    /// Converts a raw result into `Ok(())` or the failing status.
    pub fn check(code: i32) -> Result<(), DriverStatus> {
        let status = DriverStatus(code);
        if status.is_success() {
            Ok(())
        } else {
            Err(status)
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "driver status {}", self.0),
        }
    }
}

/// Driver-side module handle. Never null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawModule(NonZeroUsize);

/// Driver-side function handle. Never null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawFunction(NonZeroUsize);

impl RawModule {
    /// Wraps a handle returned by the driver; `None` for a null handle.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

impl RawFunction {
    /// Wraps a handle returned by the driver; `None` for a null handle.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// Driver entry points used by the runtime.
///
/// Implementations must be callable from any thread. They add no locking of their
/// own around the driver; concurrent use is as safe as the driver makes it.
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// Registers a binary image. The image format is opaque to the runtime.
    fn load_module(&self, image: &[u8]) -> Result<RawModule, DriverStatus>;

    /// Resolves an exported entry point inside a loaded module.
    fn get_function(&self, module: RawModule, symbol: &CStr) -> Result<RawFunction, DriverStatus>;

    /// Enqueues a launch on the default stream. Returns once the launch is
    /// accepted, not once it finishes.
    fn launch_kernel(
        &self,
        function: RawFunction,
        grid: Dim3,
        block: Dim3,
        shared_mem_bytes: u32,
        args: &mut ArgumentBuffer,
    ) -> Result<(), DriverStatus>;
}
