use std::ffi::{c_char, c_void, CStr};

use libloading::Library;

use super::{Driver, DriverStatus, RawFunction, RawModule};
use crate::config::DriverConfig;
use crate::descriptor::Dim3;
use crate::error::{RuntimeError, RuntimeResult};
use crate::marshal::ArgumentBuffer;

type CUresult = i32;
type CUdevice = i32;
type CUcontext = *mut c_void;
type CUmodule = *mut c_void;
type CUfunction = *mut c_void;
type CUstream = *mut c_void;

type CuInitFn = unsafe extern "C" fn(flags: u32) -> CUresult;
type CuDeviceGetFn = unsafe extern "C" fn(device: *mut CUdevice, ordinal: i32) -> CUresult;
type CuDevicePrimaryCtxRetainFn =
    unsafe extern "C" fn(ctx: *mut CUcontext, dev: CUdevice) -> CUresult;
type CuDevicePrimaryCtxReleaseFn = unsafe extern "C" fn(dev: CUdevice) -> CUresult;
type CuCtxSetCurrentFn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuModuleLoadDataExFn = unsafe extern "C" fn(
    module: *mut CUmodule,
    image: *const c_void,
    num_options: u32,
    options: *mut u32,
    option_values: *mut *mut c_void,
) -> CUresult;
type CuModuleGetFunctionFn =
    unsafe extern "C" fn(hfunc: *mut CUfunction, hmod: CUmodule, name: *const c_char) -> CUresult;
type CuLaunchKernelFn = unsafe extern "C" fn(
    f: CUfunction,
    grid_dim_x: u32,
    grid_dim_y: u32,
    grid_dim_z: u32,
    block_dim_x: u32,
    block_dim_y: u32,
    block_dim_z: u32,
    shared_mem_bytes: u32,
    h_stream: CUstream,
    kernel_params: *mut *mut c_void,
    extra: *mut *mut c_void,
) -> CUresult;

struct DriverFns {
    cu_init: CuInitFn,
    cu_device_get: CuDeviceGetFn,
    cu_device_primary_ctx_retain: CuDevicePrimaryCtxRetainFn,
    cu_device_primary_ctx_release_v2: CuDevicePrimaryCtxReleaseFn,
    cu_ctx_set_current: CuCtxSetCurrentFn,
    cu_module_load_data_ex: CuModuleLoadDataExFn,
    cu_module_get_function: CuModuleGetFunctionFn,
    cu_launch_kernel: CuLaunchKernelFn,
}

/// CUDA driver API bound at runtime through `libloading`.
///
/// Launches run in the device's primary context so device pointers allocated by
/// other runtimes in the process stay valid.
pub struct CudaDriver {
    _lib: Library,
    fns: DriverFns,
    device: CUdevice,
    // Stored as usize so CudaDriver can satisfy the Send/Sync bound on Driver.
    ctx: usize,
}

impl Drop for CudaDriver {
    fn drop(&mut self) {
        if self.ctx != 0 {
            // SAFETY: The primary context was retained once by this driver instance.
            let _ = unsafe { (self.fns.cu_device_primary_ctx_release_v2)(self.device) };
            self.ctx = 0;
        }
    }
}

impl CudaDriver {
    pub fn new(config: &DriverConfig) -> RuntimeResult<Self> {
        let lib = load_cuda_library(config)?;
        let fns = DriverFns {
            cu_init: load_symbol(&lib, b"cuInit\0")?,
            cu_device_get: load_symbol(&lib, b"cuDeviceGet\0")?,
            cu_device_primary_ctx_retain: load_symbol(&lib, b"cuDevicePrimaryCtxRetain\0")?,
            cu_device_primary_ctx_release_v2: load_symbol(
                &lib,
                b"cuDevicePrimaryCtxRelease_v2\0",
            )?,
            cu_ctx_set_current: load_symbol(&lib, b"cuCtxSetCurrent\0")?,
            cu_module_load_data_ex: load_symbol(&lib, b"cuModuleLoadDataEx\0")?,
            cu_module_get_function: load_symbol(&lib, b"cuModuleGetFunction\0")?,
            cu_launch_kernel: load_symbol(&lib, b"cuLaunchKernel\0")?,
        };

        // SAFETY: Calls are made with valid out pointers and follow the CUDA driver API contract.
        unsafe {
            init_call((fns.cu_init)(0), "cuInit")?;
            let mut device: CUdevice = 0;
            init_call(
                (fns.cu_device_get)(&mut device as *mut CUdevice, config.device_ordinal),
                "cuDeviceGet",
            )?;
            let mut ctx: CUcontext = std::ptr::null_mut();
            init_call(
                (fns.cu_device_primary_ctx_retain)(&mut ctx as *mut CUcontext, device),
                "cuDevicePrimaryCtxRetain",
            )?;
            if let Err(err) = init_call((fns.cu_ctx_set_current)(ctx), "cuCtxSetCurrent") {
                let _ = (fns.cu_device_primary_ctx_release_v2)(device);
                return Err(err);
            }
            log::debug!(
                "CUDA driver initialized on device {} (ordinal {})",
                device,
                config.device_ordinal
            );
            Ok(Self {
                _lib: lib,
                fns,
                device,
                ctx: ctx as usize,
            })
        }
    }

    fn ensure_current(&self) -> Result<(), DriverStatus> {
        // SAFETY: The context was retained by this driver and stays valid until drop.
        DriverStatus::check(unsafe { (self.fns.cu_ctx_set_current)(self.ctx as CUcontext) })
    }
}

impl Driver for CudaDriver {
    fn name(&self) -> &str {
        "cuda"
    }

    fn load_module(&self, image: &[u8]) -> Result<RawModule, DriverStatus> {
        self.ensure_current()?;
        // PTX images are read as C strings; cubin and fatbin ignore the trailing byte.
        let mut owned;
        let image = if image.last() == Some(&0) {
            image
        } else {
            owned = Vec::with_capacity(image.len() + 1);
            owned.extend_from_slice(image);
            owned.push(0);
            owned.as_slice()
        };
        let mut module: CUmodule = std::ptr::null_mut();
        // SAFETY: `image` outlives the call and `module` is a valid out pointer.
        DriverStatus::check(unsafe {
            (self.fns.cu_module_load_data_ex)(
                &mut module as *mut CUmodule,
                image.as_ptr() as *const c_void,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        })?;
        RawModule::from_raw(module as usize).ok_or(DriverStatus::INVALID_IMAGE)
    }

    fn get_function(&self, module: RawModule, symbol: &CStr) -> Result<RawFunction, DriverStatus> {
        self.ensure_current()?;
        let mut function: CUfunction = std::ptr::null_mut();
        // SAFETY: module was produced by this driver and the output pointer is valid.
        DriverStatus::check(unsafe {
            (self.fns.cu_module_get_function)(
                &mut function as *mut CUfunction,
                module.as_raw() as CUmodule,
                symbol.as_ptr(),
            )
        })?;
        RawFunction::from_raw(function as usize).ok_or(DriverStatus::NOT_FOUND)
    }

    fn launch_kernel(
        &self,
        function: RawFunction,
        grid: Dim3,
        block: Dim3,
        shared_mem_bytes: u32,
        args: &mut ArgumentBuffer,
    ) -> Result<(), DriverStatus> {
        self.ensure_current()?;
        let mut params = args.param_pointers();
        let params_ptr = if params.is_empty() {
            std::ptr::null_mut()
        } else {
            params.as_mut_ptr()
        };
        // SAFETY: each parameter pointer addresses `args` storage, which outlives the
        // call; the driver copies parameter values before returning.
        DriverStatus::check(unsafe {
            (self.fns.cu_launch_kernel)(
                function.as_raw() as CUfunction,
                grid.x,
                grid.y,
                grid.z,
                block.x,
                block.y,
                block.z,
                shared_mem_bytes,
                std::ptr::null_mut(),
                params_ptr,
                std::ptr::null_mut(),
            )
        })
    }
}

fn load_cuda_library(config: &DriverConfig) -> RuntimeResult<Library> {
    if let Some(path) = config.library.as_ref() {
        // SAFETY: Dynamic library probe only; no symbols are invoked at this stage.
        return unsafe { Library::new(path) }.map_err(|err| {
            RuntimeError::driver_unavailable(format!(
                "failed to load CUDA driver library {}: {err}",
                path.display()
            ))
        });
    }

    let candidates = ["libcuda.so.1", "libcuda.so", "nvcuda.dll", "libcuda.dylib"];
    for candidate in candidates {
        // SAFETY: Dynamic library probe only; no symbols are invoked at this stage.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            log::debug!("loaded CUDA driver library {candidate}");
            return Ok(lib);
        }
    }

    Err(RuntimeError::driver_unavailable(
        "failed to load CUDA driver library (tried libcuda.so.1, libcuda.so, nvcuda.dll, libcuda.dylib)",
    ))
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> RuntimeResult<T> {
    // SAFETY: Caller provides expected symbol type from CUDA driver API.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|err| {
        RuntimeError::driver_unavailable(format!(
            "failed to resolve CUDA symbol {}: {err}",
            String::from_utf8_lossy(&name[..name.len().saturating_sub(1)])
        ))
    })?;
    Ok(*sym)
}

fn init_call(code: CUresult, op: &str) -> RuntimeResult<()> {
    DriverStatus::check(code).map_err(|status| {
        RuntimeError::driver_unavailable(format!("CUDA driver call {op} failed with {status}"))
    })
}
