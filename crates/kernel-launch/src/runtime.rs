use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::abi::{KernelSignature, ScalarArg};
use crate::config::DriverConfig;
use crate::descriptor::{Dim3, LaunchDescriptor};
use crate::driver::cuda::CudaDriver;
use crate::driver::Driver;
use crate::error::{RuntimeError, RuntimeResult};
use crate::invoker;
use crate::loader::{self, KernelFunction, ModuleHandle};
use crate::marshal::{self, ArgumentBuffer};
use crate::meta::KernelMeta;

/// Loads binaries and launches kernels through one driver.
///
/// Holds no mutable state of its own; handles are owned by the driver.
pub struct KernelRuntime<D: Driver + ?Sized> {
    driver: Arc<D>,
}

impl<D: Driver + ?Sized> Clone for KernelRuntime<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
        }
    }
}

impl<D: Driver + ?Sized> KernelRuntime<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn load_binary(
        &self,
        path: impl AsRef<Path>,
        entry_point: &str,
    ) -> RuntimeResult<(ModuleHandle, KernelFunction)> {
        loader::load_binary(self.driver.as_ref(), path, entry_point)
    }

    pub fn load_image(
        &self,
        image: &[u8],
        origin: impl AsRef<Path>,
        entry_point: &str,
    ) -> RuntimeResult<(ModuleHandle, KernelFunction)> {
        loader::load_image(self.driver.as_ref(), image, origin, entry_point)
    }

    /// Loads `binary` using the entry point and launch hints from its metadata
    /// sidecar.
    pub fn load_kernel(
        &self,
        binary: impl AsRef<Path>,
        meta: impl AsRef<Path>,
    ) -> RuntimeResult<LoadedKernel> {
        let meta_path = meta.as_ref();
        let meta = KernelMeta::read(meta_path)?;
        let signature = meta.signature().map_err(|message| RuntimeError::Metadata {
            path: meta_path.to_path_buf(),
            message,
        })?;
        let (module, function) = self.load_binary(binary, &meta.kernel_symbol)?;
        Ok(LoadedKernel {
            module,
            function,
            signature,
            meta,
        })
    }

    /// Marshals the three argument sequences and launches.
    pub fn launch(
        &self,
        descriptor: &LaunchDescriptor,
        tensor_pointers: &[u64],
        dynamic_dims: &[i32],
        scalar_args: &[ScalarArg],
    ) -> RuntimeResult<()> {
        let mut args = marshal::marshal(tensor_pointers, dynamic_dims, scalar_args)?;
        self.launch_marshaled(descriptor, &mut args)
    }

    pub fn launch_marshaled(
        &self,
        descriptor: &LaunchDescriptor,
        args: &mut ArgumentBuffer,
    ) -> RuntimeResult<()> {
        invoker::launch(self.driver.as_ref(), descriptor, args)
    }

    /// Launches a kernel loaded with its sidecar, checking the marshaled
    /// arguments against the recorded signature before any driver call.
    pub fn launch_kernel(
        &self,
        kernel: &LoadedKernel,
        descriptor: &LaunchDescriptor,
        args: &mut ArgumentBuffer,
    ) -> RuntimeResult<()> {
        kernel.signature.check(kernel.function.name(), args)?;
        self.launch_marshaled(descriptor, args)
    }
}

/// A kernel loaded together with its compiler metadata.
#[derive(Debug, Clone)]
pub struct LoadedKernel {
    pub module: ModuleHandle,
    pub function: KernelFunction,
    pub signature: KernelSignature,
    pub meta: KernelMeta,
}

impl LoadedKernel {
    /// Descriptor over `grid` with the block size and shared memory recorded by
    /// the compiler.
    pub fn descriptor(&self, grid: Dim3) -> RuntimeResult<LaunchDescriptor> {
        LaunchDescriptor::from_dims(
            self.function.clone(),
            self.meta.shared_mem_bytes,
            grid,
            Dim3::linear(self.meta.threads_per_block()),
        )
    }
}

static GLOBAL: OnceLock<Result<KernelRuntime<CudaDriver>, String>> = OnceLock::new();

/// Brings up the process-wide CUDA runtime. Must run before [`global`]; later
/// calls return the outcome of the first one. There is no teardown.
pub fn init(config: &DriverConfig) -> RuntimeResult<()> {
    let state = GLOBAL.get_or_init(|| match CudaDriver::new(config) {
        Ok(driver) => Ok(KernelRuntime::new(Arc::new(driver))),
        Err(err) => {
            log::debug!("CUDA runtime initialization failed: {err}");
            Err(err.to_string())
        }
    });
    state
        .as_ref()
        .map(|_| ())
        .map_err(|msg| RuntimeError::driver_unavailable(msg.clone()))
}

/// [`init`] with configuration from the environment.
pub fn init_from_env() -> RuntimeResult<()> {
    init(&DriverConfig::from_env()?)
}

/// The process-wide runtime created by [`init`].
pub fn global() -> RuntimeResult<&'static KernelRuntime<CudaDriver>> {
    match GLOBAL.get() {
        Some(Ok(runtime)) => Ok(runtime),
        Some(Err(msg)) => Err(RuntimeError::driver_unavailable(msg.clone())),
        None => Err(RuntimeError::driver_unavailable(
            "runtime not initialized; call kernel_launch::init first",
        )),
    }
}

/// Whether a CUDA driver could be initialized, initializing from the
/// environment on first use.
pub fn is_available() -> bool {
    init_from_env().is_ok()
}

pub fn load_binary(
    path: impl AsRef<Path>,
    entry_point: &str,
) -> RuntimeResult<(ModuleHandle, KernelFunction)> {
    global()?.load_binary(path, entry_point)
}

pub fn launch(
    descriptor: &LaunchDescriptor,
    tensor_pointers: &[u64],
    dynamic_dims: &[i32],
    scalar_args: &[ScalarArg],
) -> RuntimeResult<()> {
    global()?.launch(descriptor, tensor_pointers, dynamic_dims, scalar_args)
}
