//! Loads precompiled GPU kernel binaries and launches them.
//!
//! The flow is: [`load_binary`] registers a binary image and resolves an entry
//! point, [`LaunchDescriptor`] fixes the launch geometry, [`marshal`] packs the
//! arguments into the kernel's parameter layout, and [`launch`] hands both to the
//! driver.
//!
//! All calls are synchronous on the host. Kernel execution is asynchronous on the
//! device's default stream and is never waited on here.

pub mod abi;
pub mod config;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod invoker;
pub mod loader;
pub mod marshal;
pub mod meta;
mod runtime;

pub use abi::{KernelSignature, ParamKind, ScalarArg, ScalarKind};
pub use config::DriverConfig;
pub use descriptor::{Dim3, LaunchDescriptor};
pub use driver::{Driver, DriverStatus};
pub use error::{RuntimeError, RuntimeResult};
pub use loader::{KernelFunction, ModuleHandle};
pub use marshal::{marshal, ArgumentBuffer};
pub use meta::KernelMeta;
pub use runtime::{
    global, init, init_from_env, is_available, launch, load_binary, KernelRuntime, LoadedKernel,
};
