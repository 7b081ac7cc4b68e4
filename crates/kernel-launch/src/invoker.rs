use crate::descriptor::LaunchDescriptor;
use crate::driver::Driver;
use crate::error::{RuntimeError, RuntimeResult};
use crate::marshal::ArgumentBuffer;

/// Enqueues `descriptor`'s function on the default stream with `args`.
///
/// Success means the driver accepted the launch, not that the kernel ran. Faults
/// inside the kernel show up later, on some unrelated driver call, as
/// [`RuntimeError::DeferredDevice`]; they cannot be tied back to this launch.
pub fn launch<D: Driver + ?Sized>(
    driver: &D,
    descriptor: &LaunchDescriptor,
    args: &mut ArgumentBuffer,
) -> RuntimeResult<()> {
    let function = descriptor.function();
    log::trace!(
        "launch '{}' grid={} block={} smem={} params={} ({} bytes)",
        function.name(),
        descriptor.grid(),
        descriptor.block(),
        descriptor.shared_mem_bytes(),
        args.len(),
        args.byte_len()
    );
    driver
        .launch_kernel(
            function.raw(),
            descriptor.grid(),
            descriptor.block(),
            descriptor.shared_mem_bytes(),
            args,
        )
        .map_err(|status| {
            RuntimeError::from_status("kernel launch", status, |status| RuntimeError::Launch {
                kernel: function.name().to_string(),
                status,
            })
        })
}
