//! C ABI for host-language bindings.
//!
//! Every entry point returns `KL_OK` or a negative `KL_ERR_*` code. The message
//! and driver status of the last failure on the calling thread are available from
//! [`kl_last_error`] and [`kl_last_status`].

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::Path;

use kernel_launch::{
    Driver, KernelFunction, KernelRuntime, LaunchDescriptor, RuntimeError, ScalarArg, ScalarKind,
};

pub const KL_OK: c_int = 0;
pub const KL_ERR_INVALID_ARGUMENT: c_int = -1;
pub const KL_ERR_LOAD: c_int = -2;
pub const KL_ERR_MODULE_REGISTRATION: c_int = -3;
pub const KL_ERR_SYMBOL_NOT_FOUND: c_int = -4;
pub const KL_ERR_INVALID_LAUNCH_CONFIG: c_int = -5;
pub const KL_ERR_ALLOCATION: c_int = -6;
pub const KL_ERR_LAUNCH: c_int = -7;
pub const KL_ERR_DEFERRED_DEVICE: c_int = -8;
pub const KL_ERR_DRIVER_UNAVAILABLE: c_int = -9;

/// Scalar argument with its declared kind tag and raw bits.
///
/// Kind tags: 0 i1, 1 i8, 2 i16, 3 i32, 4 i64, 5 u8, 6 u16, 7 u32, 8 u64,
/// 9 fp16, 10 bf16, 11 fp32, 12 fp64.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KlScalar {
    pub kind: u32,
    pub bits: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KlLaunchConfig {
    pub grid: [i64; 3],
    pub block: [i64; 3],
    pub shared_mem_bytes: i64,
}

/// Opaque kernel function handle handed out by [`kl_load_binary`].
pub struct KlFunction {
    function: KernelFunction,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<(CString, c_int)>> = const { RefCell::new(None) };
}

#[no_mangle]
pub extern "C" fn kl_init() -> c_int {
    report(kernel_launch::init_from_env())
}

#[no_mangle]
/// # Safety
/// `path` and `entry_point` must be valid NUL-terminated strings and
/// `out_function` must be valid for a pointer write.
pub unsafe extern "C" fn kl_load_binary(
    path: *const c_char,
    entry_point: *const c_char,
    out_function: *mut *mut KlFunction,
) -> c_int {
    let runtime = match kernel_launch::global() {
        Ok(runtime) => runtime,
        Err(err) => return report::<()>(Err(err)),
    };
    unsafe { load_with(runtime, path, entry_point, out_function) }
}

#[no_mangle]
/// # Safety
/// `function` must come from [`kl_load_binary`] and not be released twice. The
/// module it belongs to stays loaded.
pub unsafe extern "C" fn kl_function_release(function: *mut KlFunction) {
    if !function.is_null() {
        drop(unsafe { Box::from_raw(function) });
    }
}

#[no_mangle]
/// # Safety
/// `function` must come from [`kl_load_binary`], `config` must be valid, and each
/// array pointer must be valid for its count (it may be null when the count is 0).
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn kl_launch(
    function: *const KlFunction,
    config: *const KlLaunchConfig,
    tensor_pointers: *const u64,
    tensor_count: usize,
    dynamic_dims: *const i32,
    dim_count: usize,
    scalars: *const KlScalar,
    scalar_count: usize,
) -> c_int {
    let runtime = match kernel_launch::global() {
        Ok(runtime) => runtime,
        Err(err) => return report::<()>(Err(err)),
    };
    unsafe {
        launch_with(
            runtime,
            function,
            config,
            (tensor_pointers, tensor_count),
            (dynamic_dims, dim_count),
            (scalars, scalar_count),
        )
    }
}

/// Message for the last failure on this thread, or null. Valid until the next
/// failing call on the same thread.
#[no_mangle]
pub extern "C" fn kl_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |(msg, _)| msg.as_ptr())
    })
}

/// Driver status code of the last failure on this thread, or 0.
#[no_mangle]
pub extern "C" fn kl_last_status() -> c_int {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, |(_, status)| *status))
}

unsafe fn load_with<D: Driver + ?Sized>(
    runtime: &KernelRuntime<D>,
    path: *const c_char,
    entry_point: *const c_char,
    out_function: *mut *mut KlFunction,
) -> c_int {
    if path.is_null() || entry_point.is_null() || out_function.is_null() {
        return invalid_argument("null pointer passed to kl_load_binary");
    }
    let path = match unsafe { CStr::from_ptr(path) }.to_str() {
        Ok(value) => value,
        Err(_) => return invalid_argument("path is not valid UTF-8"),
    };
    let entry_point = match unsafe { CStr::from_ptr(entry_point) }.to_str() {
        Ok(value) => value,
        Err(_) => return invalid_argument("entry point is not valid UTF-8"),
    };
    match runtime.load_binary(Path::new(path), entry_point) {
        Ok((_module, function)) => {
            unsafe { *out_function = Box::into_raw(Box::new(KlFunction { function })) };
            KL_OK
        }
        Err(err) => report::<()>(Err(err)),
    }
}

unsafe fn launch_with<D: Driver + ?Sized>(
    runtime: &KernelRuntime<D>,
    function: *const KlFunction,
    config: *const KlLaunchConfig,
    tensor_pointers: (*const u64, usize),
    dynamic_dims: (*const i32, usize),
    scalars: (*const KlScalar, usize),
) -> c_int {
    if function.is_null() || config.is_null() {
        return invalid_argument("null function or launch config");
    }
    let (function, config) = unsafe { (&(*function).function, &*config) };
    let (Some(tensor_pointers), Some(dynamic_dims), Some(raw_scalars)) = (unsafe {
        (
            slice_or_empty(tensor_pointers),
            slice_or_empty(dynamic_dims),
            slice_or_empty(scalars),
        )
    }) else {
        return invalid_argument("null argument array with non-zero count");
    };

    let mut scalars = Vec::with_capacity(raw_scalars.len());
    for (idx, raw) in raw_scalars.iter().enumerate() {
        match kind_from_tag(raw.kind) {
            Some(kind) => scalars.push(ScalarArg::from_bits(kind, raw.bits)),
            None => {
                return invalid_argument(&format!(
                    "unknown scalar kind tag {} at position {idx}",
                    raw.kind
                ))
            }
        }
    }

    let result = LaunchDescriptor::new(
        function.clone(),
        config.shared_mem_bytes,
        config.grid,
        config.block,
    )
    .and_then(|descriptor| runtime.launch(&descriptor, tensor_pointers, dynamic_dims, &scalars));
    report(result)
}

unsafe fn slice_or_empty<'a, T>((ptr, len): (*const T, usize)) -> Option<&'a [T]> {
    if len == 0 {
        Some(&[])
    } else if ptr.is_null() {
        None
    } else {
        Some(unsafe { std::slice::from_raw_parts(ptr, len) })
    }
}

fn kind_from_tag(tag: u32) -> Option<ScalarKind> {
    let kind = match tag {
        0 => ScalarKind::I1,
        1 => ScalarKind::I8,
        2 => ScalarKind::I16,
        3 => ScalarKind::I32,
        4 => ScalarKind::I64,
        5 => ScalarKind::U8,
        6 => ScalarKind::U16,
        7 => ScalarKind::U32,
        8 => ScalarKind::U64,
        9 => ScalarKind::F16,
        10 => ScalarKind::BF16,
        11 => ScalarKind::F32,
        12 => ScalarKind::F64,
        _ => return None,
    };
    Some(kind)
}

fn error_code(err: &RuntimeError) -> c_int {
    match err {
        RuntimeError::Load { .. } => KL_ERR_LOAD,
        RuntimeError::ModuleRegistration { .. } => KL_ERR_MODULE_REGISTRATION,
        RuntimeError::SymbolNotFound { .. } => KL_ERR_SYMBOL_NOT_FOUND,
        RuntimeError::InvalidLaunchConfig { .. } => KL_ERR_INVALID_LAUNCH_CONFIG,
        RuntimeError::Allocation { .. } => KL_ERR_ALLOCATION,
        RuntimeError::Launch { .. } => KL_ERR_LAUNCH,
        RuntimeError::DeferredDevice { .. } => KL_ERR_DEFERRED_DEVICE,
        RuntimeError::DriverUnavailable { .. } => KL_ERR_DRIVER_UNAVAILABLE,
        RuntimeError::InvalidEntryPoint { .. }
        | RuntimeError::ArgumentMismatch { .. }
        | RuntimeError::Metadata { .. } => KL_ERR_INVALID_ARGUMENT,
    }
}

fn report<T>(result: Result<T, RuntimeError>) -> c_int {
    match result {
        Ok(_) => KL_OK,
        Err(err) => {
            let code = error_code(&err);
            let status = err.status().map_or(0, |status| status.code());
            log::debug!("kernel-launch C call failed ({code}): {err}");
            set_last_error(err.to_string(), status);
            code
        }
    }
}

fn invalid_argument(message: &str) -> c_int {
    set_last_error(message.to_string(), 0);
    KL_ERR_INVALID_ARGUMENT
}

fn set_last_error(message: String, status: c_int) {
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some((message, status)));
}
