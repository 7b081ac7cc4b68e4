//! Packs kernel arguments into the byte layout the launch ABI expects.
//!
//! Every parameter is written at the next offset aligned to its own width:
//! device pointers take 8 bytes, scalars take the width of their declared kind.
//! The driver receives one pointer per parameter into this buffer, so the order
//! here is the order the kernel sees.

use std::ffi::c_void;

use crate::abi::{ParamKind, ScalarArg, ScalarKind};
use crate::error::{RuntimeError, RuntimeResult};

/// Contiguous parameter bytes plus the per-parameter size table.
///
/// Storage is backed by `u64` words so the base address is 8-byte aligned and
/// every naturally aligned offset is aligned in host memory too. A buffer is
/// built for one launch and dropped after the driver call returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentBuffer {
    words: Vec<u64>,
    len: usize,
    sizes: Vec<usize>,
    offsets: Vec<usize>,
    kinds: Vec<ParamKind>,
}

/// Builds the argument buffer for a launch in the fixed order
/// `[tensor pointers] -> [dynamic dims] -> [scalar args]`, each in caller order.
///
/// Dynamic dimensions are passed as 32-bit signed integers. Empty inputs are
/// valid and produce an empty buffer.
pub fn marshal(
    tensor_pointers: &[u64],
    dynamic_dims: &[i32],
    scalar_args: &[ScalarArg],
) -> RuntimeResult<ArgumentBuffer> {
    let kinds = tensor_pointers
        .iter()
        .map(|_| ParamKind::Pointer)
        .chain(dynamic_dims.iter().map(|_| ParamKind::Scalar(ScalarKind::I32)))
        .chain(scalar_args.iter().map(|arg| ParamKind::Scalar(arg.kind())));
    let (count, bytes) = extent(kinds);

    let mut args = ArgumentBuffer::with_capacity(count, bytes)?;
    for ptr in tensor_pointers {
        args.push_pointer(*ptr)?;
    }
    for dim in dynamic_dims {
        args.push_scalar(ScalarArg::i32(*dim))?;
    }
    for arg in scalar_args {
        args.push_scalar(*arg)?;
    }
    Ok(args)
}

impl ArgumentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves room for `params` parameters spanning `bytes` bytes.
    pub fn with_capacity(params: usize, bytes: usize) -> RuntimeResult<Self> {
        let mut args = Self::new();
        args.reserve(params, bytes)?;
        Ok(args)
    }

    /// Appends a device pointer. The address is not checked for liveness.
    pub fn push_pointer(&mut self, ptr: u64) -> RuntimeResult<()> {
        self.push(ParamKind::Pointer, ptr)
    }

    pub fn push_scalar(&mut self, arg: ScalarArg) -> RuntimeResult<()> {
        self.push(ParamKind::Scalar(arg.kind()), arg.bits())
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Total byte length, including interior alignment padding.
    pub fn byte_len(&self) -> usize {
        self.len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    /// Byte size of each parameter, in parameter order.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn kinds(&self) -> &[ParamKind] {
        &self.kinds
    }

    /// Bytes of parameter `index`.
    pub fn param(&self, index: usize) -> Option<&[u8]> {
        let offset = *self.offsets.get(index)?;
        let size = self.sizes[index];
        Some(&self.as_bytes()[offset..offset + size])
    }

    /// One pointer per parameter into this buffer, for the driver's
    /// `kernelParams` array. Valid while `self` is neither moved nor modified.
    pub fn param_pointers(&mut self) -> Vec<*mut c_void> {
        let base = bytemuck::cast_slice_mut::<u64, u8>(&mut self.words).as_mut_ptr();
        self.offsets
            .iter()
            .map(|&offset| base.wrapping_add(offset).cast::<c_void>())
            .collect()
    }

    fn push(&mut self, kind: ParamKind, bits: u64) -> RuntimeResult<()> {
        let width = kind.width();
        let offset = align_up(self.len, width);
        let end = offset + width;
        self.reserve(1, end - self.len)?;
        let words = end.div_ceil(8);
        if self.words.len() < words {
            self.words.resize(words, 0);
        }

        let dst = &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[offset..end];
        write_bits(dst, bits);
        self.len = end;
        self.sizes.push(width);
        self.offsets.push(offset);
        self.kinds.push(kind);
        Ok(())
    }

    fn reserve(&mut self, params: usize, bytes: usize) -> RuntimeResult<()> {
        let requested = bytes.saturating_add(params.saturating_mul(PARAM_TABLE_BYTES));
        let total_words = self
            .len
            .checked_add(bytes)
            .ok_or(RuntimeError::Allocation { bytes: requested })?
            .div_ceil(8);
        let extra_words = total_words.saturating_sub(self.words.len());
        let alloc_error = |_| RuntimeError::Allocation { bytes: requested };
        self.words.try_reserve_exact(extra_words).map_err(alloc_error)?;
        self.sizes.try_reserve_exact(params).map_err(alloc_error)?;
        self.offsets.try_reserve_exact(params).map_err(alloc_error)?;
        self.kinds.try_reserve_exact(params).map_err(alloc_error)?;
        Ok(())
    }
}

// Size, offset and kind entries kept per parameter.
const PARAM_TABLE_BYTES: usize =
    2 * std::mem::size_of::<usize>() + std::mem::size_of::<ParamKind>();

/// Parameter count and byte length of a layout over `kinds`.
fn extent(kinds: impl Iterator<Item = ParamKind>) -> (usize, usize) {
    kinds.fold((0, 0), |(count, len), kind| {
        (count + 1, align_up(len, kind.width()) + kind.width())
    })
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

fn write_bits(dst: &mut [u8], bits: u64) {
    match dst.len() {
        1 => dst.copy_from_slice(&(bits as u8).to_ne_bytes()),
        2 => dst.copy_from_slice(&(bits as u16).to_ne_bytes()),
        4 => dst.copy_from_slice(&(bits as u32).to_ne_bytes()),
        8 => dst.copy_from_slice(&bits.to_ne_bytes()),
        width => unreachable!("unsupported parameter width {width}"),
    }
}
