//! Kernel parameter kinds and Triton-style parameter signatures.
//!
//! A signature is the list of ABI tags the kernel compiler records for an entry
//! point, e.g. `*fp32,*fp32,i32,fp32`. Tags starting with `*` are device pointers;
//! the rest name a scalar kind.

use std::fmt;

use half::{bf16, f16};

use crate::error::{RuntimeError, RuntimeResult};
use crate::marshal::ArgumentBuffer;

/// Declared numeric kind of a scalar kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    I1,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    BF16,
    F32,
    F64,
}

impl ScalarKind {
    /// Bytes occupied in the argument buffer. Alignment equals width.
    pub const fn width(self) -> usize {
        match self {
            ScalarKind::I1 | ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 | ScalarKind::F16 | ScalarKind::BF16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => 8,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ScalarKind::I1 => "i1",
            ScalarKind::I8 => "i8",
            ScalarKind::I16 => "i16",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::U8 => "u8",
            ScalarKind::U16 => "u16",
            ScalarKind::U32 => "u32",
            ScalarKind::U64 => "u64",
            ScalarKind::F16 => "fp16",
            ScalarKind::BF16 => "bf16",
            ScalarKind::F32 => "fp32",
            ScalarKind::F64 => "fp64",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag {
            "i1" | "u1" => ScalarKind::I1,
            "i8" => ScalarKind::I8,
            "i16" => ScalarKind::I16,
            "i32" => ScalarKind::I32,
            "i64" => ScalarKind::I64,
            "u8" => ScalarKind::U8,
            "u16" => ScalarKind::U16,
            "u32" => ScalarKind::U32,
            "u64" => ScalarKind::U64,
            "fp16" => ScalarKind::F16,
            "bf16" => ScalarKind::BF16,
            "fp32" => ScalarKind::F32,
            "fp64" => ScalarKind::F64,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A scalar argument: declared kind plus raw bit pattern.
///
/// The kind decides both the write width and how the kernel interprets the bits.
/// Nothing is coerced; bits above the kind's width are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScalarArg {
    kind: ScalarKind,
    bits: u64,
}

impl ScalarArg {
    pub fn from_bits(kind: ScalarKind, bits: u64) -> Self {
        let bits = match kind.width() {
            8 => bits,
            width => bits & ((1u64 << (width * 8)) - 1),
        };
        Self { kind, bits }
    }

    pub fn bool(value: bool) -> Self {
        Self::from_bits(ScalarKind::I1, u64::from(value))
    }

    pub fn i8(value: i8) -> Self {
        Self::from_bits(ScalarKind::I8, value as u8 as u64)
    }

    pub fn i16(value: i16) -> Self {
        Self::from_bits(ScalarKind::I16, value as u16 as u64)
    }

    pub fn i32(value: i32) -> Self {
        Self::from_bits(ScalarKind::I32, value as u32 as u64)
    }

    pub fn i64(value: i64) -> Self {
        Self::from_bits(ScalarKind::I64, value as u64)
    }

    pub fn u8(value: u8) -> Self {
        Self::from_bits(ScalarKind::U8, u64::from(value))
    }

    pub fn u16(value: u16) -> Self {
        Self::from_bits(ScalarKind::U16, u64::from(value))
    }

    pub fn u32(value: u32) -> Self {
        Self::from_bits(ScalarKind::U32, u64::from(value))
    }

    pub fn u64(value: u64) -> Self {
        Self::from_bits(ScalarKind::U64, value)
    }

    pub fn f16(value: f16) -> Self {
        Self::from_bits(ScalarKind::F16, u64::from(value.to_bits()))
    }

    pub fn bf16(value: bf16) -> Self {
        Self::from_bits(ScalarKind::BF16, u64::from(value.to_bits()))
    }

    pub fn f32(value: f32) -> Self {
        Self::from_bits(ScalarKind::F32, u64::from(value.to_bits()))
    }

    pub fn f64(value: f64) -> Self {
        Self::from_bits(ScalarKind::F64, value.to_bits())
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }
}

/// Kind of one marshaled kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Pointer,
    Scalar(ScalarKind),
}

impl ParamKind {
    pub const fn width(self) -> usize {
        match self {
            ParamKind::Pointer => std::mem::size_of::<u64>(),
            ParamKind::Scalar(kind) => kind.width(),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Pointer => f.write_str("pointer"),
            ParamKind::Scalar(kind) => write!(f, "{kind}"),
        }
    }
}

/// Ordered parameter kinds of a compiled entry point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelSignature {
    params: Vec<ParamKind>,
}

impl KernelSignature {
    pub fn new(params: Vec<ParamKind>) -> Self {
        Self { params }
    }

    /// Parses a comma-separated tag list such as `*fp32,i32,fp32`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        Self::from_tags(trimmed.split(','))
    }

    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Result<Self, String> {
        let params = tags
            .into_iter()
            .enumerate()
            .map(|(idx, tag)| {
                let tag = tag.trim();
                if tag.starts_with('*') {
                    Ok(ParamKind::Pointer)
                } else {
                    ScalarKind::from_tag(tag)
                        .map(ParamKind::Scalar)
                        .ok_or_else(|| format!("unknown parameter type '{tag}' at position {idx}"))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    /// Checks a marshaled buffer against this signature, parameter by parameter.
    pub fn check(&self, kernel: &str, args: &ArgumentBuffer) -> RuntimeResult<()> {
        let mismatch = |message: String| RuntimeError::ArgumentMismatch {
            kernel: kernel.to_string(),
            message,
        };
        if let Some((idx, (expected, actual))) = self
            .params
            .iter()
            .zip(args.kinds())
            .enumerate()
            .find(|(_, (expected, actual))| expected != actual)
        {
            return Err(mismatch(format!(
                "parameter {idx} expects {expected}, got {actual}"
            )));
        }
        if self.params.len() != args.len() {
            return Err(mismatch(format!(
                "expected {} parameters, got {}",
                self.params.len(),
                args.len()
            )));
        }
        Ok(())
    }
}
