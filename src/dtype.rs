use half::{bf16, f16};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DTypeError {
    #[error("The backend {1} does not support the dtype {0}")]
    DTypeNotSupportedByBackend(DType, String),
    #[error("Unknown dtype name {0:?}")]
    UnknownDTypeName(String),
    #[cfg(feature = "candle")]
    #[error("The candle dtype {0:?} is not supported")]
    UnsupportedCandleDType(candle_core::DType),
}

#[derive(
    Copy,
    Clone,
    Debug,
    Hash,
    Eq,
    PartialEq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
)]
pub enum DType {
    #[strum(serialize = "float64")]
    F64,
    #[strum(serialize = "float32")]
    F32,
    #[strum(serialize = "bfloat16")]
    BF16,
    #[strum(serialize = "float16")]
    F16,
    #[strum(serialize = "int64")]
    I64,
    #[strum(serialize = "int32")]
    I32,
    #[strum(serialize = "uint32")]
    U32,
    #[strum(serialize = "uint8")]
    U8,
    #[strum(serialize = "bool")]
    BOOL,
}

impl DType {
    pub fn size(&self) -> usize {
        match self {
            DType::F64 => 8,
            DType::F32 => 4,
            DType::BF16 => 2,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::I32 => 4,
            DType::U32 => 4,
            DType::U8 => 1,
            DType::BOOL => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F64 | DType::F32 | DType::BF16 | DType::F16)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DType::I64 | DType::I32 | DType::U32 | DType::U8)
    }

    pub fn from_name(name: &str) -> Result<Self, DTypeError> {
        name.parse()
            .map_err(|_| DTypeError::UnknownDTypeName(name.to_string()))
    }

    /// Smallest dtype both operands can be cast to without changing kind.
    ///
    /// Floats win over integers, integers win over bool, and within a kind
    /// the wider type wins. Mixed 16-bit floats widen to `F32`.
    pub fn promote(a: DType, b: DType) -> DType {
        if a == b {
            return a;
        }
        match (a.is_float(), b.is_float()) {
            (true, true) => {
                if a.size() == b.size() {
                    // f16 vs bf16
                    DType::F32
                } else if a.size() > b.size() {
                    a
                } else {
                    b
                }
            }
            (true, false) => a,
            (false, true) => b,
            (false, false) => match (a, b) {
                (DType::BOOL, other) | (other, DType::BOOL) => other,
                (DType::U32, DType::I32) | (DType::I32, DType::U32) => DType::I64,
                _ => {
                    if a.size() >= b.size() {
                        a
                    } else {
                        b
                    }
                }
            },
        }
    }
}

#[cfg(feature = "candle")]
impl TryFrom<DType> for candle_core::DType {
    type Error = DTypeError;
    fn try_from(value: DType) -> Result<Self, Self::Error> {
        Ok(match value {
            DType::F64 => candle_core::DType::F64,
            DType::F32 => candle_core::DType::F32,
            DType::BF16 => candle_core::DType::BF16,
            DType::F16 => candle_core::DType::F16,
            DType::I64 => candle_core::DType::I64,
            DType::U32 => candle_core::DType::U32,
            DType::U8 => candle_core::DType::U8,
            _ => Err(DTypeError::DTypeNotSupportedByBackend(
                value,
                "candle".to_string(),
            ))?,
        })
    }
}

#[cfg(feature = "candle")]
impl TryFrom<candle_core::DType> for DType {
    type Error = DTypeError;
    #[allow(unreachable_patterns)]
    fn try_from(value: candle_core::DType) -> Result<Self, Self::Error> {
        Ok(match value {
            candle_core::DType::F64 => DType::F64,
            candle_core::DType::F32 => DType::F32,
            candle_core::DType::BF16 => DType::BF16,
            candle_core::DType::F16 => DType::F16,
            candle_core::DType::I64 => DType::I64,
            candle_core::DType::U8 => DType::U8,
            candle_core::DType::U32 => DType::U32,
            other => Err(DTypeError::UnsupportedCandleDType(other))?,
        })
    }
}

pub trait DTypeOfPrimitive {
    const DTYPE: DType;
}

impl DTypeOfPrimitive for f64 {
    const DTYPE: DType = DType::F64;
}
impl DTypeOfPrimitive for f32 {
    const DTYPE: DType = DType::F32;
}
impl DTypeOfPrimitive for bf16 {
    const DTYPE: DType = DType::BF16;
}
impl DTypeOfPrimitive for f16 {
    const DTYPE: DType = DType::F16;
}
impl DTypeOfPrimitive for i64 {
    const DTYPE: DType = DType::I64;
}
impl DTypeOfPrimitive for i32 {
    const DTYPE: DType = DType::I32;
}
impl DTypeOfPrimitive for u32 {
    const DTYPE: DType = DType::U32;
}
impl DTypeOfPrimitive for u8 {
    const DTYPE: DType = DType::U8;
}
impl DTypeOfPrimitive for bool {
    const DTYPE: DType = DType::BOOL;
}
