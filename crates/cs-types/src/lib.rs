#![forbid(unsafe_code)]

use std::fmt;

use num_traits::{AsPrimitive, Num, NumCast};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use num_traits::{One, Zero};

/// Runtime tag for the concrete element type stored in a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("expected element type {expected} but found {found}")]
    DtypeMismatch { expected: DType, found: DType },
}

/// Result dtype of an arithmetic operation between `left` and `right`.
///
/// Floats absorb integers, the wider operand wins within a family. This is
/// the tag-level view of [`Promote`].
#[must_use]
pub fn common_dtype(left: DType, right: DType) -> DType {
    use DType::{Float32, Float64, Int32, Int64};

    match (left, right) {
        (a, b) if a == b => a,
        (Float64, _) | (_, Float64) => Float64,
        (Float32, _) | (_, Float32) => Float32,
        (Int64, _) | (_, Int64) => Int64,
        _ => Int32,
    }
}

/// Numeric element stored in a series buffer.
///
/// The bound set is the minimum the transform and aggregate engine needs:
/// field arithmetic, ordering, a zero/one identity, a lossy route through
/// `f64` for the transcendental functions, and thread-safety so buffers can
/// be split across workers.
pub trait Element:
    Copy
    + Default
    + PartialOrd
    + Num
    + NumCast
    + AsPrimitive<f64>
    + Send
    + Sync
    + fmt::Debug
    + fmt::Display
    + Serialize
    + DeserializeOwned
    + 'static
{
    const DTYPE: DType;

    /// Convert back from `f64`, truncating toward zero and saturating for
    /// integer element types.
    fn from_f64_lossy(value: f64) -> Self;

    #[inline]
    fn to_f64_lossy(self) -> f64 {
        self.as_()
    }

    /// Integer arithmetic wraps on overflow; floats use the plain operators.
    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;

    /// Wraps at `MIN / -1` for integers.
    ///
    /// # Panics
    ///
    /// Integer division by zero panics.
    fn wrapping_div(self, rhs: Self) -> Self;

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn pow(self, exponent: Self) -> Self;
    fn abs(self) -> Self;

    /// -1, 0 or +1. Zero and NaN map to 0.
    #[inline]
    fn signum(self) -> Self {
        let zero = Self::zero();
        if self > zero {
            Self::one()
        } else if self < zero {
            zero - Self::one()
        } else {
            zero
        }
    }

    #[inline]
    fn min_of(self, other: Self) -> Self {
        if other < self { other } else { self }
    }

    #[inline]
    fn max_of(self, other: Self) -> Self {
        if self < other { other } else { self }
    }
}

macro_rules! float_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {$(
        impl Element for $ty {
            const DTYPE: DType = DType::$dtype;

            #[inline]
            fn from_f64_lossy(value: f64) -> Self {
                value as $ty
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                self + rhs
            }

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                self - rhs
            }

            #[inline]
            fn wrapping_mul(self, rhs: Self) -> Self {
                self * rhs
            }

            #[inline]
            fn wrapping_div(self, rhs: Self) -> Self {
                self / rhs
            }

            #[inline]
            fn exp(self) -> Self {
                <$ty>::exp(self)
            }

            #[inline]
            fn ln(self) -> Self {
                <$ty>::ln(self)
            }

            #[inline]
            fn sqrt(self) -> Self {
                <$ty>::sqrt(self)
            }

            #[inline]
            fn pow(self, exponent: Self) -> Self {
                <$ty>::powf(self, exponent)
            }

            #[inline]
            fn abs(self) -> Self {
                <$ty>::abs(self)
            }
        }
    )*};
}

// Integer transcendental ops go through f64 and truncate back.
macro_rules! int_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {$(
        impl Element for $ty {
            const DTYPE: DType = DType::$dtype;

            #[inline]
            fn from_f64_lossy(value: f64) -> Self {
                value as $ty
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$ty>::wrapping_add(self, rhs)
            }

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$ty>::wrapping_sub(self, rhs)
            }

            #[inline]
            fn wrapping_mul(self, rhs: Self) -> Self {
                <$ty>::wrapping_mul(self, rhs)
            }

            #[inline]
            fn wrapping_div(self, rhs: Self) -> Self {
                <$ty>::wrapping_div(self, rhs)
            }

            #[inline]
            fn exp(self) -> Self {
                Self::from_f64_lossy(self.to_f64_lossy().exp())
            }

            #[inline]
            fn ln(self) -> Self {
                Self::from_f64_lossy(self.to_f64_lossy().ln())
            }

            #[inline]
            fn sqrt(self) -> Self {
                Self::from_f64_lossy(self.to_f64_lossy().sqrt())
            }

            #[inline]
            fn pow(self, exponent: Self) -> Self {
                Self::from_f64_lossy(self.to_f64_lossy().powf(exponent.to_f64_lossy()))
            }

            #[inline]
            fn abs(self) -> Self {
                self.wrapping_abs()
            }
        }
    )*};
}

float_element!(f32 => Float32, f64 => Float64);
int_element!(i32 => Int32, i64 => Int64);

/// Arithmetic promotion between a left element type and `Rhs`.
///
/// Both operands are lifted into `Output` before the operation runs, e.g.
/// `i32` with `f64` computes in `f64`.
pub trait Promote<Rhs: Element>: Element {
    type Output: Element;

    fn lift(self) -> <Self as Promote<Rhs>>::Output;
    fn lift_rhs(rhs: Rhs) -> <Self as Promote<Rhs>>::Output;
}

/// Element type produced by combining `L` and `R`.
pub type Promoted<L, R> = <L as Promote<R>>::Output;

macro_rules! promote {
    ($($lhs:ty, $rhs:ty => $out:ty;)*) => {$(
        impl Promote<$rhs> for $lhs {
            type Output = $out;

            #[inline]
            #[allow(clippy::unnecessary_cast)]
            fn lift(self) -> $out {
                self as $out
            }

            #[inline]
            #[allow(clippy::unnecessary_cast)]
            fn lift_rhs(rhs: $rhs) -> $out {
                rhs as $out
            }
        }
    )*};
}

promote! {
    i32, i32 => i32;
    i32, i64 => i64;
    i32, f32 => f32;
    i32, f64 => f64;
    i64, i32 => i64;
    i64, i64 => i64;
    i64, f32 => f32;
    i64, f64 => f64;
    f32, i32 => f32;
    f32, i64 => f32;
    f32, f32 => f32;
    f32, f64 => f64;
    f64, i32 => f64;
    f64, i64 => f64;
    f64, f32 => f64;
    f64, f64 => f64;
}
