#![forbid(unsafe_code)]

//! Nullable numeric series and a small heterogeneous column store.
//!
//! A [`Series`] owns a contiguous element buffer, a lazily grown
//! [`ValidityMask`] and the [`ExecPolicy`] every bulk loop over it runs
//! with. Transforms come in two shapes: the `&mut self` family rewrites the
//! buffer in place and returns `&mut Self` for chaining, the `&self` family
//! ([`Series::map`], [`Series::zip_map`] and the [`ops`] functions) builds a
//! new series and leaves its operands alone.

mod display;
mod frame;
pub mod ops;

use std::ops::Index;

use cs_columnar::{
    ValidityMask, ensure_same_len, masked_dot, masked_max, masked_min, masked_sum,
    masked_sum_sq_dev,
};
use cs_runtime::Execution;
use serde::{Deserialize, Serialize};

pub use cs_columnar::ColumnError;
pub use cs_runtime::{ExecPolicy, RuntimeError};
pub use cs_types::{DType, Element, Promote, Promoted, TypeError};
pub use frame::{AnySeries, ColumnElement, DataFrame, FrameError};

/// Ordered, single-typed, nullable numeric column.
///
/// Null positions never feed a transform: after any transform they hold
/// `T::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SeriesSnapshot<T>", bound(deserialize = "T: Element"))]
pub struct Series<T> {
    data: Vec<T>,
    validity: ValidityMask,
    policy: ExecPolicy,
}

impl<T: Element> Series<T> {
    /// Series over `data` with every position valid and the default policy.
    #[must_use]
    pub fn new(data: Vec<T>) -> Self {
        Self::with_policy(ExecPolicy::default(), data)
    }

    #[must_use]
    pub fn with_policy(policy: ExecPolicy, data: Vec<T>) -> Self {
        Self {
            data,
            validity: ValidityMask::new(),
            policy,
        }
    }

    /// `len` elements produced by `generator(i)` in index order.
    pub fn from_fn(len: usize, generator: impl FnMut(usize) -> T) -> Self {
        Self::new((0..len).map(generator).collect())
    }

    /// `None` entries become null positions holding `T::default()`.
    #[must_use]
    pub fn from_options(values: Vec<Option<T>>) -> Self {
        let len = values.len();
        let mut validity = ValidityMask::new();
        let data = values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                value.unwrap_or_else(|| {
                    validity.set_null(idx, len);
                    T::default()
                })
            })
            .collect();
        Self {
            data,
            validity,
            policy: ExecPolicy::default(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn policy(&self) -> ExecPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ExecPolicy) -> &mut Self {
        if policy != self.policy {
            log::trace!("series execution policy {} -> {}", self.policy, policy);
        }
        self.policy = policy;
        self
    }

    /// Raw value at `idx`, ignoring validity.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<T> {
        self.data.get(idx).copied()
    }

    /// Value at `idx` if it is in range and not null.
    #[must_use]
    pub fn get_valid(&self, idx: usize) -> Option<T> {
        if self.is_null(idx) {
            None
        } else {
            self.get(idx)
        }
    }

    /// Every value with nulls as `None`.
    #[must_use]
    pub fn to_options(&self) -> Vec<Option<T>> {
        (0..self.len()).map(|idx| self.get_valid(idx)).collect()
    }

    /// Positions past the end of the buffer report as null.
    #[must_use]
    pub fn is_null(&self, idx: usize) -> bool {
        idx >= self.len() || !self.validity.is_valid(idx)
    }

    /// Mark `idx` null.
    ///
    /// The mask never grows past the data, so `idx >= len()` is a no-op
    /// (logged at warn level on a non-empty series). Such positions already
    /// read as null through [`Series::is_null`].
    pub fn set_null(&mut self, idx: usize) -> &mut Self {
        let len = self.len();
        if !self.validity.set_null(idx, len) && len > 0 {
            log::warn!(
                "set_null ignored: position {idx} out of range for series of length {len}"
            );
        }
        self
    }

    pub fn set_valid(&mut self, idx: usize) -> &mut Self {
        self.validity.set_valid(idx);
        self
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.validity.count_valid(self.len(), self.policy)
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        self.validity.count_null(self.len(), self.policy)
    }

    /// Apply `f` to every valid element in place.
    pub fn transform<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(T) -> T + Send + Sync,
    {
        if self.validity.is_materialized() {
            let bits = self.validity.padded(self.len());
            self.policy.zip_in_place(&mut self.data, &bits, move |x, valid| {
                if valid { f(x) } else { T::default() }
            });
        } else {
            self.policy.map_in_place(&mut self.data, f);
        }
        self
    }

    /// New series of `f(x)` for every valid element. Nulls and policy carry over.
    pub fn map<U, F>(&self, f: F) -> Series<U>
    where
        U: Element,
        F: Fn(T) -> U + Send + Sync,
    {
        let mut data = vec![U::default(); self.len()];
        if self.validity.is_materialized() {
            let bits = self.validity.padded(self.len());
            self.policy.zip_into(&self.data, &bits, &mut data, move |x, valid| {
                if valid { f(x) } else { U::default() }
            });
        } else {
            self.policy.map_into(&self.data, &mut data, f);
        }
        Series {
            data,
            validity: self.validity.clone(),
            policy: self.policy,
        }
    }

    /// Combine with `other` position by position in place.
    ///
    /// A position null on either side is null afterwards.
    pub fn transform_with<F>(&mut self, other: &Series<T>, f: F) -> Result<&mut Self, ColumnError>
    where
        F: Fn(T, T) -> T + Send + Sync,
    {
        ensure_same_len(self.len(), other.len())?;
        let len = self.len();
        self.validity.and_assign(&other.validity, len, self.policy);
        if self.validity.is_materialized() {
            let rhs = with_validity(&other.data, &self.validity);
            self.policy.zip_in_place(&mut self.data, &rhs, move |a, (b, valid)| {
                if valid { f(a, b) } else { T::default() }
            });
        } else {
            self.policy.zip_in_place(&mut self.data, &other.data, f);
        }
        Ok(self)
    }

    /// New series of `f(self[i], other[i])`, using this series' policy.
    pub fn zip_map<R, U, F>(&self, other: &Series<R>, f: F) -> Result<Series<U>, ColumnError>
    where
        R: Element,
        U: Element,
        F: Fn(T, R) -> U + Send + Sync,
    {
        ensure_same_len(self.len(), other.len())?;
        let validity = self
            .validity
            .and_mask(&other.validity, self.len(), self.policy);
        let mut data = vec![U::default(); self.len()];
        if validity.is_materialized() {
            let rhs = with_validity(&other.data, &validity);
            self.policy.zip_into(&self.data, &rhs, &mut data, move |a, (b, valid)| {
                if valid { f(a, b) } else { U::default() }
            });
        } else {
            self.policy.zip_into(&self.data, &other.data, &mut data, f);
        }
        Ok(Series {
            data,
            validity,
            policy: self.policy,
        })
    }

    /// Run an in-place edit on an owned series and hand it back.
    ///
    /// ```
    /// use cs_frame::Series;
    ///
    /// let s = Series::new(vec![1.0_f64, 4.0, 9.0]).modify(|s| {
    ///     s.sqrt().add_scalar(1.0);
    /// });
    /// assert_eq!(s.as_slice(), &[2.0, 3.0, 4.0]);
    /// ```
    #[must_use]
    pub fn modify(mut self, edit: impl FnOnce(&mut Self)) -> Self {
        edit(&mut self);
        self
    }

    pub fn exp(&mut self) -> &mut Self {
        self.transform(T::exp)
    }

    /// Natural logarithm.
    pub fn log(&mut self) -> &mut Self {
        self.transform(T::ln)
    }

    pub fn sqrt(&mut self) -> &mut Self {
        self.transform(T::sqrt)
    }

    pub fn abs(&mut self) -> &mut Self {
        self.transform(T::abs)
    }

    pub fn signum(&mut self) -> &mut Self {
        self.transform(T::signum)
    }

    pub fn add_scalar(&mut self, value: T) -> &mut Self {
        self.transform(move |x| x.wrapping_add(value))
    }

    pub fn sub_scalar(&mut self, value: T) -> &mut Self {
        self.transform(move |x| x.wrapping_sub(value))
    }

    /// `value - x` for every element.
    pub fn rsub_scalar(&mut self, value: T) -> &mut Self {
        self.transform(move |x| value.wrapping_sub(x))
    }

    pub fn mul_scalar(&mut self, value: T) -> &mut Self {
        self.transform(move |x| x.wrapping_mul(value))
    }

    pub fn div_scalar(&mut self, value: T) -> &mut Self {
        self.transform(move |x| x.wrapping_div(value))
    }

    /// `value / x` for every element.
    pub fn rdiv_scalar(&mut self, value: T) -> &mut Self {
        self.transform(move |x| value.wrapping_div(x))
    }

    pub fn pow_scalar(&mut self, exponent: T) -> &mut Self {
        self.transform(move |x| x.pow(exponent))
    }

    pub fn min_scalar(&mut self, value: T) -> &mut Self {
        self.transform(move |x| x.min_of(value))
    }

    pub fn max_scalar(&mut self, value: T) -> &mut Self {
        self.transform(move |x| x.max_of(value))
    }

    pub fn add_series(&mut self, other: &Series<T>) -> Result<&mut Self, ColumnError> {
        self.transform_with(other, T::wrapping_add)
    }

    pub fn sub_series(&mut self, other: &Series<T>) -> Result<&mut Self, ColumnError> {
        self.transform_with(other, T::wrapping_sub)
    }

    pub fn rsub_series(&mut self, other: &Series<T>) -> Result<&mut Self, ColumnError> {
        self.transform_with(other, |a, b| b.wrapping_sub(a))
    }

    pub fn mul_series(&mut self, other: &Series<T>) -> Result<&mut Self, ColumnError> {
        self.transform_with(other, T::wrapping_mul)
    }

    pub fn div_series(&mut self, other: &Series<T>) -> Result<&mut Self, ColumnError> {
        self.transform_with(other, T::wrapping_div)
    }

    pub fn rdiv_series(&mut self, other: &Series<T>) -> Result<&mut Self, ColumnError> {
        self.transform_with(other, |a, b| b.wrapping_div(a))
    }

    pub fn pow_series(&mut self, other: &Series<T>) -> Result<&mut Self, ColumnError> {
        self.transform_with(other, T::pow)
    }

    pub fn min_series(&mut self, other: &Series<T>) -> Result<&mut Self, ColumnError> {
        self.transform_with(other, T::min_of)
    }

    pub fn max_series(&mut self, other: &Series<T>) -> Result<&mut Self, ColumnError> {
        self.transform_with(other, T::max_of)
    }

    /// Sum of the valid positions, `None` when there are none.
    #[must_use]
    pub fn sum(&self) -> Option<T> {
        if self.valid_count() == 0 {
            return None;
        }
        Some(masked_sum(&self.data, &self.validity, self.policy))
    }

    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        let count = self.valid_count();
        if count == 0 {
            return None;
        }
        let total = masked_sum(&self.data, &self.validity, self.policy);
        Some(total.to_f64_lossy() / count as f64)
    }

    /// Population variance of the valid positions.
    #[must_use]
    pub fn variance(&self) -> Option<f64> {
        let count = self.valid_count();
        let mean = self.mean()?;
        let sq_dev = masked_sum_sq_dev(&self.data, &self.validity, mean, self.policy);
        Some(sq_dev / count as f64)
    }

    #[must_use]
    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Smallest valid element.
    #[must_use]
    pub fn min(&self) -> Option<T> {
        masked_min(&self.data, &self.validity, self.policy)
    }

    /// Largest valid element.
    #[must_use]
    pub fn max(&self) -> Option<T> {
        masked_max(&self.data, &self.validity, self.policy)
    }

    /// Inner product over positions valid in both series.
    pub fn dot(&self, other: &Series<T>) -> Result<T, ColumnError> {
        masked_dot(
            &self.data,
            &self.validity,
            &other.data,
            &other.validity,
            self.policy,
        )
    }
}

/// Pairs each value with its flag in `mask`.
fn with_validity<T: Copy>(data: &[T], mask: &ValidityMask) -> Vec<(T, bool)> {
    data.iter()
        .copied()
        .zip(mask.padded(data.len()))
        .collect()
}

/// Wire form of a [`Series`], checked before it becomes one.
#[derive(Deserialize)]
struct SeriesSnapshot<T> {
    data: Vec<T>,
    validity: ValidityMask,
    policy: ExecPolicy,
}

impl<T: Element> TryFrom<SeriesSnapshot<T>> for Series<T> {
    type Error = ColumnError;

    fn try_from(snapshot: SeriesSnapshot<T>) -> Result<Self, Self::Error> {
        let SeriesSnapshot {
            data,
            validity,
            policy,
        } = snapshot;
        if validity.explicit_len() > data.len() {
            return Err(ColumnError::MaskOverrun {
                mask_len: validity.explicit_len(),
                data_len: data.len(),
            });
        }
        Ok(Self {
            data,
            validity,
            policy,
        })
    }
}

// Values under a null are not observable and do not take part.
impl<T: Element> PartialEq for Series<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.validity.semantic_eq(&other.validity, self.len())
            && (0..self.len())
                .all(|idx| self.is_null(idx) || self.data[idx] == other.data[idx])
    }
}

impl<T: Element> From<Vec<T>> for Series<T> {
    fn from(data: Vec<T>) -> Self {
        Self::new(data)
    }
}

impl<T: Element> FromIterator<T> for Series<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T> Index<usize> for Series<T> {
    type Output = T;

    fn index(&self, idx: usize) -> &T {
        &self.data[idx]
    }
}

impl<'a, T> IntoIterator for &'a Series<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}
