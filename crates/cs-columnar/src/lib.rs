#![forbid(unsafe_code)]

use cs_runtime::{ExecPolicy, Execution};
use cs_types::Element;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("validity mask holds {mask_len} flags for {data_len} values")]
    MaskOverrun { mask_len: usize, data_len: usize },
}

pub fn ensure_same_len(left: usize, right: usize) -> Result<(), ColumnError> {
    if left == right {
        Ok(())
    } else {
        Err(ColumnError::LengthMismatch { left, right })
    }
}

/// Per-position validity flags for a buffer of some length `len`.
///
/// The mask is lazy: it may hold fewer flags than the buffer it describes,
/// and every position at or past `explicit_len()` is valid. A freshly built
/// mask holds no flags at all. [`ValidityMask::is_valid`] is the only place
/// that rule is applied; everything else reads through it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn new() -> Self {
        Self { bits: Vec::new() }
    }

    #[must_use]
    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self { bits }
    }

    #[must_use]
    pub fn all_invalid(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    /// Number of explicitly stored flags.
    #[must_use]
    pub fn explicit_len(&self) -> usize {
        self.bits.len()
    }

    #[must_use]
    pub fn is_materialized(&self) -> bool {
        !self.bits.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self, idx: usize) -> bool {
        self.bits.get(idx).copied().unwrap_or(true)
    }

    /// Mark `idx` invalid in a buffer of length `len`.
    ///
    /// Pads the mask with `true` up to `len` first. Returns `false` and
    /// leaves the mask untouched when `idx` is outside the buffer.
    pub fn set_null(&mut self, idx: usize, len: usize) -> bool {
        if idx >= len {
            return false;
        }
        if self.bits.len() < len {
            self.bits.resize(len, true);
        }
        self.bits[idx] = false;
        true
    }

    /// Clear an explicit null. Positions without a stored flag are already valid.
    pub fn set_valid(&mut self, idx: usize) {
        if let Some(bit) = self.bits.get_mut(idx) {
            *bit = true;
        }
    }

    /// Flags for `0..len`, with implicit positions reported as valid.
    pub fn bits(&self, len: usize) -> impl Iterator<Item = bool> + '_ {
        (0..len).map(|idx| self.is_valid(idx))
    }

    /// Flags for `0..len` as an owned buffer, implicit positions filled in.
    #[must_use]
    pub fn padded(&self, len: usize) -> Vec<bool> {
        let mut bits = self.bits.clone();
        bits.resize(len, true);
        bits
    }

    /// Positionwise AND over `0..len`, dispatched through `policy`.
    ///
    /// Two lazy masks stay lazy.
    #[must_use]
    pub fn and_mask(&self, other: &Self, len: usize, policy: ExecPolicy) -> Self {
        if !self.is_materialized() && !other.is_materialized() {
            return Self::new();
        }
        let left = self.padded(len);
        let right = other.padded(len);
        let mut bits = vec![true; len];
        policy.zip_into(&left, &right, &mut bits, |a, b| a && b);
        Self { bits }
    }

    /// AND `other` into this mask in place over `0..len`.
    pub fn and_assign(&mut self, other: &Self, len: usize, policy: ExecPolicy) {
        if !other.is_materialized() {
            return;
        }
        if self.bits.len() < len {
            self.bits.resize(len, true);
        }
        let right = other.padded(len);
        policy.zip_in_place(&mut self.bits[..len], &right, |a, b| a && b);
    }

    /// Number of valid positions in a buffer of length `len`.
    #[must_use]
    pub fn count_valid(&self, len: usize, policy: ExecPolicy) -> usize {
        let explicit = self.bits.len().min(len);
        let bits = &self.bits;
        let stored_valid =
            policy.map_reduce(explicit, 0_usize, |idx| usize::from(bits[idx]), |a, b| a + b);
        stored_valid + (len - explicit)
    }

    #[must_use]
    pub fn count_null(&self, len: usize, policy: ExecPolicy) -> usize {
        len - self.count_valid(len, policy)
    }

    /// Compare the flags two masks report over `0..len`, ignoring how many of
    /// them are stored explicitly.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self, len: usize) -> bool {
        self.bits(len).eq(other.bits(len))
    }
}

/// Sum of the valid positions of `data`. Null positions contribute zero.
pub fn masked_sum<T: Element>(data: &[T], mask: &ValidityMask, policy: ExecPolicy) -> T {
    policy.map_reduce(
        data.len(),
        T::zero(),
        |idx| {
            if mask.is_valid(idx) {
                data[idx]
            } else {
                T::zero()
            }
        },
        T::wrapping_add,
    )
}

/// Sum of squared deviations from `mean` over the valid positions, in `f64`.
pub fn masked_sum_sq_dev<T: Element>(
    data: &[T],
    mask: &ValidityMask,
    mean: f64,
    policy: ExecPolicy,
) -> f64 {
    policy.map_reduce(
        data.len(),
        0.0_f64,
        |idx| {
            if mask.is_valid(idx) {
                let dev = data[idx].to_f64_lossy() - mean;
                dev * dev
            } else {
                0.0
            }
        },
        |a, b| a + b,
    )
}

fn pick<T: Element>(left: Option<T>, right: Option<T>, choose: fn(T, T) -> T) -> Option<T> {
    match (left, right) {
        (Some(a), Some(b)) => Some(choose(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn masked_extreme<T: Element>(
    data: &[T],
    mask: &ValidityMask,
    policy: ExecPolicy,
    choose: fn(T, T) -> T,
) -> Option<T> {
    policy.map_reduce(
        data.len(),
        None,
        |idx| mask.is_valid(idx).then(|| data[idx]),
        |a, b| pick(a, b, choose),
    )
}

/// Smallest valid element; `None` when no position is valid.
pub fn masked_min<T: Element>(data: &[T], mask: &ValidityMask, policy: ExecPolicy) -> Option<T> {
    masked_extreme(data, mask, policy, T::min_of)
}

/// Largest valid element; `None` when no position is valid.
pub fn masked_max<T: Element>(data: &[T], mask: &ValidityMask, policy: ExecPolicy) -> Option<T> {
    masked_extreme(data, mask, policy, T::max_of)
}

/// Inner product over positions valid in both operands.
pub fn masked_dot<T: Element>(
    left: &[T],
    left_mask: &ValidityMask,
    right: &[T],
    right_mask: &ValidityMask,
    policy: ExecPolicy,
) -> Result<T, ColumnError> {
    ensure_same_len(left.len(), right.len())?;
    Ok(policy.map_reduce(
        left.len(),
        T::zero(),
        |idx| {
            if left_mask.is_valid(idx) && right_mask.is_valid(idx) {
                left[idx].wrapping_mul(right[idx])
            } else {
                T::zero()
            }
        },
        T::wrapping_add,
    ))
}

#[cfg(test)]
mod tests {
    use cs_runtime::ExecPolicy;

    use super::{
        ColumnError, ValidityMask, ensure_same_len, masked_dot, masked_max, masked_min,
        masked_sum, masked_sum_sq_dev,
    };

    fn mask_with_nulls(len: usize, nulls: &[usize]) -> ValidityMask {
        let mut mask = ValidityMask::new();
        for &idx in nulls {
            assert!(mask.set_null(idx, len), "null at {idx} should apply");
        }
        mask
    }

    #[test]
    fn fresh_mask_reports_every_position_valid() {
        let mask = ValidityMask::new();
        assert!(!mask.is_materialized());
        assert!(mask.is_valid(0));
        assert!(mask.is_valid(1_000));
        assert_eq!(mask.count_valid(4, ExecPolicy::Seq), 4);
    }

    #[test]
    fn set_null_pads_to_buffer_length() {
        let mut mask = ValidityMask::new();
        assert!(mask.set_null(1, 5));
        assert_eq!(mask.explicit_len(), 5);
        assert_eq!(mask.bits(5).collect::<Vec<_>>(), vec![true, false, true, true, true]);
    }

    #[test]
    fn set_null_outside_buffer_is_ignored() {
        let mut mask = ValidityMask::new();
        assert!(!mask.set_null(3, 3));
        assert!(!mask.set_null(0, 0));
        assert_eq!(mask.explicit_len(), 0);
    }

    #[test]
    fn set_valid_clears_explicit_null() {
        let mut mask = mask_with_nulls(3, &[2]);
        mask.set_valid(2);
        mask.set_valid(10);
        assert!(mask.is_valid(2));
        assert_eq!(mask.count_null(3, ExecPolicy::Unseq), 0);
    }

    #[test]
    fn counts_partition_length_for_every_policy() {
        let mask = mask_with_nulls(100, &[0, 17, 63, 64, 99]);
        for policy in ExecPolicy::ALL {
            assert_eq!(mask.count_valid(100, policy), 95, "{policy}");
            assert_eq!(mask.count_null(100, policy), 5, "{policy}");
        }
    }

    #[test]
    fn and_mask_keeps_lazy_masks_lazy() {
        let out = ValidityMask::new().and_mask(&ValidityMask::new(), 10, ExecPolicy::Par);
        assert!(!out.is_materialized());
    }

    #[test]
    fn and_mask_nulls_union_of_positions() {
        let left = mask_with_nulls(4, &[1]);
        let right = mask_with_nulls(4, &[3]);
        for policy in ExecPolicy::ALL {
            let out = left.and_mask(&right, 4, policy);
            assert_eq!(out.bits(4).collect::<Vec<_>>(), vec![true, false, true, false]);
        }
    }

    #[test]
    fn and_assign_matches_and_mask() {
        let right = mask_with_nulls(6, &[0, 5]);
        let mut left = mask_with_nulls(6, &[2]);
        let expected = left.and_mask(&right, 6, ExecPolicy::Seq);
        left.and_assign(&right, 6, ExecPolicy::ParUnseq);
        assert!(left.semantic_eq(&expected, 6));
    }

    #[test]
    fn semantic_eq_ignores_storage_length() {
        let lazy = ValidityMask::new();
        let explicit = ValidityMask::from_bits(vec![true; 3]);
        assert!(lazy.semantic_eq(&explicit, 3));
        assert!(!lazy.semantic_eq(&ValidityMask::all_invalid(3), 3));
    }

    #[test]
    fn masked_sum_skips_nulls() {
        let data = [1.0_f64, 2.0, 3.0, 4.0, 5.0];
        let mask = mask_with_nulls(5, &[1, 3]);
        for policy in ExecPolicy::ALL {
            assert_eq!(masked_sum(&data, &mask, policy), 9.0);
        }
    }

    #[test]
    fn integer_sum_and_dot_wrap_instead_of_overflowing() {
        let data = [i32::MAX, 1, 5];
        let mask = mask_with_nulls(3, &[2]);
        for policy in ExecPolicy::ALL {
            assert_eq!(masked_sum(&data, &mask, policy), i32::MIN);
        }
        let wide = [i64::MAX, 2];
        let ones = [2_i64, 1];
        let empty = ValidityMask::new();
        let out = masked_dot(&wide, &empty, &ones, &empty, ExecPolicy::Seq).expect("equal lengths");
        assert_eq!(out, 0);
    }

    #[test]
    fn padded_fills_implicit_tail() {
        let mask = mask_with_nulls(2, &[0]);
        assert_eq!(mask.padded(4), vec![false, true, true, true]);
        assert_eq!(ValidityMask::new().padded(2), vec![true, true]);
    }

    #[test]
    fn masked_sum_sq_dev_uses_valid_positions_only() {
        let data = [1.0_f64, 100.0, 3.0];
        let mask = mask_with_nulls(3, &[1]);
        let total = masked_sum_sq_dev(&data, &mask, 2.0, ExecPolicy::Seq);
        assert!((total - 2.0).abs() < 1e-12);
    }

    #[test]
    fn masked_extremes_skip_nulls() {
        let data = [-50_i64, 4, 9, 120];
        let mask = mask_with_nulls(4, &[0, 3]);
        for policy in ExecPolicy::ALL {
            assert_eq!(masked_min(&data, &mask, policy), Some(4));
            assert_eq!(masked_max(&data, &mask, policy), Some(9));
        }
        let all_null = ValidityMask::all_invalid(4);
        assert_eq!(masked_min(&data, &all_null, ExecPolicy::Seq), None);
        assert_eq!(masked_max::<i64>(&[], &ValidityMask::new(), ExecPolicy::Seq), None);
    }

    #[test]
    fn masked_dot_requires_equal_lengths() {
        let err = masked_dot(
            &[1_i32, 2],
            &ValidityMask::new(),
            &[1_i32],
            &ValidityMask::new(),
            ExecPolicy::Seq,
        )
        .expect_err("length mismatch must be rejected");
        assert_eq!(err, ColumnError::LengthMismatch { left: 2, right: 1 });
    }

    #[test]
    fn masked_dot_of_empty_is_zero() {
        let empty = ValidityMask::new();
        let out = masked_dot::<f64>(&[], &empty, &[], &empty, ExecPolicy::ParUnseq).expect("empty dot");
        assert_eq!(out, 0.0);
    }

    #[test]
    fn masked_dot_skips_positions_null_on_either_side() {
        let left = [1_i32, 2, 3];
        let right = [4_i32, 5, 6];
        let left_mask = mask_with_nulls(3, &[0]);
        let right_mask = mask_with_nulls(3, &[2]);
        let out = masked_dot(&left, &left_mask, &right, &right_mask, ExecPolicy::Par).expect("dot");
        assert_eq!(out, 10);
    }

    #[test]
    fn ensure_same_len_reports_both_sides() {
        assert!(ensure_same_len(3, 3).is_ok());
        assert_eq!(
            ensure_same_len(3, 4).expect_err("mismatch").to_string(),
            "column length mismatch: left=3, right=4"
        );
    }
}
