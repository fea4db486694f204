#![forbid(unsafe_code)]

//! Execution strategies for bulk loops over column buffers.
//!
//! Every elementwise transform and reduction in the workspace runs through an
//! [`Execution`] strategy chosen by an [`ExecPolicy`] value. The policy is a
//! plain runtime enum (serializable, parseable from configuration); the
//! strategies are zero-sized types so each loop is monomorphized for the
//! chosen mode. [`with_policy!`] bridges the two.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the lane-chunked loops used by the unsequenced strategies.
pub const LANES: usize = 8;

/// Elements per rayon task for the parallel-unsequenced strategy.
pub const BLOCK_LEN: usize = 16 * 1024;

/// Below this length rayon stops splitting per-element parallel loops.
pub const MIN_PARALLEL_LEN: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ExecPolicy {
    Seq = 0,
    Par = 1,
    Unseq = 2,
    #[default]
    ParUnseq = 3,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("unknown execution policy: {0}")]
    UnknownPolicy(String),
}

/// Fatal path for a policy discriminant that cannot exist.
///
/// Reaching this means the value was corrupted in memory or by a caller
/// bypassing the typed API; there is nothing sensible to fall back to.
#[cold]
#[track_caller]
pub fn unreachable_policy(code: u8) -> ! {
    log::error!("corrupted execution policy discriminant {code}");
    panic!("unknown execution policy discriminant {code}");
}

impl ExecPolicy {
    pub const ALL: [Self; 4] = [Self::Seq, Self::Par, Self::Unseq, Self::ParUnseq];

    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a raw discriminant that is trusted to be valid.
    ///
    /// # Panics
    ///
    /// Panics (via [`unreachable_policy`]) for any code outside `0..=3`.
    #[must_use]
    #[track_caller]
    pub fn from_code(code: u8) -> Self {
        match Self::try_from(code) {
            Ok(policy) => policy,
            Err(_) => unreachable_policy(code),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seq => "seq",
            Self::Par => "par",
            Self::Unseq => "unseq",
            Self::ParUnseq => "par_unseq",
        }
    }

    #[must_use]
    pub fn is_parallel(self) -> bool {
        matches!(self, Self::Par | Self::ParUnseq)
    }
}

impl TryFrom<u8> for ExecPolicy {
    type Error = RuntimeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Seq),
            1 => Ok(Self::Par),
            2 => Ok(Self::Unseq),
            3 => Ok(Self::ParUnseq),
            other => Err(RuntimeError::UnknownPolicy(other.to_string())),
        }
    }
}

impl FromStr for ExecPolicy {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seq" | "sequential" => Ok(Self::Seq),
            "par" | "parallel" => Ok(Self::Par),
            "unseq" | "vectorized" => Ok(Self::Unseq),
            "par_unseq" | "parallel_vectorized" => Ok(Self::ParUnseq),
            _ => Err(RuntimeError::UnknownPolicy(s.to_owned())),
        }
    }
}

impl fmt::Display for ExecPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run `$body` with `$exec` bound to the concrete strategy for `$policy`.
///
/// ```
/// use cs_runtime::{ExecPolicy, Execution, with_policy};
///
/// let mut data = vec![1.0_f64, 2.0, 3.0];
/// with_policy!(ExecPolicy::Unseq, exec => exec.map_in_place(&mut data, |x| x * 2.0));
/// assert_eq!(data, vec![2.0, 4.0, 6.0]);
/// ```
#[macro_export]
macro_rules! with_policy {
    ($policy:expr, $exec:ident => $body:expr) => {
        match $policy {
            $crate::ExecPolicy::Seq => {
                let $exec = $crate::Sequenced;
                $body
            }
            $crate::ExecPolicy::Par => {
                let $exec = $crate::Parallel;
                $body
            }
            $crate::ExecPolicy::Unseq => {
                let $exec = $crate::Unsequenced;
                $body
            }
            $crate::ExecPolicy::ParUnseq => {
                let $exec = $crate::ParallelUnsequenced;
                $body
            }
        }
    };
}

/// A concrete execution mode for bulk loops.
///
/// Output positions always correspond 1:1 to input positions. Reductions
/// assume `reduce` is associative and commutative with `identity` as its
/// neutral element; accumulation order is unspecified.
pub trait Execution: Copy + Send + Sync {
    fn policy(self) -> ExecPolicy;

    fn map_in_place<T, F>(self, data: &mut [T], f: F)
    where
        T: Copy + Send + Sync,
        F: Fn(T) -> T + Send + Sync;

    fn map_into<S, D, F>(self, src: &[S], dst: &mut [D], f: F)
    where
        S: Copy + Sync,
        D: Send,
        F: Fn(S) -> D + Send + Sync;

    fn zip_in_place<T, R, F>(self, data: &mut [T], other: &[R], f: F)
    where
        T: Copy + Send + Sync,
        R: Copy + Sync,
        F: Fn(T, R) -> T + Send + Sync;

    fn zip_into<A, B, D, F>(self, left: &[A], right: &[B], dst: &mut [D], f: F)
    where
        A: Copy + Sync,
        B: Copy + Sync,
        D: Send,
        F: Fn(A, B) -> D + Send + Sync;

    /// Reduce `map(i)` for every `i` in `0..len`.
    fn map_reduce<A, M, R>(self, len: usize, identity: A, map: M, reduce: R) -> A
    where
        A: Copy + Send + Sync,
        M: Fn(usize) -> A + Send + Sync,
        R: Fn(A, A) -> A + Send + Sync;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sequenced;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Parallel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Unsequenced;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParallelUnsequenced;

impl Execution for Sequenced {
    fn policy(self) -> ExecPolicy {
        ExecPolicy::Seq
    }

    fn map_in_place<T, F>(self, data: &mut [T], f: F)
    where
        T: Copy + Send + Sync,
        F: Fn(T) -> T + Send + Sync,
    {
        for value in data.iter_mut() {
            *value = f(*value);
        }
    }

    fn map_into<S, D, F>(self, src: &[S], dst: &mut [D], f: F)
    where
        S: Copy + Sync,
        D: Send,
        F: Fn(S) -> D + Send + Sync,
    {
        debug_assert_eq!(src.len(), dst.len());
        for (out, &value) in dst.iter_mut().zip(src) {
            *out = f(value);
        }
    }

    fn zip_in_place<T, R, F>(self, data: &mut [T], other: &[R], f: F)
    where
        T: Copy + Send + Sync,
        R: Copy + Sync,
        F: Fn(T, R) -> T + Send + Sync,
    {
        debug_assert_eq!(data.len(), other.len());
        for (value, &rhs) in data.iter_mut().zip(other) {
            *value = f(*value, rhs);
        }
    }

    fn zip_into<A, B, D, F>(self, left: &[A], right: &[B], dst: &mut [D], f: F)
    where
        A: Copy + Sync,
        B: Copy + Sync,
        D: Send,
        F: Fn(A, B) -> D + Send + Sync,
    {
        debug_assert_eq!(left.len(), right.len());
        debug_assert_eq!(left.len(), dst.len());
        for ((out, &lhs), &rhs) in dst.iter_mut().zip(left).zip(right) {
            *out = f(lhs, rhs);
        }
    }

    fn map_reduce<A, M, R>(self, len: usize, identity: A, map: M, reduce: R) -> A
    where
        A: Copy + Send + Sync,
        M: Fn(usize) -> A + Send + Sync,
        R: Fn(A, A) -> A + Send + Sync,
    {
        (0..len).fold(identity, |acc, idx| reduce(acc, map(idx)))
    }
}

impl Execution for Parallel {
    fn policy(self) -> ExecPolicy {
        ExecPolicy::Par
    }

    fn map_in_place<T, F>(self, data: &mut [T], f: F)
    where
        T: Copy + Send + Sync,
        F: Fn(T) -> T + Send + Sync,
    {
        data.par_iter_mut()
            .with_min_len(MIN_PARALLEL_LEN)
            .for_each(|value| *value = f(*value));
    }

    fn map_into<S, D, F>(self, src: &[S], dst: &mut [D], f: F)
    where
        S: Copy + Sync,
        D: Send,
        F: Fn(S) -> D + Send + Sync,
    {
        debug_assert_eq!(src.len(), dst.len());
        dst.par_iter_mut()
            .zip(src.par_iter())
            .with_min_len(MIN_PARALLEL_LEN)
            .for_each(|(out, &value)| *out = f(value));
    }

    fn zip_in_place<T, R, F>(self, data: &mut [T], other: &[R], f: F)
    where
        T: Copy + Send + Sync,
        R: Copy + Sync,
        F: Fn(T, R) -> T + Send + Sync,
    {
        debug_assert_eq!(data.len(), other.len());
        data.par_iter_mut()
            .zip(other.par_iter())
            .with_min_len(MIN_PARALLEL_LEN)
            .for_each(|(value, &rhs)| *value = f(*value, rhs));
    }

    fn zip_into<A, B, D, F>(self, left: &[A], right: &[B], dst: &mut [D], f: F)
    where
        A: Copy + Sync,
        B: Copy + Sync,
        D: Send,
        F: Fn(A, B) -> D + Send + Sync,
    {
        debug_assert_eq!(left.len(), right.len());
        debug_assert_eq!(left.len(), dst.len());
        dst.par_iter_mut()
            .zip(left.par_iter().zip(right.par_iter()))
            .with_min_len(MIN_PARALLEL_LEN)
            .for_each(|(out, (&lhs, &rhs))| *out = f(lhs, rhs));
    }

    fn map_reduce<A, M, R>(self, len: usize, identity: A, map: M, reduce: R) -> A
    where
        A: Copy + Send + Sync,
        M: Fn(usize) -> A + Send + Sync,
        R: Fn(A, A) -> A + Send + Sync,
    {
        (0..len)
            .into_par_iter()
            .with_min_len(MIN_PARALLEL_LEN)
            .map(map)
            .reduce(|| identity, reduce)
    }
}

/// Lane-chunked fold over `range`: `LANES` independent accumulators, merged
/// at the end, then the tail.
fn lane_reduce<A, M, R>(range: Range<usize>, identity: A, map: &M, reduce: &R) -> A
where
    A: Copy,
    M: Fn(usize) -> A,
    R: Fn(A, A) -> A,
{
    let mut lanes = [identity; LANES];
    let full_end = range.start + (range.len() / LANES) * LANES;
    let mut base = range.start;
    while base < full_end {
        for (lane, acc) in lanes.iter_mut().enumerate() {
            *acc = reduce(*acc, map(base + lane));
        }
        base += LANES;
    }
    let merged = lanes.into_iter().fold(identity, reduce);
    (full_end..range.end).fold(merged, |acc, idx| reduce(acc, map(idx)))
}

impl Execution for Unsequenced {
    fn policy(self) -> ExecPolicy {
        ExecPolicy::Unseq
    }

    fn map_in_place<T, F>(self, data: &mut [T], f: F)
    where
        T: Copy + Send + Sync,
        F: Fn(T) -> T + Send + Sync,
    {
        let mut chunks = data.chunks_exact_mut(LANES);
        for chunk in &mut chunks {
            for value in chunk.iter_mut() {
                *value = f(*value);
            }
        }
        for value in chunks.into_remainder() {
            *value = f(*value);
        }
    }

    fn map_into<S, D, F>(self, src: &[S], dst: &mut [D], f: F)
    where
        S: Copy + Sync,
        D: Send,
        F: Fn(S) -> D + Send + Sync,
    {
        debug_assert_eq!(src.len(), dst.len());
        let mut out_chunks = dst.chunks_exact_mut(LANES);
        let mut in_chunks = src.chunks_exact(LANES);
        for (out, input) in (&mut out_chunks).zip(&mut in_chunks) {
            for (slot, &value) in out.iter_mut().zip(input) {
                *slot = f(value);
            }
        }
        for (slot, &value) in out_chunks.into_remainder().iter_mut().zip(in_chunks.remainder()) {
            *slot = f(value);
        }
    }

    fn zip_in_place<T, R, F>(self, data: &mut [T], other: &[R], f: F)
    where
        T: Copy + Send + Sync,
        R: Copy + Sync,
        F: Fn(T, R) -> T + Send + Sync,
    {
        debug_assert_eq!(data.len(), other.len());
        let mut data_chunks = data.chunks_exact_mut(LANES);
        let mut other_chunks = other.chunks_exact(LANES);
        for (chunk, rhs) in (&mut data_chunks).zip(&mut other_chunks) {
            for (value, &r) in chunk.iter_mut().zip(rhs) {
                *value = f(*value, r);
            }
        }
        for (value, &r) in data_chunks
            .into_remainder()
            .iter_mut()
            .zip(other_chunks.remainder())
        {
            *value = f(*value, r);
        }
    }

    fn zip_into<A, B, D, F>(self, left: &[A], right: &[B], dst: &mut [D], f: F)
    where
        A: Copy + Sync,
        B: Copy + Sync,
        D: Send,
        F: Fn(A, B) -> D + Send + Sync,
    {
        debug_assert_eq!(left.len(), right.len());
        debug_assert_eq!(left.len(), dst.len());
        let mut out_chunks = dst.chunks_exact_mut(LANES);
        let mut left_chunks = left.chunks_exact(LANES);
        let mut right_chunks = right.chunks_exact(LANES);
        for ((out, lhs), rhs) in (&mut out_chunks)
            .zip(&mut left_chunks)
            .zip(&mut right_chunks)
        {
            for ((slot, &l), &r) in out.iter_mut().zip(lhs).zip(rhs) {
                *slot = f(l, r);
            }
        }
        for ((slot, &l), &r) in out_chunks
            .into_remainder()
            .iter_mut()
            .zip(left_chunks.remainder())
            .zip(right_chunks.remainder())
        {
            *slot = f(l, r);
        }
    }

    fn map_reduce<A, M, R>(self, len: usize, identity: A, map: M, reduce: R) -> A
    where
        A: Copy + Send + Sync,
        M: Fn(usize) -> A + Send + Sync,
        R: Fn(A, A) -> A + Send + Sync,
    {
        lane_reduce(0..len, identity, &map, &reduce)
    }
}

impl Execution for ParallelUnsequenced {
    fn policy(self) -> ExecPolicy {
        ExecPolicy::ParUnseq
    }

    fn map_in_place<T, F>(self, data: &mut [T], f: F)
    where
        T: Copy + Send + Sync,
        F: Fn(T) -> T + Send + Sync,
    {
        data.par_chunks_mut(BLOCK_LEN)
            .for_each(|block| Unsequenced.map_in_place(block, &f));
    }

    fn map_into<S, D, F>(self, src: &[S], dst: &mut [D], f: F)
    where
        S: Copy + Sync,
        D: Send,
        F: Fn(S) -> D + Send + Sync,
    {
        debug_assert_eq!(src.len(), dst.len());
        dst.par_chunks_mut(BLOCK_LEN)
            .zip(src.par_chunks(BLOCK_LEN))
            .for_each(|(out, input)| Unsequenced.map_into(input, out, &f));
    }

    fn zip_in_place<T, R, F>(self, data: &mut [T], other: &[R], f: F)
    where
        T: Copy + Send + Sync,
        R: Copy + Sync,
        F: Fn(T, R) -> T + Send + Sync,
    {
        debug_assert_eq!(data.len(), other.len());
        data.par_chunks_mut(BLOCK_LEN)
            .zip(other.par_chunks(BLOCK_LEN))
            .for_each(|(block, rhs)| Unsequenced.zip_in_place(block, rhs, &f));
    }

    fn zip_into<A, B, D, F>(self, left: &[A], right: &[B], dst: &mut [D], f: F)
    where
        A: Copy + Sync,
        B: Copy + Sync,
        D: Send,
        F: Fn(A, B) -> D + Send + Sync,
    {
        debug_assert_eq!(left.len(), right.len());
        debug_assert_eq!(left.len(), dst.len());
        dst.par_chunks_mut(BLOCK_LEN)
            .zip(left.par_chunks(BLOCK_LEN).zip(right.par_chunks(BLOCK_LEN)))
            .for_each(|(out, (lhs, rhs))| Unsequenced.zip_into(lhs, rhs, out, &f));
    }

    fn map_reduce<A, M, R>(self, len: usize, identity: A, map: M, reduce: R) -> A
    where
        A: Copy + Send + Sync,
        M: Fn(usize) -> A + Send + Sync,
        R: Fn(A, A) -> A + Send + Sync,
    {
        let blocks = len.div_ceil(BLOCK_LEN);
        (0..blocks)
            .into_par_iter()
            .map(|block| {
                let start = block * BLOCK_LEN;
                let end = (start + BLOCK_LEN).min(len);
                lane_reduce(start..end, identity, &map, &reduce)
            })
            .reduce(|| identity, &reduce)
    }
}

// The policy value itself dispatches to the matching strategy, so callers
// holding only an `ExecPolicy` can use the same API.
impl Execution for ExecPolicy {
    fn policy(self) -> ExecPolicy {
        self
    }

    fn map_in_place<T, F>(self, data: &mut [T], f: F)
    where
        T: Copy + Send + Sync,
        F: Fn(T) -> T + Send + Sync,
    {
        with_policy!(self, exec => exec.map_in_place(data, f));
    }

    fn map_into<S, D, F>(self, src: &[S], dst: &mut [D], f: F)
    where
        S: Copy + Sync,
        D: Send,
        F: Fn(S) -> D + Send + Sync,
    {
        with_policy!(self, exec => exec.map_into(src, dst, f));
    }

    fn zip_in_place<T, R, F>(self, data: &mut [T], other: &[R], f: F)
    where
        T: Copy + Send + Sync,
        R: Copy + Sync,
        F: Fn(T, R) -> T + Send + Sync,
    {
        with_policy!(self, exec => exec.zip_in_place(data, other, f));
    }

    fn zip_into<A, B, D, F>(self, left: &[A], right: &[B], dst: &mut [D], f: F)
    where
        A: Copy + Sync,
        B: Copy + Sync,
        D: Send,
        F: Fn(A, B) -> D + Send + Sync,
    {
        with_policy!(self, exec => exec.zip_into(left, right, dst, f));
    }

    fn map_reduce<A, M, R>(self, len: usize, identity: A, map: M, reduce: R) -> A
    where
        A: Copy + Send + Sync,
        M: Fn(usize) -> A + Send + Sync,
        R: Fn(A, A) -> A + Send + Sync,
    {
        with_policy!(self, exec => exec.map_reduce(len, identity, map, reduce))
    }
}
