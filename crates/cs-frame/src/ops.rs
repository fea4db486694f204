//! Pure arithmetic between series and scalars.
//!
//! The named functions are the primary surface: they never touch their
//! operands and report length mismatches as errors. The `std::ops` impls
//! below are thin sugar over them. Mixed element types compute in
//! [`Promoted<L, R>`](cs_types::Promoted), e.g. `Series<i32> + Series<f64>`
//! yields `Series<f64>`.
//!
//! Integer results wrap on overflow. Null positions are never computed, so a
//! zero under a null divisor is harmless; a valid integer zero divisor panics.

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};

use cs_columnar::ColumnError;
use cs_types::{Element, Promote, Promoted};

use crate::Series;

macro_rules! pure_ops {
    ($($op:ident => $series_fn:ident, $scalar_fn:ident, $rev_fn:ident;)*) => {$(
        pub fn $series_fn<L, R>(
            left: &Series<L>,
            right: &Series<R>,
        ) -> Result<Series<Promoted<L, R>>, ColumnError>
        where
            L: Promote<R>,
            R: Element,
        {
            left.zip_map(right, |a, b| L::lift(a).$op(L::lift_rhs(b)))
        }

        pub fn $scalar_fn<L, R>(left: &Series<L>, value: R) -> Series<Promoted<L, R>>
        where
            L: Promote<R>,
            R: Element,
        {
            let value = L::lift_rhs(value);
            left.map(move |a| L::lift(a).$op(value))
        }

        pub fn $rev_fn<L, R>(value: L, right: &Series<R>) -> Series<Promoted<L, R>>
        where
            L: Promote<R>,
            R: Element,
        {
            let value = value.lift();
            right.map(move |b| value.$op(L::lift_rhs(b)))
        }
    )*};
}

pure_ops! {
    wrapping_add => add, add_scalar, scalar_add;
    wrapping_sub => sub, sub_scalar, scalar_sub;
    wrapping_mul => mul, mul_scalar, scalar_mul;
    wrapping_div => div, div_scalar, scalar_div;
}

macro_rules! series_operators {
    ($($trait:ident, $method:ident => $series_fn:ident;)*) => {$(
        /// # Panics
        ///
        /// Panics if the two series differ in length. Use the named
        /// function for a `Result`.
        impl<L, R> $trait<&Series<R>> for &Series<L>
        where
            L: Promote<R>,
            R: Element,
        {
            type Output = Series<Promoted<L, R>>;

            fn $method(self, rhs: &Series<R>) -> Self::Output {
                $series_fn(self, rhs).unwrap_or_else(|err| panic!("{err}"))
            }
        }
    )*};
}

series_operators! {
    Add, add => add;
    Sub, sub => sub;
    Mul, mul => mul;
    Div, div => div;
}

// One impl per scalar type keeps `&series op scalar` and `scalar op &series`
// disjoint from the series-series impls.
macro_rules! scalar_operators {
    ($($scalar:ty),*) => {$(
        scalar_operators!(@op $scalar, Add, add, add_scalar, scalar_add);
        scalar_operators!(@op $scalar, Sub, sub, sub_scalar, scalar_sub);
        scalar_operators!(@op $scalar, Mul, mul, mul_scalar, scalar_mul);
        scalar_operators!(@op $scalar, Div, div, div_scalar, scalar_div);
    )*};
    (@op $scalar:ty, $trait:ident, $method:ident, $scalar_fn:ident, $rev_fn:ident) => {
        impl<L: Promote<$scalar>> $trait<$scalar> for &Series<L> {
            type Output = Series<Promoted<L, $scalar>>;

            fn $method(self, rhs: $scalar) -> Self::Output {
                $scalar_fn(self, rhs)
            }
        }

        impl<R: Element> $trait<&Series<R>> for $scalar
        where
            $scalar: Promote<R>,
        {
            type Output = Series<Promoted<$scalar, R>>;

            fn $method(self, rhs: &Series<R>) -> Self::Output {
                $rev_fn(self, rhs)
            }
        }
    };
}

scalar_operators!(i32, i64, f32, f64);

// Owned same-type forms reuse the left buffer.
macro_rules! owned_operators {
    ($($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident => $in_place:ident, $in_place_series:ident;)*) => {$(
        impl<T: Element> $trait<T> for Series<T> {
            type Output = Series<T>;

            fn $method(mut self, rhs: T) -> Series<T> {
                self.$in_place(rhs);
                self
            }
        }

        impl<T: Element> $assign_trait<T> for Series<T> {
            fn $assign_method(&mut self, rhs: T) {
                self.$in_place(rhs);
            }
        }

        /// # Panics
        ///
        /// Panics if the two series differ in length.
        impl<T: Element> $assign_trait<&Series<T>> for Series<T> {
            fn $assign_method(&mut self, rhs: &Series<T>) {
                if let Err(err) = self.$in_place_series(rhs) {
                    panic!("{err}");
                }
            }
        }
    )*};
}

owned_operators! {
    Add, add, AddAssign, add_assign => add_scalar, add_series;
    Sub, sub, SubAssign, sub_assign => sub_scalar, sub_series;
    Mul, mul, MulAssign, mul_assign => mul_scalar, mul_series;
    Div, div, DivAssign, div_assign => div_scalar, div_series;
}

#[cfg(test)]
mod tests {
    use cs_columnar::ColumnError;
    use cs_runtime::ExecPolicy;

    use super::{add, add_scalar, div, mul_scalar, scalar_div, scalar_sub, sub};
    use crate::Series;

    #[test]
    fn series_plus_scalar_leaves_operand_untouched() {
        let source = Series::new(vec![1.0_f64, 2.0, 3.0]);
        let out = &source + 10.0_f64;
        assert_eq!(out.as_slice(), &[11.0, 12.0, 13.0]);
        assert_eq!(source.as_slice(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn scalar_on_the_left_is_not_commuted() {
        let source = Series::new(vec![1_i32, 2, 4]);
        assert_eq!(scalar_sub(10_i32, &source).as_slice(), &[9, 8, 6]);
        assert_eq!(scalar_div(8_i32, &source).as_slice(), &[8, 4, 2]);
        assert_eq!((100_i64 - &source).as_slice(), &[99, 98, 96]);
        assert_eq!((1.0_f64 / &source).as_slice(), &[1.0, 0.5, 0.25]);
    }

    #[test]
    fn mixed_types_promote() {
        let ints = Series::new(vec![1_i32, 2, 3]);
        let doubles = Series::new(vec![0.5_f64, 0.25, 0.125]);
        let out: Series<f64> = add(&ints, &doubles).expect("equal lengths");
        assert_eq!(out.as_slice(), &[1.5, 2.25, 3.125]);

        let wide: Series<i64> = add_scalar(&ints, 5_i64);
        assert_eq!(wide.as_slice(), &[6, 7, 8]);

        let floats: Series<f32> = mul_scalar(&ints, 0.5_f32);
        assert_eq!(floats.as_slice(), &[0.5, 1.0, 1.5]);

        let halves = &ints / 2.0_f64;
        assert_eq!(halves.as_slice(), &[0.5, 1.0, 1.5]);
    }

    #[test]
    fn series_operands_propagate_nulls() {
        let mut left = Series::new(vec![1.0_f64, 2.0, 3.0]);
        let mut right = Series::new(vec![10.0_f64, 20.0, 30.0]);
        left.set_null(0);
        right.set_null(2);
        let out = &left + &right;
        assert_eq!(out.to_options(), vec![None, Some(22.0), None]);
        assert_eq!(left.null_count(), 1);
        assert_eq!(right.null_count(), 1);
    }

    #[test]
    fn named_functions_report_length_mismatch() {
        let left = Series::new(vec![1_i64, 2, 3]);
        let right = Series::new(vec![1_i64]);
        assert_eq!(
            sub(&left, &right).expect_err("lengths differ"),
            ColumnError::LengthMismatch { left: 3, right: 1 }
        );
        assert!(div(&left, &right).is_err());
    }

    #[test]
    #[should_panic(expected = "column length mismatch")]
    fn series_operator_panics_on_length_mismatch() {
        let left = Series::new(vec![1_i64, 2, 3]);
        let right = Series::new(vec![1_i64]);
        let _ = &left * &right;
    }

    #[test]
    fn result_takes_left_policy() {
        let left = Series::with_policy(ExecPolicy::Unseq, vec![1_i32, 2]);
        let right = Series::with_policy(ExecPolicy::Seq, vec![3_i32, 4]);
        assert_eq!((&left - &right).policy(), ExecPolicy::Unseq);
        assert_eq!((2_i32 * &right).policy(), ExecPolicy::Seq);
    }

    #[test]
    fn owned_operators_reuse_buffer() {
        let series = Series::new(vec![1.0_f64, 2.0]);
        let out = series * 3.0 + 1.0;
        assert_eq!(out.as_slice(), &[4.0, 7.0]);
    }

    #[test]
    fn null_integer_divisors_are_not_evaluated() {
        let divisors = Series::from_options(vec![Some(4_i32), None, Some(2)]);
        let out = scalar_div(8_i32, &divisors);
        assert_eq!(out.to_options(), vec![Some(2), None, Some(4)]);

        let numerators = Series::new(vec![6_i64, 7, 10]);
        let quotients = div(&numerators, &Series::from_options(vec![Some(2_i64), None, Some(5)]))
            .expect("equal lengths");
        assert_eq!(quotients.to_options(), vec![Some(3), None, Some(2)]);
    }

    #[test]
    #[should_panic(expected = "divide by zero")]
    fn valid_integer_zero_divisor_panics() {
        let _ = scalar_div(1_i32, &Series::new(vec![0_i32]));
    }

    #[test]
    fn integer_operators_wrap() {
        let out = &Series::new(vec![i64::MAX]) + 1_i64;
        assert_eq!(out.as_slice(), &[i64::MIN]);
        let product = &Series::new(vec![i32::MIN]) * &Series::new(vec![-1_i32]);
        assert_eq!(product.as_slice(), &[i32::MIN]);
        let widened: Series<i64> = add_scalar(&Series::new(vec![i32::MAX]), 1_i64);
        assert_eq!(widened.as_slice(), &[i64::from(i32::MAX) + 1]);
    }

    #[test]
    fn compound_assignment_with_scalars_and_series() {
        let mut series = Series::new(vec![10_i32, 20, 30]);
        series += 5;
        series -= 1;
        series *= 2;
        series /= 4;
        assert_eq!(series.as_slice(), &[7, 12, 17]);

        let mut other = Series::new(vec![1_i32, 1, 1]);
        other.set_null(1);
        series += &other;
        assert_eq!(series.to_options(), vec![Some(8), None, Some(18)]);
    }
}
