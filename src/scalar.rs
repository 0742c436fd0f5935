//! The [`Elementary`] trait for values a tape can be replayed with.
//!
//! Implemented for plain `f32`/`f64`, for graph values [`Cg`](crate::Cg) and
//! for [`Dual`](crate::Dual) numbers over any of them. One generic tape sweep
//! therefore evaluates numerically or records a derivative graph.

use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_traits::Float as NumFloat;

use crate::float::Float;

/// Arithmetic and transcendental surface shared by every replay value.
pub trait Elementary:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// The underlying primitive float type.
    type Base: Float;

    /// Lift a plain float to this value (a constant).
    fn from_base(val: Self::Base) -> Self;

    #[inline]
    fn zero() -> Self {
        Self::from_base(<Self::Base as num_traits::Zero>::zero())
    }

    #[inline]
    fn one() -> Self {
        Self::from_base(<Self::Base as num_traits::One>::one())
    }

    /// True only when the value is known to be exactly zero without
    /// evaluating anything (a symbolic variable never is).
    fn is_identically_zero(&self) -> bool;

    fn recip(self) -> Self;
    fn sqrt(self) -> Self;
    fn powi(self, n: i32) -> Self;
    fn powf(self, n: Self) -> Self;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn sinh(self) -> Self;
    fn cosh(self) -> Self;
    fn tanh(self) -> Self;
}

/// Convert an exponent to the base type (always representable for `f32`/`f64`).
#[inline]
pub(crate) fn base_from_i32<F: Float>(n: i32) -> F {
    <F as num_traits::FromPrimitive>::from_i32(n).unwrap_or_else(<F as NumFloat>::nan)
}

impl<F: Float> Elementary for F {
    type Base = F;

    #[inline]
    fn from_base(val: F) -> Self {
        val
    }

    #[inline]
    fn is_identically_zero(&self) -> bool {
        <F as num_traits::Zero>::is_zero(self)
    }

    #[inline]
    fn recip(self) -> Self {
        NumFloat::recip(self)
    }

    #[inline]
    fn sqrt(self) -> Self {
        NumFloat::sqrt(self)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        NumFloat::powi(self, n)
    }

    #[inline]
    fn powf(self, n: Self) -> Self {
        NumFloat::powf(self, n)
    }

    #[inline]
    fn exp(self) -> Self {
        NumFloat::exp(self)
    }

    #[inline]
    fn ln(self) -> Self {
        NumFloat::ln(self)
    }

    #[inline]
    fn sin(self) -> Self {
        NumFloat::sin(self)
    }

    #[inline]
    fn cos(self) -> Self {
        NumFloat::cos(self)
    }

    #[inline]
    fn tan(self) -> Self {
        NumFloat::tan(self)
    }

    #[inline]
    fn sinh(self) -> Self {
        NumFloat::sinh(self)
    }

    #[inline]
    fn cosh(self) -> Self {
        NumFloat::cosh(self)
    }

    #[inline]
    fn tanh(self) -> Self {
        NumFloat::tanh(self)
    }
}
