use std::fmt::{self, Display};

use crate::scalar::{base_from_i32, Elementary};

/// Forward-mode dual number: a value paired with its tangent (derivative).
///
/// `Dual { re, eps }` represents `re + eps·ε` where `ε² = 0`. The parts may
/// be plain floats or graph values, which is how symbolic second derivatives
/// are recorded (forward-over-reverse with `Dual<Cg<F>>`).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Dual<T> {
    /// Primal (real) value.
    pub re: T,
    /// Tangent (derivative) value.
    pub eps: T,
}

impl<T: Display> Display for Dual<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}ε", self.re, self.eps)
    }
}

impl<T: Elementary> Dual<T> {
    /// Create a new dual number.
    #[inline]
    pub fn new(re: T, eps: T) -> Self {
        Dual { re, eps }
    }

    /// Create a constant (zero derivative).
    #[inline]
    pub fn constant(re: T) -> Self {
        Dual { re, eps: T::zero() }
    }

    /// Create a variable (unit derivative) for differentiation.
    #[inline]
    pub fn variable(re: T) -> Self {
        Dual { re, eps: T::one() }
    }

    /// Apply the chain rule: given `f(self.re)` and `f'(self.re)`, produce the dual result.
    #[inline]
    fn chain(self, f_val: T, f_deriv: T) -> Self {
        Dual {
            re: f_val,
            eps: self.eps * f_deriv,
        }
    }
}

impl<T: Elementary> Elementary for Dual<T> {
    type Base = T::Base;

    #[inline]
    fn from_base(val: T::Base) -> Self {
        Dual::constant(T::from_base(val))
    }

    #[inline]
    fn is_identically_zero(&self) -> bool {
        self.re.is_identically_zero() && self.eps.is_identically_zero()
    }

    // ── Powers ──

    #[inline]
    fn recip(self) -> Self {
        let inv = self.re.recip();
        self.chain(inv, -(inv * inv))
    }

    #[inline]
    fn sqrt(self) -> Self {
        let s = self.re.sqrt();
        let two = T::one() + T::one();
        self.chain(s, (two * s).recip())
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Dual::constant(T::one());
        }
        let val = self.re.powi(n);
        let deriv = T::from_base(base_from_i32(n)) * self.re.powi(n - 1);
        self.chain(val, deriv)
    }

    #[inline]
    fn powf(self, n: Self) -> Self {
        // d/dx (x^y) = y * x^(y-1) * dx + x^y * ln(x) * dy
        let val = self.re.powf(n.re);
        if n.eps.is_identically_zero() {
            return self.chain(val, n.re * self.re.powf(n.re - T::one()));
        }
        Dual {
            re: val,
            eps: val * (n.re * self.eps / self.re + n.eps * self.re.ln()),
        }
    }

    // ── Exp/Log ──

    #[inline]
    fn exp(self) -> Self {
        let e = self.re.exp();
        self.chain(e, e)
    }

    #[inline]
    fn ln(self) -> Self {
        self.chain(self.re.ln(), self.re.recip())
    }

    // ── Trig ──

    #[inline]
    fn sin(self) -> Self {
        self.chain(self.re.sin(), self.re.cos())
    }

    #[inline]
    fn cos(self) -> Self {
        self.chain(self.re.cos(), -self.re.sin())
    }

    #[inline]
    fn tan(self) -> Self {
        let t = self.re.tan();
        self.chain(t, T::one() + t * t)
    }

    // ── Hyperbolic ──

    #[inline]
    fn sinh(self) -> Self {
        self.chain(self.re.sinh(), self.re.cosh())
    }

    #[inline]
    fn cosh(self) -> Self {
        self.chain(self.re.cosh(), self.re.sinh())
    }

    #[inline]
    fn tanh(self) -> Self {
        let t = self.re.tanh();
        self.chain(t, T::one() - t * t)
    }
}
