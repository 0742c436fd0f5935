//! `std::ops` implementations for [`Cg<F>`].
//!
//! Each operator records a node in the active arena unless every operand is
//! a constant. Compound assignments record compound-assignment nodes.

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::graph::ArenaThreadLocal;
use crate::opcode::OpCode;
use crate::value::{AssignOp, Cg};

// ──────────────────────────────────────────────
//  Cg<F> ↔ Cg<F> operators
// ──────────────────────────────────────────────

impl<F: ArenaThreadLocal> Add for Cg<F> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.record_binary(OpCode::Add, rhs)
    }
}

impl<F: ArenaThreadLocal> Sub for Cg<F> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.record_binary(OpCode::Sub, rhs)
    }
}

impl<F: ArenaThreadLocal> Mul for Cg<F> {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.record_binary(OpCode::Mul, rhs)
    }
}

impl<F: ArenaThreadLocal> Div for Cg<F> {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        self.record_binary(OpCode::Div, rhs)
    }
}

impl<F: ArenaThreadLocal> Neg for Cg<F> {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        self.record_unary(OpCode::Neg)
    }
}

impl<F: ArenaThreadLocal> AddAssign for Cg<F> {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.record_assign(AssignOp::Add, rhs);
    }
}

impl<F: ArenaThreadLocal> SubAssign for Cg<F> {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.record_assign(AssignOp::Sub, rhs);
    }
}

impl<F: ArenaThreadLocal> MulAssign for Cg<F> {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        self.record_assign(AssignOp::Mul, rhs);
    }
}

impl<F: ArenaThreadLocal> DivAssign for Cg<F> {
    #[inline]
    fn div_assign(&mut self, rhs: Self) {
        self.record_assign(AssignOp::Div, rhs);
    }
}

// ──────────────────────────────────────────────
//  Mixed ops: Cg<F> with primitive floats
// ──────────────────────────────────────────────

// The scalar operand is embedded as a constant argument.
macro_rules! impl_cg_scalar_ops {
    ($f:ty) => {
        impl Add<$f> for Cg<$f> {
            type Output = Cg<$f>;
            #[inline]
            fn add(self, rhs: $f) -> Cg<$f> {
                self + Cg::Constant(rhs)
            }
        }

        impl Add<Cg<$f>> for $f {
            type Output = Cg<$f>;
            #[inline]
            fn add(self, rhs: Cg<$f>) -> Cg<$f> {
                Cg::Constant(self) + rhs
            }
        }

        impl Sub<$f> for Cg<$f> {
            type Output = Cg<$f>;
            #[inline]
            fn sub(self, rhs: $f) -> Cg<$f> {
                self - Cg::Constant(rhs)
            }
        }

        impl Sub<Cg<$f>> for $f {
            type Output = Cg<$f>;
            #[inline]
            fn sub(self, rhs: Cg<$f>) -> Cg<$f> {
                Cg::Constant(self) - rhs
            }
        }

        impl Mul<$f> for Cg<$f> {
            type Output = Cg<$f>;
            #[inline]
            fn mul(self, rhs: $f) -> Cg<$f> {
                self * Cg::Constant(rhs)
            }
        }

        impl Mul<Cg<$f>> for $f {
            type Output = Cg<$f>;
            #[inline]
            fn mul(self, rhs: Cg<$f>) -> Cg<$f> {
                Cg::Constant(self) * rhs
            }
        }

        impl Div<$f> for Cg<$f> {
            type Output = Cg<$f>;
            #[inline]
            fn div(self, rhs: $f) -> Cg<$f> {
                self / Cg::Constant(rhs)
            }
        }

        impl Div<Cg<$f>> for $f {
            type Output = Cg<$f>;
            #[inline]
            fn div(self, rhs: Cg<$f>) -> Cg<$f> {
                Cg::Constant(self) / rhs
            }
        }

        impl AddAssign<$f> for Cg<$f> {
            #[inline]
            fn add_assign(&mut self, rhs: $f) {
                *self += Cg::Constant(rhs);
            }
        }

        impl SubAssign<$f> for Cg<$f> {
            #[inline]
            fn sub_assign(&mut self, rhs: $f) {
                *self -= Cg::Constant(rhs);
            }
        }

        impl MulAssign<$f> for Cg<$f> {
            #[inline]
            fn mul_assign(&mut self, rhs: $f) {
                *self *= Cg::Constant(rhs);
            }
        }

        impl DivAssign<$f> for Cg<$f> {
            #[inline]
            fn div_assign(&mut self, rhs: $f) {
                *self /= Cg::Constant(rhs);
            }
        }
    };
}

impl_cg_scalar_ops!(f32);
impl_cg_scalar_ops!(f64);
