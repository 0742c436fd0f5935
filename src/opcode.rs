//! Elementary operation codes shared by the tape and the operation graph.
//!
//! Each opcode represents an elementary operation. The [`eval_forward`] and
//! [`reverse_partials`] functions evaluate / differentiate a single opcode
//! for any [`Elementary`] value, so the same code evaluates numerically and
//! records symbolic derivative graphs.

use crate::scalar::{base_from_i32, Elementary};

/// Sentinel used in `arg_indices[1]` for unary ops (the second argument slot is unused).
pub const UNUSED: u32 = u32::MAX;

/// Elementary operation codes.
///
/// Binary ops use both argument slots; unary ops use slot 0 only. The tape
/// keeps the `i32` exponent of [`OpCode::Powi`] reinterpreted as `u32` in
/// slot 1, the graph keeps it in the node's auxiliary info.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpCode {
    // ── Structural ──
    /// Input variable (leaf node).
    Input,
    /// Scalar constant.
    Const,

    // ── Binary arithmetic ──
    Add,
    Sub,
    Mul,
    Div,
    Powf,

    // ── Unary ──
    Neg,
    Recip,
    Sqrt,
    /// Integer power.
    Powi,

    // ── Exp / Log ──
    Exp,
    Ln,

    // ── Trig ──
    Sin,
    Cos,
    Tan,

    // ── Hyperbolic ──
    Sinh,
    Cosh,
    Tanh,
}

impl OpCode {
    /// Whether the op reads both argument slots.
    #[inline]
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Powf
        )
    }
}

/// Evaluate a single opcode in the forward direction.
///
/// For binary ops, `a` and `b` are the two operand values. For unary ops `b`
/// is ignored. `exp` is only read by [`OpCode::Powi`].
#[inline]
pub fn eval_forward<T: Elementary>(op: OpCode, a: T, b: T, exp: i32) -> T {
    match op {
        // Inputs and constants are seeded by the caller, never re-evaluated.
        OpCode::Input | OpCode::Const => a,

        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Powf => a.powf(b),

        OpCode::Neg => -a,
        OpCode::Recip => a.recip(),
        OpCode::Sqrt => a.sqrt(),
        OpCode::Powi => a.powi(exp),

        OpCode::Exp => a.exp(),
        OpCode::Ln => a.ln(),

        OpCode::Sin => a.sin(),
        OpCode::Cos => a.cos(),
        OpCode::Tan => a.tan(),

        OpCode::Sinh => a.sinh(),
        OpCode::Cosh => a.cosh(),
        OpCode::Tanh => a.tanh(),
    }
}

/// Compute reverse-mode partial derivatives for a single opcode.
///
/// Returns `(∂result/∂arg0, ∂result/∂arg1)`.
/// For unary ops the second partial is `T::zero()`.
///
/// `a`, `b` are the operand values and `r` is the result value. With
/// `T = Dual<_>` this yields the partials' tangents needed for
/// forward-over-reverse second derivatives.
#[inline]
pub fn reverse_partials<T: Elementary>(op: OpCode, a: T, b: T, r: T, exp: i32) -> (T, T) {
    let zero = T::zero();
    let one = T::one();
    match op {
        OpCode::Input | OpCode::Const => (zero, zero),

        // Binary
        OpCode::Add => (one, one),
        OpCode::Sub => (one, -one),
        OpCode::Mul => (b, a),
        OpCode::Div => {
            let inv = b.recip();
            (inv, -(a * inv * inv))
        }
        OpCode::Powf => {
            // d/da a^b = b * a^(b-1)
            // d/db a^b = a^b * ln(a)
            let da = b * a.powf(b - one);
            let db = r * a.ln();
            (da, db)
        }

        // Unary
        OpCode::Neg => (-one, zero),
        OpCode::Recip => {
            // d/da (1/a) = -1/a²
            (-(r * r), zero)
        }
        OpCode::Sqrt => {
            let two = one + one;
            ((two * r).recip(), zero)
        }
        OpCode::Powi => {
            let n = T::from_base(base_from_i32(exp));
            (n * a.powi(exp - 1), zero)
        }

        // Exp/Log
        OpCode::Exp => (r, zero),
        OpCode::Ln => (a.recip(), zero),

        // Trig
        OpCode::Sin => (a.cos(), zero),
        OpCode::Cos => (-a.sin(), zero),
        OpCode::Tan => (one + r * r, zero),

        // Hyperbolic
        OpCode::Sinh => (a.cosh(), zero),
        OpCode::Cosh => (a.sinh(), zero),
        OpCode::Tanh => (one - r * r, zero),
    }
}

/// Decode a `powi` exponent stored as `u32` bits.
#[inline]
pub fn powi_exp_decode(raw: u32) -> i32 {
    raw as i32
}

/// Encode a `powi` exponent so it can be stored in an index slot.
#[inline]
pub fn powi_exp_encode(exp: i32) -> u32 {
    exp as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn powi_exponent_roundtrips_negative_values() {
        for exp in [-3, -1, 0, 2, 7] {
            assert_eq!(powi_exp_decode(powi_exp_encode(exp)), exp);
        }
    }

    #[test]
    fn tan_and_tanh_partials_use_the_result() {
        let a = 0.3_f64;
        let (dt, _) = reverse_partials(OpCode::Tan, a, 0.0, a.tan(), 0);
        assert!((dt - 1.0 / (a.cos() * a.cos())).abs() < 1e-12);
        let (dh, _) = reverse_partials(OpCode::Tanh, a, 0.0, a.tanh(), 0);
        assert!((dh - 1.0 / (a.cosh() * a.cosh())).abs() < 1e-12);
    }
}
