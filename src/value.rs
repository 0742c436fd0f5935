//! The dual-mode graph value.
//!
//! A [`Cg`] is either a concrete constant or a reference to a node of an
//! [`Arena`]. Arithmetic between constants is evaluated eagerly; as soon as
//! one operand is a variable, the result is recorded as a node.

use std::fmt::{self, Display};

use num_traits::{One, Zero};

use crate::error::{CgError, Result};
use crate::float::Float;
use crate::graph::{with_active_arena, Arena, ArenaThreadLocal, Argument, NodeRef, OpKind};
use crate::opcode::{self, OpCode};
use crate::scalar::Elementary;

/// A constant or a symbolic variable backed by a graph node.
///
/// The arena owns the node; many values may refer to the same node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cg<F: Float> {
    Constant(F),
    Variable(NodeRef),
}

/// Operator of a compound assignment (`+=`, `-=`, `*=`, `/=`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssignOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    /// Node kind recording the compound assignment.
    #[inline]
    pub fn kind(self) -> OpKind {
        match self {
            AssignOp::Add => OpKind::PlusAssign,
            AssignOp::Sub => OpKind::MinusAssign,
            AssignOp::Mul => OpKind::MultAssign,
            AssignOp::Div => OpKind::DivAssign,
        }
    }

    /// Binary operation with the same value semantics.
    #[inline]
    pub fn opcode(self) -> OpCode {
        match self {
            AssignOp::Add => OpCode::Add,
            AssignOp::Sub => OpCode::Sub,
            AssignOp::Mul => OpCode::Mul,
            AssignOp::Div => OpCode::Div,
        }
    }
}

impl<F: Float> Default for Cg<F> {
    fn default() -> Self {
        Cg::Constant(F::zero())
    }
}

impl<F: Float> Display for Cg<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cg::Constant(v) => write!(f, "{v}"),
            Cg::Variable(r) => write!(f, "v{}", r.index()),
        }
    }
}

impl<F: Float> From<F> for Cg<F> {
    fn from(v: F) -> Self {
        Cg::Constant(v)
    }
}

impl<F: Float> Cg<F> {
    #[inline]
    pub fn constant(v: F) -> Self {
        Cg::Constant(v)
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self, Cg::Constant(_))
    }

    #[inline]
    pub fn is_variable(&self) -> bool {
        matches!(self, Cg::Variable(_))
    }

    /// The constant payload. Variables have none.
    #[inline]
    pub fn value(&self) -> Option<F> {
        match *self {
            Cg::Constant(v) => Some(v),
            Cg::Variable(_) => None,
        }
    }

    #[inline]
    pub fn node(&self) -> Option<NodeRef> {
        match *self {
            Cg::Constant(_) => None,
            Cg::Variable(r) => Some(r),
        }
    }

    /// A constant exactly equal to zero.
    #[inline]
    pub fn is_identically_zero(&self) -> bool {
        matches!(*self, Cg::Constant(v) if v.is_zero())
    }

    /// A constant exactly equal to one.
    #[inline]
    pub fn is_identically_one(&self) -> bool {
        matches!(*self, Cg::Constant(v) if v.is_one())
    }

    /// Turn a constant into a variable holding an explicit assignment of
    /// that constant. Variables are left untouched.
    pub fn make_variable(&mut self, arena: &mut Arena<F>) -> Result<()> {
        match *self {
            Cg::Variable(r) => arena.check_handle(r),
            Cg::Constant(v) => {
                let r = arena.push(OpKind::Assign, vec![Argument::Const(v)], Vec::new())?;
                *self = Cg::Variable(r);
                Ok(())
            }
        }
    }

    /// `self op= rhs`.
    ///
    /// Constant operands are folded without touching the arena, and the
    /// identities `0 + x`, `x ± 0`, `x * 1`, `1 * x`, `x / 1` never record a
    /// node. Multiplying by an identically zero constant turns the slot into
    /// the constant zero.
    ///
    /// Known limitation: the zero short-circuit (`x * 0` and `0 * x`, `0 / x`)
    /// does not consider that the dropped operand could be infinite or NaN.
    pub fn compound_assign(&mut self, op: AssignOp, rhs: Cg<F>, arena: &mut Arena<F>) -> Result<()> {
        if let (Cg::Constant(a), Cg::Constant(b)) = (*self, rhs) {
            *self = Cg::Constant(opcode::eval_forward(op.opcode(), a, b, 0));
            return Ok(());
        }
        check_same_arena(*self, rhs)?;
        if let Cg::Variable(r) = rhs {
            arena.check_handle(r)?;
        }

        let prev = match *self {
            Cg::Constant(c) => {
                match op {
                    AssignOp::Add if c.is_zero() => {
                        *self = rhs;
                        return Ok(());
                    }
                    AssignOp::Mul | AssignOp::Div if c.is_zero() => return Ok(()),
                    AssignOp::Mul if c.is_one() => {
                        *self = rhs;
                        return Ok(());
                    }
                    _ => {}
                }
                // The old constant becomes an explicit assignment so the
                // recorded code reproduces it.
                arena.push(OpKind::Assign, vec![Argument::Const(c)], Vec::new())?
            }
            Cg::Variable(r) => {
                arena.check_handle(r)?;
                match op {
                    AssignOp::Add | AssignOp::Sub if rhs.is_identically_zero() => return Ok(()),
                    AssignOp::Mul if rhs.is_identically_zero() => {
                        arena.value_will_change(r)?;
                        *self = Cg::Constant(F::zero());
                        return Ok(());
                    }
                    AssignOp::Mul | AssignOp::Div if rhs.is_identically_one() => return Ok(()),
                    _ => {}
                }
                r
            }
        };
        arena.value_will_change(prev)?;
        let r = arena.push(op.kind(), vec![Argument::Node(prev), rhs.into()], Vec::new())?;
        *self = Cg::Variable(r);
        Ok(())
    }

    /// Record `self op rhs` for a binary [`OpCode`].
    pub fn binary(self, op: OpCode, rhs: Cg<F>, arena: &mut Arena<F>) -> Result<Cg<F>> {
        if let (Cg::Constant(a), Cg::Constant(b)) = (self, rhs) {
            return Ok(Cg::Constant(opcode::eval_forward(op, a, b, 0)));
        }
        check_same_arena(self, rhs)?;
        for r in [self.node(), rhs.node()].into_iter().flatten() {
            arena.check_handle(r)?;
        }

        match op {
            OpCode::Add if self.is_identically_zero() => return Ok(rhs),
            OpCode::Add | OpCode::Sub if rhs.is_identically_zero() => return Ok(self),
            OpCode::Mul if self.is_identically_zero() || rhs.is_identically_zero() => {
                return Ok(Cg::Constant(F::zero()))
            }
            OpCode::Mul if self.is_identically_one() => return Ok(rhs),
            OpCode::Mul | OpCode::Div if rhs.is_identically_one() => return Ok(self),
            OpCode::Div if self.is_identically_zero() => return Ok(Cg::Constant(F::zero())),
            OpCode::Sub if self.is_identically_zero() => {
                return self.unary_node(OpCode::Neg, rhs, arena)
            }
            _ => {}
        }

        let r = arena.push(OpKind::Op(op), vec![self.into(), rhs.into()], Vec::new())?;
        Ok(Cg::Variable(r))
    }

    /// Record a unary [`OpCode`] applied to `self`.
    pub fn unary(self, op: OpCode, arena: &mut Arena<F>) -> Result<Cg<F>> {
        match self {
            Cg::Constant(v) => Ok(Cg::Constant(opcode::eval_forward(op, v, F::zero(), 0))),
            Cg::Variable(_) => self.unary_node(op, self, arena),
        }
    }

    fn unary_node(self, op: OpCode, arg: Cg<F>, arena: &mut Arena<F>) -> Result<Cg<F>> {
        if let Cg::Variable(r) = arg {
            arena.check_handle(r)?;
        }
        let r = arena.push(OpKind::Op(op), vec![arg.into()], Vec::new())?;
        Ok(Cg::Variable(r))
    }

    /// Record `self^n`.
    pub fn powi_in(self, n: i32, arena: &mut Arena<F>) -> Result<Cg<F>> {
        match (self, n) {
            (Cg::Constant(v), _) => Ok(Cg::Constant(num_traits::Float::powi(v, n))),
            (_, 0) => Ok(Cg::Constant(F::one())),
            (_, 1) => Ok(self),
            (Cg::Variable(r), _) => {
                arena.check_handle(r)?;
                let info = vec![opcode::powi_exp_encode(n) as usize];
                let r = arena.push(OpKind::Op(OpCode::Powi), vec![self.into()], info)?;
                Ok(Cg::Variable(r))
            }
        }
    }
}

fn check_same_arena<F: Float>(a: Cg<F>, b: Cg<F>) -> Result<()> {
    if let (Cg::Variable(l), Cg::Variable(r)) = (a, b) {
        if l.arena_id() != r.arena_id() {
            return Err(CgError::ArenaMismatch {
                left: l.arena_id(),
                right: r.arena_id(),
            });
        }
    }
    Ok(())
}

// ──────────────────────────────────────────────
//  Recording through the thread-local arena
// ──────────────────────────────────────────────

/// Run `f` against the active arena, panicking on precondition violations.
///
/// Operators cannot return `Result`; use the explicit methods on [`Cg`] to
/// handle errors instead.
#[inline]
pub(crate) fn record<F: ArenaThreadLocal, R>(f: impl FnOnce(&mut Arena<F>) -> Result<R>) -> R {
    match with_active_arena(f).and_then(|r| r) {
        Ok(v) => v,
        Err(e) => panic!("{e}"),
    }
}

impl<F: ArenaThreadLocal> Cg<F> {
    #[inline]
    pub(crate) fn record_binary(self, op: OpCode, rhs: Cg<F>) -> Cg<F> {
        if let (Cg::Constant(a), Cg::Constant(b)) = (self, rhs) {
            return Cg::Constant(opcode::eval_forward(op, a, b, 0));
        }
        record(|arena| self.binary(op, rhs, arena))
    }

    #[inline]
    pub(crate) fn record_unary(self, op: OpCode) -> Cg<F> {
        if let Cg::Constant(v) = self {
            return Cg::Constant(opcode::eval_forward(op, v, F::zero(), 0));
        }
        record(|arena| self.unary(op, arena))
    }

    #[inline]
    pub(crate) fn record_assign(&mut self, op: AssignOp, rhs: Cg<F>) {
        if let (Cg::Constant(a), Cg::Constant(b)) = (*self, rhs) {
            *self = Cg::Constant(opcode::eval_forward(op.opcode(), a, b, 0));
            return;
        }
        let mut slot = *self;
        record(|arena| slot.compound_assign(op, rhs, arena));
        *self = slot;
    }
}

impl<F: ArenaThreadLocal> Zero for Cg<F> {
    fn zero() -> Self {
        Cg::Constant(F::zero())
    }

    fn is_zero(&self) -> bool {
        self.is_identically_zero()
    }
}

impl<F: ArenaThreadLocal> One for Cg<F> {
    fn one() -> Self {
        Cg::Constant(F::one())
    }
}

impl<F: ArenaThreadLocal> Elementary for Cg<F> {
    type Base = F;

    #[inline]
    fn from_base(val: F) -> Self {
        Cg::Constant(val)
    }

    #[inline]
    fn is_identically_zero(&self) -> bool {
        Cg::is_identically_zero(self)
    }

    fn recip(self) -> Self {
        self.record_unary(OpCode::Recip)
    }

    fn sqrt(self) -> Self {
        self.record_unary(OpCode::Sqrt)
    }

    fn powi(self, n: i32) -> Self {
        if let Cg::Constant(v) = self {
            return Cg::Constant(num_traits::Float::powi(v, n));
        }
        record(|arena| self.powi_in(n, arena))
    }

    fn powf(self, n: Self) -> Self {
        self.record_binary(OpCode::Powf, n)
    }

    fn exp(self) -> Self {
        self.record_unary(OpCode::Exp)
    }

    fn ln(self) -> Self {
        self.record_unary(OpCode::Ln)
    }

    fn sin(self) -> Self {
        self.record_unary(OpCode::Sin)
    }

    fn cos(self) -> Self {
        self.record_unary(OpCode::Cos)
    }

    fn tan(self) -> Self {
        self.record_unary(OpCode::Tan)
    }

    fn sinh(self) -> Self {
        self.record_unary(OpCode::Sinh)
    }

    fn cosh(self) -> Self {
        self.record_unary(OpCode::Cosh)
    }

    fn tanh(self) -> Self {
        self.record_unary(OpCode::Tanh)
    }
}
