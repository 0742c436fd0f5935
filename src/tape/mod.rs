//! Single-iteration representative program ("the tape").
//!
//! A [`LoopTape`] stores opcodes rather than values, so it can be replayed
//! with any [`Elementary`](crate::scalar::Elementary) value: plain floats for
//! numeric reference evaluation, [`Cg`] values to record the loop body into
//! an arena, or [`Dual`](crate::Dual) numbers over either for derivatives.
//!
//! Inputs occupy tape indices `0..num_inputs` in order.

use crate::error::{CgError, Result};
use crate::float::Float;
use crate::graph::{Arena, Argument, NodeRef, OpKind};
use crate::opcode::{self, OpCode, UNUSED};
use crate::value::Cg;

mod forward;
mod sparse;
mod tangent;

/// A replayable program with `num_inputs` inputs and a list of outputs.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopTape<F: Float> {
    pub(crate) opcodes: Vec<OpCode>,
    pub(crate) arg_indices: Vec<[u32; 2]>,
    /// Constant payloads. Entries that are not `Const` hold zero.
    pub(crate) values: Vec<F>,
    pub(crate) num_inputs: u32,
    pub(crate) num_variables: u32,
    pub(crate) output_indices: Vec<u32>,
}

impl<F: Float> LoopTape<F> {
    /// Create an empty tape.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a tape with pre-allocated capacity.
    pub fn with_capacity(est_ops: usize) -> Self {
        LoopTape {
            opcodes: Vec::with_capacity(est_ops),
            arg_indices: Vec::with_capacity(est_ops),
            values: Vec::with_capacity(est_ops),
            num_inputs: 0,
            num_variables: 0,
            output_indices: Vec::new(),
        }
    }

    /// Register a new input variable. Returns its index.
    ///
    /// Inputs must be registered before any other entry.
    #[inline]
    pub fn new_input(&mut self) -> u32 {
        debug_assert_eq!(self.num_inputs, self.num_variables, "inputs come first");
        self.num_inputs += 1;
        self.push_entry(OpCode::Input, [UNUSED, UNUSED], F::zero())
    }

    /// Register a scalar constant. Returns its index.
    #[inline]
    pub fn push_const(&mut self, value: F) -> u32 {
        self.push_entry(OpCode::Const, [UNUSED, UNUSED], value)
    }

    /// Record an operation. Unary ops pass [`UNUSED`] as `arg1`.
    #[inline]
    pub fn push_op(&mut self, op: OpCode, arg0: u32, arg1: u32) -> u32 {
        self.push_entry(op, [arg0, arg1], F::zero())
    }

    /// Record an integer power. The exponent is kept in `arg_indices[1]`.
    #[inline]
    pub fn push_powi(&mut self, arg0: u32, exp: i32) -> u32 {
        match exp {
            1 => arg0,
            -1 => self.push_op(OpCode::Recip, arg0, UNUSED),
            _ => self.push_entry(OpCode::Powi, [arg0, opcode::powi_exp_encode(exp)], F::zero()),
        }
    }

    fn push_entry(&mut self, op: OpCode, args: [u32; 2], value: F) -> u32 {
        let idx = self.num_variables;
        self.num_variables += 1;
        self.opcodes.push(op);
        self.arg_indices.push(args);
        self.values.push(value);
        idx
    }

    /// Mark the output entries.
    pub fn set_outputs(&mut self, indices: &[u32]) {
        self.output_indices = indices.to_vec();
    }

    /// Number of input variables.
    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.num_inputs as usize
    }

    /// Number of output variables.
    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.output_indices.len()
    }

    /// Number of entries (including inputs and constants).
    #[inline]
    pub fn num_ops(&self) -> usize {
        self.opcodes.len()
    }

    /// Tape indices of the outputs.
    #[inline]
    pub fn output_indices(&self) -> &[u32] {
        &self.output_indices
    }

    /// Build a tape from the part of `arena` that `outputs` depend on.
    ///
    /// `inputs[j]` becomes tape input `j`. Compound assignments are lowered
    /// to the corresponding binary operation and aliases are resolved. Loop
    /// and branch nodes cannot appear in a representative iteration.
    pub fn from_arena(arena: &Arena<F>, inputs: &[NodeRef], outputs: &[Cg<F>]) -> Result<Self> {
        for r in outputs.iter().filter_map(|o| o.node()) {
            arena.check_handle(r)?;
        }
        let live = arena.reachable(outputs.iter().filter_map(|o| o.node()));
        let mut tape = LoopTape::with_capacity(live.iter().filter(|&&l| l).count() + inputs.len());
        let mut map: Vec<u32> = vec![UNUSED; arena.len()];

        for &r in inputs {
            let node = arena.node(r)?;
            if node.op() != OpKind::Independent {
                return Err(CgError::InvalidGraph(format!(
                    "tape input {} is a {:?} node",
                    r.index(),
                    node.op()
                )));
            }
            map[r.index()] = tape.new_input();
        }

        for (r, node) in arena.nodes() {
            let i = r.index();
            if !live[i] || map[i] != UNUSED {
                continue;
            }
            let idx = match node.op() {
                OpKind::Independent => {
                    return Err(CgError::InvalidGraph(format!(
                        "independent node {i} is not a tape input"
                    )))
                }
                OpKind::Assign | OpKind::Alias => tape.argument(&node.args()[0], &map),
                OpKind::Op(OpCode::Powi) => {
                    let a = tape.argument(&node.args()[0], &map);
                    tape.push_powi(a, opcode::powi_exp_decode(node.info()[0] as u32))
                }
                OpKind::Op(op) => {
                    let a = tape.argument(&node.args()[0], &map);
                    let b = match node.args().get(1) {
                        Some(arg) => tape.argument(arg, &map),
                        None => UNUSED,
                    };
                    tape.push_op(op, a, b)
                }
                OpKind::PlusAssign | OpKind::MinusAssign | OpKind::MultAssign | OpKind::DivAssign => {
                    let op = match node.op() {
                        OpKind::PlusAssign => OpCode::Add,
                        OpKind::MinusAssign => OpCode::Sub,
                        OpKind::MultAssign => OpCode::Mul,
                        _ => OpCode::Div,
                    };
                    let a = tape.argument(&node.args()[0], &map);
                    let b = tape.argument(&node.args()[1], &map);
                    tape.push_op(op, a, b)
                }
                _ => return Err(CgError::UnsupportedOperation("loop or branch node in a tape")),
            };
            map[i] = idx;
        }

        let mut out = Vec::with_capacity(outputs.len());
        for o in outputs {
            out.push(match *o {
                Cg::Constant(v) => tape.push_const(v),
                Cg::Variable(r) => map[r.index()],
            });
        }
        tape.set_outputs(&out);
        Ok(tape)
    }

    fn argument(&mut self, arg: &Argument<F>, map: &[u32]) -> u32 {
        match *arg {
            Argument::Node(r) => map[r.index()],
            Argument::Const(v) => self.push_const(v),
        }
    }

    /// Fail unless `len` equals the number of inputs.
    pub(crate) fn check_inputs(&self, len: usize) -> Result<()> {
        if len != self.num_inputs() {
            return Err(CgError::SizeMismatch {
                what: "tape input",
                expected: self.num_inputs(),
                actual: len,
            });
        }
        Ok(())
    }

    pub(crate) fn check_outputs(&self, len: usize) -> Result<()> {
        if len != self.num_outputs() {
            return Err(CgError::SizeMismatch {
                what: "tape output",
                expected: self.num_outputs(),
                actual: len,
            });
        }
        Ok(())
    }
}

impl<F: Float> Default for LoopTape<F> {
    fn default() -> Self {
        Self::new()
    }
}
