//! Numeric interpreter for finished arenas.
//!
//! Loop bodies run once per iteration. Nodes that do not depend on the
//! iteration index are evaluated once and shared across iterations.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{CgError, Result};
use crate::float::Float;
use crate::opcode::{self, OpCode};
use crate::value::Cg;

use super::{Arena, Argument, Node, NodeRef, OpKind, OPEN_RANGE};

/// Evaluate `outputs` of `arena` for the given input arrays
/// (`inputs[ARRAY_X]`, `inputs[ARRAY_W]`, ...).
pub fn evaluate<F: Float>(arena: &Arena<F>, outputs: &[Cg<F>], inputs: &[&[F]]) -> Result<Vec<F>> {
    let mut interp = Interpreter::new(arena, inputs);
    outputs
        .iter()
        .map(|out| match *out {
            Cg::Constant(v) => Ok(v),
            Cg::Variable(r) => interp.value(r).map(|(v, _)| v),
        })
        .collect()
}

/// Branch chain of one end-if: `(branch node, results of that branch)`
/// in branch creation order.
type Chain = Vec<(NodeRef, Vec<NodeRef>)>;

struct Interpreter<'a, F: Float> {
    arena: &'a Arena<F>,
    inputs: &'a [&'a [F]],
    invariant: Vec<Option<F>>,
    varying: HashMap<u32, F>,
    iteration: Option<usize>,
    loops: HashMap<u32, HashMap<usize, F>>,
    chains: HashMap<u32, Chain>,
}

impl<'a, F: Float> Interpreter<'a, F> {
    fn new(arena: &'a Arena<F>, inputs: &'a [&'a [F]]) -> Self {
        Interpreter {
            arena,
            inputs,
            invariant: vec![None; arena.len()],
            varying: HashMap::new(),
            iteration: None,
            loops: HashMap::new(),
            chains: HashMap::new(),
        }
    }

    fn input(&self, array: usize, position: usize) -> Result<F> {
        self.inputs
            .get(array)
            .and_then(|values| values.get(position))
            .copied()
            .ok_or_else(|| {
                CgError::InvalidGraph(format!("input {position} of array {array} is not provided"))
            })
    }

    fn current_iteration(&self, r: NodeRef) -> Result<usize> {
        self.iteration.ok_or_else(|| {
            CgError::InvalidGraph(format!("node {} is evaluated outside of a loop", r.index))
        })
    }

    fn argument(&mut self, arg: &Argument<F>) -> Result<(F, bool)> {
        match *arg {
            Argument::Const(v) => Ok((v, false)),
            Argument::Node(r) => self.value(r),
        }
    }

    fn cached(&self, r: NodeRef) -> Option<(F, bool)> {
        if let Some(v) = self.invariant.get(r.index()).copied().flatten() {
            return Some((v, false));
        }
        self.varying.get(&r.index).map(|&v| (v, true))
    }

    /// Value of a node and whether it depends on the current iteration.
    ///
    /// Operands are visited in post-order with an explicit stack. Merge
    /// nodes may hold arguments created after them, so creation order is
    /// not an evaluation order.
    fn value(&mut self, root: NodeRef) -> Result<(F, bool)> {
        if let Some(v) = self.cached(root) {
            return Ok(v);
        }
        let arena = self.arena;
        let mut done: HashMap<u32, (F, bool)> = HashMap::new();
        let mut open = HashSet::new();
        let mut stack = vec![(root, false)];

        while let Some((r, expanded)) = stack.pop() {
            if done.contains_key(&r.index) {
                continue;
            }
            if expanded {
                let v = self.compute(r, &done)?;
                open.remove(&r.index);
                done.insert(r.index, v);
                continue;
            }
            if let Some(v) = self.cached(r) {
                done.insert(r.index, v);
                continue;
            }
            if !open.insert(r.index) {
                return Err(CgError::InvalidGraph(format!("node {} depends on itself", r.index)));
            }
            stack.push((r, true));
            let node = arena.node(r)?;
            for arg in operands(node) {
                if let Argument::Node(a) = *arg {
                    if node.op() == OpKind::DependentMultiAssign && arena.node(a)?.op() == OpKind::LoopEnd {
                        continue;
                    }
                    if !done.contains_key(&a.index) {
                        stack.push((a, false));
                    }
                }
            }
        }

        done.get(&root.index)
            .copied()
            .ok_or_else(|| CgError::InvalidGraph(format!("node {} was not evaluated", root.index)))
    }

    /// Evaluate one node whose operands are already in `done`.
    fn compute(&mut self, r: NodeRef, done: &HashMap<u32, (F, bool)>) -> Result<(F, bool)> {
        let arena = self.arena;
        let node = arena.node(r)?;
        let args = node.args();
        let operand = |arg: &Argument<F>| -> Result<(F, bool)> {
            match *arg {
                Argument::Const(v) => Ok((v, false)),
                Argument::Node(a) => done.get(&a.index).copied().ok_or_else(|| {
                    CgError::InvalidGraph(format!("operand {} of node {} is not evaluated", a.index, r.index))
                }),
            }
        };

        let (v, varying) = match node.op() {
            OpKind::Independent => (self.input(node.info()[0], node.info()[1])?, false),
            OpKind::Assign | OpKind::Alias => operand(&args[0])?,
            OpKind::Op(op) => {
                let (a, va) = operand(&args[0])?;
                let (b, vb) = match args.get(1) {
                    Some(arg) => operand(arg)?,
                    None => (F::zero(), false),
                };
                let exp = if op == OpCode::Powi {
                    opcode::powi_exp_decode(node.info()[0] as u32)
                } else {
                    0
                };
                (opcode::eval_forward(op, a, b, exp), va || vb)
            }
            kind @ (OpKind::PlusAssign
            | OpKind::MinusAssign
            | OpKind::MultAssign
            | OpKind::DivAssign) => {
                let op = match kind {
                    OpKind::PlusAssign => OpCode::Add,
                    OpKind::MinusAssign => OpCode::Sub,
                    OpKind::MultAssign => OpCode::Mul,
                    _ => OpCode::Div,
                };
                let (a, va) = operand(&args[0])?;
                let (b, vb) = operand(&args[1])?;
                (opcode::eval_forward(op, a, b, 0), va || vb)
            }
            OpKind::Index => {
                let it = self.current_iteration(r)?;
                (F::from_usize(it).unwrap_or_else(F::nan), true)
            }
            OpKind::LoopIndexedIndep => {
                let it = self.current_iteration(r)?;
                let position = self.pattern_at(node.info()[1], it)?;
                (self.input(node.info()[0], position)?, true)
            }
            OpKind::DependentMultiAssign => {
                let location = node.info()[0];
                let mut sum = F::zero();
                for arg in args {
                    match *arg {
                        Argument::Node(a) if arena.node(a)?.op() == OpKind::LoopEnd => {
                            sum = sum + self.loop_value(a, location)?;
                        }
                        _ => sum = sum + operand(arg)?.0,
                    }
                }
                (sum, false)
            }
            op => {
                return Err(CgError::InvalidGraph(format!(
                    "{op:?} node {} does not produce a value",
                    r.index
                )))
            }
        };

        if varying {
            self.varying.insert(r.index, v);
        } else {
            self.invariant[r.index()] = Some(v);
        }
        Ok((v, varying))
    }

    fn pattern_at(&self, pattern: usize, iteration: usize) -> Result<usize> {
        self.arena
            .index_pattern(pattern)
            .and_then(|p| p.eval(iteration))
            .ok_or_else(|| {
                CgError::InvalidGraph(format!(
                    "index pattern {pattern} has no index for iteration {iteration}"
                ))
            })
    }

    /// Accumulated value of `location` after running the loop ending at `end`.
    fn loop_value(&mut self, end: NodeRef, location: usize) -> Result<F> {
        if !self.loops.contains_key(&end.index) {
            let acc = self.run_loop(end)?;
            self.loops.insert(end.index, acc);
        }
        Ok(self.loops[&end.index]
            .get(&location)
            .copied()
            .unwrap_or_else(F::zero))
    }

    fn run_loop(&mut self, end: NodeRef) -> Result<HashMap<usize, F>> {
        let arena = self.arena;
        let end_node = arena.node(end)?;
        let start = end_node.args()[0]
            .node()
            .ok_or_else(|| CgError::InvalidGraph("loop end without loop start".into()))?;
        let iterations = arena.node(start)?.info()[1];
        tracing::trace!(loop_end = end.index, iterations, "running loop");

        let mut acc = HashMap::new();
        let saved = self.iteration;
        for it in 0..iterations {
            self.iteration = Some(it);
            self.varying.clear();
            for arg in &end_node.args()[1..] {
                if let Some(r) = arg.node() {
                    self.execute(r, &mut acc)?;
                }
            }
        }
        self.iteration = saved;
        self.varying.clear();
        Ok(acc)
    }

    fn execute(&mut self, r: NodeRef, acc: &mut HashMap<usize, F>) -> Result<()> {
        let node = self.arena.node(r)?;
        match node.op() {
            OpKind::LoopIndexedDep => {
                let it = self.current_iteration(r)?;
                let (v, _) = self.argument(&node.args()[0])?;
                let location = self.pattern_at(node.info()[0], it)?;
                if node.info()[1] == 1 {
                    let slot = acc.entry(location).or_insert_with(F::zero);
                    *slot = *slot + v;
                } else {
                    acc.insert(location, v);
                }
                Ok(())
            }
            OpKind::EndIf => self.execute_if(r, acc),
            op => Err(CgError::InvalidGraph(format!(
                "{op:?} node {} cannot be a loop result",
                r.index
            ))),
        }
    }

    fn execute_if(&mut self, end_if: NodeRef, acc: &mut HashMap<usize, F>) -> Result<()> {
        if !self.chains.contains_key(&end_if.index) {
            let chain = self.collect_chain(end_if)?;
            self.chains.insert(end_if.index, chain);
        }
        let it = self.current_iteration(end_if)?;
        let taken = {
            let chain = &self.chains[&end_if.index];
            let mut taken = None;
            for (branch, results) in chain {
                if self.branch_taken(*branch, it)? {
                    taken = Some(results.clone());
                    break;
                }
            }
            taken
        };
        for result in taken.unwrap_or_default() {
            let dep = self.arena.node(result)?.args()[1]
                .node()
                .ok_or_else(|| CgError::InvalidGraph("conditional result without value".into()))?;
            self.execute(dep, acc)?;
        }
        Ok(())
    }

    /// Walk back from an end-if through the branch nodes, gathering every
    /// conditional result grouped by branch.
    fn collect_chain(&self, end_if: NodeRef) -> Result<Chain> {
        let arena = self.arena;
        let mut by_branch: BTreeMap<NodeRef, Vec<NodeRef>> = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeRef> = arena.node(end_if)?.args().iter().filter_map(|a| a.node()).collect();
        while let Some(result) = stack.pop() {
            if !seen.insert(result) {
                continue;
            }
            let node = arena.node(result)?;
            if node.op() != OpKind::CondResult {
                return Err(CgError::InvalidGraph(format!(
                    "{:?} node {} found in a branch chain",
                    node.op(),
                    result.index
                )));
            }
            let branch = node.args()[0]
                .node()
                .ok_or_else(|| CgError::InvalidGraph("conditional result without branch".into()))?;
            by_branch.entry(branch).or_default().push(result);
            for arg in arena.node(branch)?.args() {
                if let Some(prev) = arg.node() {
                    if arena.node(prev)?.op() == OpKind::CondResult {
                        stack.push(prev);
                    }
                }
            }
        }
        Ok(by_branch
            .into_iter()
            .map(|(branch, mut results)| {
                results.sort();
                (branch, results)
            })
            .collect())
    }

    fn branch_taken(&self, branch: NodeRef, iteration: usize) -> Result<bool> {
        let node = self.arena.node(branch)?;
        let cond = match node.op() {
            OpKind::StartIf => node.args()[0].node(),
            OpKind::ElseIf => node.args()[1].node(),
            OpKind::Else => return Ok(true),
            op => {
                return Err(CgError::InvalidGraph(format!(
                    "{op:?} node {} is not a branch",
                    branch.index
                )))
            }
        };
        let cond = cond.ok_or_else(|| CgError::InvalidGraph("branch without condition".into()))?;
        Ok(ranges_contain(self.arena.node(cond)?.info(), iteration))
    }
}

/// Arguments whose values a value node reads.
fn operands<F: Float>(node: &Node<F>) -> &[Argument<F>] {
    let args = node.args();
    match node.op() {
        OpKind::Assign | OpKind::Alias => &args[..1.min(args.len())],
        OpKind::Op(_)
        | OpKind::PlusAssign
        | OpKind::MinusAssign
        | OpKind::MultAssign
        | OpKind::DivAssign
        | OpKind::DependentMultiAssign => args,
        _ => &[],
    }
}

/// Whether `iteration` lies in one of the flattened inclusive ranges.
pub(crate) fn ranges_contain(ranges: &[usize], iteration: usize) -> bool {
    ranges
        .chunks_exact(2)
        .any(|r| iteration >= r[0] && (r[1] == OPEN_RANGE || iteration <= r[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_ranges_cover_the_tail() {
        let ranges = [0, 1, 4, OPEN_RANGE];
        assert!(ranges_contain(&ranges, 0));
        assert!(!ranges_contain(&ranges, 2));
        assert!(ranges_contain(&ranges, 100));
    }
}
