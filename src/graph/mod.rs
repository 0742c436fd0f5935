//! Operation graph: an index-based arena of recorded nodes.
//!
//! Nodes are stored in creation order and referenced by [`NodeRef`] handles
//! that carry the id of the arena that created them. Arguments always point
//! to existing nodes, so the graph is a DAG by construction; the only
//! mutation after creation is appending arguments to merge nodes
//! (multi-assign, branch and end-if nodes), which is checked for cycles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CgError, Result};
use crate::float::Float;
use crate::opcode::OpCode;
use crate::pattern::IndexPattern;
use crate::value::Cg;

pub mod eval;
mod thread_local;

pub use self::eval::evaluate;
pub use self::thread_local::{is_arena_active, with_active_arena, ArenaGuard, ArenaThreadLocal};

/// Input array holding the model independents.
pub const ARRAY_X: usize = 0;
/// Input array holding the Hessian weights (one per dependent).
pub const ARRAY_W: usize = 1;

/// Open upper bound of an [`OpKind::IndexCondExpr`] range.
pub const OPEN_RANGE: usize = usize::MAX;

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a node of a specific arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub(crate) arena: u64,
    pub(crate) index: u32,
}

impl NodeRef {
    /// Id of the arena that owns the node.
    #[inline]
    pub fn arena_id(&self) -> u64 {
        self.arena
    }

    /// Position of the node in creation order.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// A node argument: another node or an embedded constant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Argument<F> {
    Node(NodeRef),
    Const(F),
}

impl<F: Float> Argument<F> {
    /// The referenced node, if any.
    #[inline]
    pub fn node(&self) -> Option<NodeRef> {
        match *self {
            Argument::Node(r) => Some(r),
            Argument::Const(_) => None,
        }
    }
}

impl<F: Float> From<Cg<F>> for Argument<F> {
    fn from(value: Cg<F>) -> Self {
        match value {
            Cg::Constant(v) => Argument::Const(v),
            Cg::Variable(r) => Argument::Node(r),
        }
    }
}

impl<F: Float> From<NodeRef> for Argument<F> {
    fn from(r: NodeRef) -> Self {
        Argument::Node(r)
    }
}

/// Kind of a recorded node. The layout of `args` and `info` for each kind
/// is listed next to the variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpKind {
    // ── Values ──
    /// Model input. `info = [array, position]`.
    Independent,
    /// Explicit assignment of `args[0]`.
    Assign,
    /// Elementary operation. `Powi` keeps its encoded exponent in `info[0]`.
    Op(OpCode),
    /// `args[0] += args[1]`, the slot previously held `args[0]`.
    PlusAssign,
    MinusAssign,
    MultAssign,
    DivAssign,
    /// Another name for `args[0]`.
    Alias,
    /// Sum of plain arguments plus location `info[0]` of every `LoopEnd` argument.
    DependentMultiAssign,

    // ── Loops ──
    /// `info = [loop id, iteration count]`.
    LoopStart,
    /// `args = [LoopStart, results...]`.
    LoopEnd,
    /// Current iteration. `args = [LoopStart]`.
    Index,
    /// Input read through a pattern. `info = [array, pattern]`, `args = [Index]`.
    LoopIndexedIndep,
    /// Output write through a pattern. `info = [pattern, assign_or_add]`,
    /// `args = [value, Index]`.
    LoopIndexedDep,

    // ── Conditionals ──
    /// Inclusive iteration ranges flattened into `info`, `args = [Index]`.
    IndexCondExpr,
    /// `args = [condition, previous results...]`.
    StartIf,
    /// `args = [StartIf, condition, previous results...]`.
    ElseIf,
    /// `args = [StartIf, previous results...]`.
    Else,
    /// `args = [results of the last branch...]`.
    EndIf,
    /// `args = [branch, LoopIndexedDep]`.
    CondResult,
}

impl OpKind {
    /// Kinds whose argument list may grow after creation.
    #[inline]
    pub fn is_appendable(self) -> bool {
        matches!(
            self,
            OpKind::DependentMultiAssign
                | OpKind::StartIf
                | OpKind::ElseIf
                | OpKind::Else
                | OpKind::EndIf
        )
    }
}

/// A recorded operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Node<F> {
    op: OpKind,
    args: Vec<Argument<F>>,
    info: Vec<usize>,
    overwritten: bool,
}

impl<F: Float> Node<F> {
    #[inline]
    pub fn op(&self) -> OpKind {
        self.op
    }

    #[inline]
    pub fn args(&self) -> &[Argument<F>] {
        &self.args
    }

    #[inline]
    pub fn info(&self) -> &[usize] {
        &self.info
    }

    /// Whether a compound assignment replaced the value held by a slot
    /// that pointed to this node. Interned operations are shared by every
    /// slot that recorded them, so the flag describes the node: it is set
    /// once any of those slots is overwritten. The node's own value never
    /// changes, and readers of the old value reference the node, never the
    /// slot.
    #[inline]
    pub fn is_overwritten(&self) -> bool {
        self.overwritten
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ArgKey {
    Node(u32),
    Const(u64),
}

/// Owner of every node recorded during one session.
#[derive(Debug)]
pub struct Arena<F: Float> {
    id: u64,
    nodes: Vec<Node<F>>,
    patterns: Vec<(IndexPattern, usize)>,
    /// Structural lookup for pure elementary operations.
    interned: HashMap<(OpKind, Vec<ArgKey>, Vec<usize>), u32>,
}

impl<F: Float> Arena<F> {
    /// Create an empty arena with a process-unique id.
    pub fn new() -> Self {
        Arena {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            patterns: Vec::new(),
            interned: HashMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeRef, &Node<F>)> + '_ {
        let id = self.id;
        self.nodes.iter().enumerate().map(move |(i, node)| {
            (
                NodeRef {
                    arena: id,
                    index: i as u32,
                },
                node,
            )
        })
    }

    /// Count nodes of one kind.
    pub fn count(&self, op: OpKind) -> usize {
        self.nodes.iter().filter(|n| n.op == op).count()
    }

    /// Fail unless `r` was created by this arena.
    pub fn check_handle(&self, r: NodeRef) -> Result<()> {
        if r.arena != self.id || r.index() >= self.nodes.len() {
            return Err(CgError::StaleHandle {
                arena: r.arena,
                node: r.index,
            });
        }
        Ok(())
    }

    pub fn node(&self, r: NodeRef) -> Result<&Node<F>> {
        self.check_handle(r)?;
        Ok(&self.nodes[r.index()])
    }

    fn check_arguments(&self, args: &[Argument<F>]) -> Result<()> {
        for arg in args {
            if let Argument::Node(r) = *arg {
                self.check_handle(r)?;
            }
        }
        Ok(())
    }

    /// Append a node. Elementary operations with identical arguments are
    /// recorded once and shared.
    pub fn push(&mut self, op: OpKind, args: Vec<Argument<F>>, info: Vec<usize>) -> Result<NodeRef> {
        self.check_arguments(&args)?;
        if let OpKind::Op(_) = op {
            let key = (op, args.iter().map(arg_key).collect::<Vec<_>>(), info.clone());
            if let Some(&index) = self.interned.get(&key) {
                return Ok(self.handle(index));
            }
            let index = self.nodes.len() as u32;
            self.interned.insert(key, index);
            self.nodes.push(Node {
                op,
                args,
                info,
                overwritten: false,
            });
            return Ok(self.handle(index));
        }
        let index = self.nodes.len() as u32;
        self.nodes.push(Node {
            op,
            args,
            info,
            overwritten: false,
        });
        Ok(self.handle(index))
    }

    #[inline]
    fn handle(&self, index: u32) -> NodeRef {
        NodeRef {
            arena: self.id,
            index,
        }
    }

    /// Create an input node of `array` at `position`.
    pub fn new_independent(&mut self, array: usize, position: usize) -> Cg<F> {
        let index = self.nodes.len() as u32;
        self.nodes.push(Node {
            op: OpKind::Independent,
            args: Vec::new(),
            info: vec![array, position],
            overwritten: false,
        });
        Cg::Variable(self.handle(index))
    }

    /// Create `count` consecutive inputs of `array`.
    pub fn new_independents(&mut self, array: usize, count: usize) -> Vec<Cg<F>> {
        (0..count).map(|j| self.new_independent(array, j)).collect()
    }

    /// Append arguments to a merge node (multi-assign, branch or end-if).
    pub fn append_arguments(&mut self, target: NodeRef, args: &[Argument<F>]) -> Result<()> {
        let op = self.node(target)?.op;
        if !op.is_appendable() {
            return Err(CgError::InvalidGraph(format!(
                "arguments cannot be appended to {op:?} node {}",
                target.index
            )));
        }
        self.check_arguments(args)?;
        for arg in args {
            if let Argument::Node(r) = *arg {
                if self.reaches(r, target) {
                    return Err(CgError::InvalidGraph(format!(
                        "appending node {} to node {} would create a cycle",
                        r.index, target.index
                    )));
                }
            }
        }
        self.nodes[target.index()].args.extend_from_slice(args);
        Ok(())
    }

    /// Whether `target` is reachable from `from` through arguments.
    pub fn reaches(&self, from: NodeRef, target: NodeRef) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from.index()];
        while let Some(i) = stack.pop() {
            if i == target.index() {
                return true;
            }
            if std::mem::replace(&mut visited[i], true) {
                continue;
            }
            stack.extend(self.nodes[i].args.iter().filter_map(|a| a.node()).map(|r| r.index()));
        }
        false
    }

    /// Nodes reachable from `roots`, as a mask over creation order.
    pub fn reachable(&self, roots: impl IntoIterator<Item = NodeRef>) -> Vec<bool> {
        let mut live = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = roots.into_iter().map(|r| r.index()).collect();
        while let Some(i) = stack.pop() {
            if std::mem::replace(&mut live[i], true) {
                continue;
            }
            stack.extend(self.nodes[i].args.iter().filter_map(|a| a.node()).map(|r| r.index()));
        }
        live
    }

    /// Record that a slot holding `r` is about to receive a new value.
    ///
    /// Marks the node, not the slot: other slots sharing `r` see the flag
    /// too and keep reading the unchanged node.
    pub fn value_will_change(&mut self, r: NodeRef) -> Result<()> {
        self.check_handle(r)?;
        self.nodes[r.index()].overwritten = true;
        Ok(())
    }

    /// Register an index pattern, reusing a semantically equal one.
    pub fn add_index_pattern(&mut self, pattern: IndexPattern, iterations: usize) -> usize {
        if let Some(id) = self
            .patterns
            .iter()
            .position(|(p, n)| *n == iterations && p.equivalent(&pattern, iterations))
        {
            return id;
        }
        self.patterns.push((pattern, iterations));
        self.patterns.len() - 1
    }

    pub fn index_pattern(&self, id: usize) -> Option<&IndexPattern> {
        self.patterns.get(id).map(|(p, _)| p)
    }

    /// Number of registered index patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl<F: Float> Default for Arena<F> {
    fn default() -> Self {
        Self::new()
    }
}

fn arg_key<F: Float>(arg: &Argument<F>) -> ArgKey {
    match *arg {
        Argument::Node(r) => ArgKey::Node(r.index),
        Argument::Const(v) => ArgKey::Const(v.to_f64().unwrap_or(f64::NAN).to_bits()),
    }
}
