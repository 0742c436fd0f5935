//! Loop models and the loop-compressed sparse derivative assemblers.
//!
//! A model is split into a [`NonLoopModel`] (equations outside any loop and
//! the temporaries that feed loops) and any number of [`LoopModel`]s. The
//! assemblers walk every requested output location, classify it against
//! each loop's per-iteration sparsity and record loop-based graph code
//! instead of one expression per iteration.

use std::sync::atomic::{AtomicUsize, Ordering};

mod context;
mod contribution;
mod forward;
mod hessian;
mod jacobian;
mod model;
mod non_loop;

pub(crate) use self::context::Assembly;
pub use self::contribution::{
    create_contribution, index_condition_ranges, HessianElement, IfBranchInfo, IfElseCache, IfElseInfo,
    LoopScope,
};
pub(crate) use self::forward::assemble_forward_zero;
pub(crate) use self::hessian::assemble_sparse_hessian;
pub(crate) use self::jacobian::assemble_sparse_jacobian;
pub use self::model::{IterationPairs, LoopModel};
pub use self::non_loop::NonLoopModel;

static NEXT_LOOP_ID: AtomicUsize = AtomicUsize::new(0);

/// Next id of the process-wide loop sequence.
pub fn next_loop_id() -> usize {
    NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed)
}

/// A tape index and the original index it stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoopPosition {
    pub tape: usize,
    pub original: usize,
}

/// A tape index, its original index and the iteration it applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LoopIndexedPosition {
    pub tape: usize,
    pub original: usize,
    pub iteration: usize,
}
