//! Contribution synthesis: turning one per-iteration value into loop code.
//!
//! A contribution is a value computed once in the loop body and written at
//! an iteration-specific output location, possibly several times per
//! iteration. Iterations sharing a repeat count form a group. A single
//! group spanning every iteration becomes one pattern-guarded write;
//! anything else becomes an if/elseif/else chain over iteration ranges.
//! Chains are cached by their iteration partition and shared between
//! contributions that need the same partition.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{CgError, Result};
use crate::graph::{with_active_arena, ArenaThreadLocal, Argument, NodeRef, OpKind, OPEN_RANGE};
use crate::pattern::IndexPattern;
use crate::opcode::OpCode;
use crate::value::Cg;

/// Claim of one iteration of a tape-level value on an output location.
///
/// `count > 1` means the value is added that many times at the iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HessianElement {
    pub location: usize,
    /// Representative tape row of the value.
    pub row: usize,
    pub count: usize,
}

impl HessianElement {
    pub fn new(location: usize, row: usize) -> Self {
        HessianElement {
            location,
            row,
            count: 1,
        }
    }

    /// Register one more use at `location`. The location must not change.
    pub fn claim(&mut self, location: usize, pair: (usize, usize), iteration: usize) -> Result<()> {
        if location != self.location {
            return Err(CgError::ConflictingHessianElement {
                t1: pair.0,
                t2: pair.1,
                iteration,
                first: self.location,
                second: location,
            });
        }
        self.count += 1;
        Ok(())
    }
}

/// Add a claim of `(location, row)` at `iteration` to a per-iteration list.
pub(crate) fn claim(
    elements: &mut BTreeMap<usize, HessianElement>,
    iteration: usize,
    location: usize,
    pair: (usize, usize),
) -> Result<()> {
    match elements.get_mut(&iteration) {
        Some(e) => e.claim(location, pair, iteration),
        None => {
            elements.insert(iteration, HessianElement::new(location, pair.0));
            Ok(())
        }
    }
}

/// One branch of a cached if/else skeleton.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IfBranchInfo {
    pub iterations: BTreeSet<usize>,
    /// The `StartIf`, `ElseIf` or `Else` node.
    pub node: NodeRef,
}

/// A cached if/elseif/else skeleton.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IfElseInfo {
    pub branches: Vec<IfBranchInfo>,
    pub end_if: NodeRef,
}

/// If/else skeletons of one loop keyed by their iteration partition.
///
/// The key lists the partition's iteration sets ordered by size, then
/// first iteration. Sets of a partition are disjoint, so equal partitions
/// always produce equal keys.
#[derive(Debug, Default)]
pub struct IfElseCache {
    skeletons: HashMap<Vec<BTreeSet<usize>>, IfElseInfo>,
}

impl IfElseCache {
    pub fn get(&self, partition: &[BTreeSet<usize>]) -> Option<&IfElseInfo> {
        self.skeletons.get(partition)
    }

    pub fn len(&self) -> usize {
        self.skeletons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skeletons.is_empty()
    }
}

/// Loop being assembled: its structural nodes, collected results and
/// if/else cache.
#[derive(Debug)]
pub struct LoopScope {
    start: NodeRef,
    index: NodeRef,
    iterations: usize,
    results: Vec<NodeRef>,
    cache: IfElseCache,
    branches: usize,
    reused: usize,
}

impl LoopScope {
    /// Record the loop start and index nodes in the active arena.
    pub fn open<F: ArenaThreadLocal>(loop_id: usize, iterations: usize) -> Result<Self> {
        let start = push::<F>(OpKind::LoopStart, Vec::new(), vec![loop_id, iterations])?;
        let index = push::<F>(OpKind::Index, vec![Argument::Node(start)], Vec::new())?;
        Ok(LoopScope {
            start,
            index,
            iterations,
            results: Vec::new(),
            cache: IfElseCache::default(),
            branches: 0,
            reused: 0,
        })
    }

    #[inline]
    pub fn index(&self) -> NodeRef {
        self.index
    }

    #[inline]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn cache(&self) -> &IfElseCache {
        &self.cache
    }

    /// Number of branches created and of skeletons reused so far.
    pub fn branch_stats(&self) -> (usize, usize) {
        (self.branches, self.reused)
    }

    /// Register an index pattern for this loop's iteration range.
    pub fn pattern<F: ArenaThreadLocal>(&self, pattern: IndexPattern) -> Result<usize> {
        let n = self.iterations;
        with_active_arena::<F, _>(|a| a.add_index_pattern(pattern, n))
    }

    /// Input `array[pattern(iteration)]`.
    pub fn indexed_indep<F: ArenaThreadLocal>(&self, array: usize, pattern: IndexPattern) -> Result<Cg<F>> {
        let id = self.pattern::<F>(pattern)?;
        let r = push::<F>(
            OpKind::LoopIndexedIndep,
            vec![Argument::Node(self.index)],
            vec![array, id],
        )?;
        Ok(Cg::Variable(r))
    }

    /// Write `value` at location `pattern(iteration)`, adding to what is
    /// there when `add` is set.
    pub fn indexed_dep<F: ArenaThreadLocal>(&mut self, value: Cg<F>, pattern_id: usize, add: bool) -> Result<()> {
        let r = self.dep_node(value, pattern_id, add)?;
        self.results.push(r);
        Ok(())
    }

    fn dep_node<F: ArenaThreadLocal>(&self, value: Cg<F>, pattern_id: usize, add: bool) -> Result<NodeRef> {
        push::<F>(
            OpKind::LoopIndexedDep,
            vec![value.into(), Argument::Node(self.index)],
            vec![pattern_id, usize::from(add)],
        )
    }

    /// Synthesize `value` at the claimed locations and add it to the loop
    /// results. Identically zero values are dropped.
    pub fn contribute<F: ArenaThreadLocal>(
        &mut self,
        elements: &BTreeMap<usize, HessianElement>,
        value: Cg<F>,
    ) -> Result<()> {
        if value.is_identically_zero() || elements.is_empty() {
            return Ok(());
        }
        match create_contribution(self, elements, value)? {
            (v, Some(pattern)) => self.indexed_dep(v, pattern, true),
            (Cg::Variable(end_if), None) => {
                self.results.push(end_if);
                Ok(())
            }
            (Cg::Constant(_), None) => Err(CgError::InvalidGraph(
                "conditional contribution without an end-if node".into(),
            )),
        }
    }

    /// Record the loop end. Returns `None` when the loop produced nothing.
    pub fn close<F: ArenaThreadLocal>(self) -> Result<Option<NodeRef>> {
        if self.results.is_empty() {
            return Ok(None);
        }
        let mut seen = BTreeSet::new();
        let mut args = vec![Argument::Node(self.start)];
        // Shared skeletons return the same end-if for every contribution.
        args.extend(
            self.results
                .iter()
                .filter(|r| seen.insert(**r))
                .map(|&r| Argument::Node(r)),
        );
        tracing::debug!(
            results = args.len() - 1,
            branches = self.branches,
            reused_skeletons = self.reused,
            "closing loop"
        );
        push::<F>(OpKind::LoopEnd, args, Vec::new()).map(Some)
    }
}

#[inline]
pub(crate) fn push<F: ArenaThreadLocal>(op: OpKind, args: Vec<Argument<F>>, info: Vec<usize>) -> Result<NodeRef> {
    with_active_arena(|a| a.push(op, args, info))?
}

fn repeated<F: ArenaThreadLocal>(value: Cg<F>, count: usize) -> Result<Cg<F>> {
    let mut v = value;
    for _ in 1..count {
        v = with_active_arena(|a| v.binary(OpCode::Add, value, a))??;
    }
    Ok(v)
}

/// Build the loop code writing `value` at the claimed locations.
///
/// Returns `(value, Some(pattern))` when one pattern-guarded write covers
/// every iteration; the caller records the write. Otherwise the if/else
/// chain is recorded (or an identical cached one extended) and its end-if
/// node is returned. Claims at iterations past the end of the loop fail
/// with [`CgError::IncompletePartition`].
pub fn create_contribution<F: ArenaThreadLocal>(
    scope: &mut LoopScope,
    elements: &BTreeMap<usize, HessianElement>,
    value: Cg<F>,
) -> Result<(Cg<F>, Option<usize>)> {
    let n = scope.iterations;
    let covered = elements.range(..n).count();
    if covered != elements.len() {
        return Err(CgError::IncompletePartition {
            covered,
            expected: elements.len(),
        });
    }

    let mut groups: BTreeMap<usize, BTreeMap<usize, usize>> = BTreeMap::new();
    for (&it, e) in elements {
        groups.entry(e.count).or_default().insert(it, e.location);
    }

    if groups.len() == 1 {
        if let Some((&count, locations)) = groups.iter().next() {
            if locations.len() == n {
                let v = repeated(value, count)?;
                let pattern = scope.pattern::<F>(IndexPattern::detect(locations))?;
                return Ok((v, Some(pattern)));
            }
        }
    }

    let mut parts: Vec<(usize, BTreeMap<usize, usize>)> = groups.into_iter().collect();
    parts.sort_by_key(|(_, locations)| (locations.len(), locations.keys().next().copied()));
    let partition: Vec<BTreeSet<usize>> = parts
        .iter()
        .map(|(_, locations)| locations.keys().copied().collect())
        .collect();

    // Writes of each branch, built before touching the skeleton.
    let mut writes = Vec::with_capacity(parts.len());
    for (count, locations) in &parts {
        let v = repeated(value, *count)?;
        let pattern = scope.pattern::<F>(IndexPattern::detect(locations))?;
        writes.push(scope.dep_node(v, pattern, true)?);
    }

    if let Some(info) = scope.cache.get(&partition).cloned() {
        for (b, &dep) in writes.iter().enumerate() {
            let result = push::<F>(
                OpKind::CondResult,
                vec![Argument::Node(info.branches[b].node), Argument::Node(dep)],
                Vec::new(),
            )?;
            let next = info.branches.get(b + 1).map_or(info.end_if, |br| br.node);
            with_active_arena::<F, _>(|a| a.append_arguments(next, &[Argument::Node(result)]))??;
        }
        scope.reused += 1;
        tracing::trace!(branches = writes.len(), "reused if/else skeleton");
        return Ok((Cg::Variable(info.end_if), None));
    }

    let mut used: BTreeSet<usize> = BTreeSet::new();
    let mut previous: Vec<Argument<F>> = Vec::new();
    let mut start: Option<NodeRef> = None;
    let mut branches = Vec::with_capacity(parts.len());
    for (iterations, &dep) in partition.iter().zip(&writes) {
        let node = match start {
            None => {
                let cond = condition::<F>(scope.index, iterations, &used, n)?;
                let mut args = vec![Argument::Node(cond)];
                args.append(&mut previous);
                push::<F>(OpKind::StartIf, args, Vec::new())?
            }
            Some(s) if used.len() + iterations.len() == n => {
                let mut args = vec![Argument::Node(s)];
                args.append(&mut previous);
                push::<F>(OpKind::Else, args, Vec::new())?
            }
            Some(s) => {
                let cond = condition::<F>(scope.index, iterations, &used, n)?;
                let mut args = vec![Argument::Node(s), Argument::Node(cond)];
                args.append(&mut previous);
                push::<F>(OpKind::ElseIf, args, Vec::new())?
            }
        };
        start.get_or_insert(node);

        let result = push::<F>(
            OpKind::CondResult,
            vec![Argument::Node(node), Argument::Node(dep)],
            Vec::new(),
        )?;
        previous = vec![Argument::Node(result)];
        used.extend(iterations.iter().copied());
        branches.push(IfBranchInfo {
            iterations: iterations.clone(),
            node,
        });
    }
    let end_if = push::<F>(OpKind::EndIf, previous, Vec::new())?;

    scope.branches += branches.len();
    scope.cache.skeletons.insert(partition, IfElseInfo { branches, end_if });
    Ok((Cg::Variable(end_if), None))
}

fn condition<F: ArenaThreadLocal>(
    index: NodeRef,
    iterations: &BTreeSet<usize>,
    used: &BTreeSet<usize>,
    n: usize,
) -> Result<NodeRef> {
    let ranges = index_condition_ranges(iterations, used, n - 1);
    push::<F>(OpKind::IndexCondExpr, vec![Argument::Node(index)], ranges)
}

/// Inclusive iteration ranges, flattened as `[lo, hi, lo, hi, ...]`,
/// selecting `iterations` once the `used` iterations were claimed by
/// earlier branches.
///
/// Consecutive runs over claimed and new iterations become one range. A
/// run starting at iteration 0 starts the range at 0 and a run reaching
/// `max_iteration` is open ([`OPEN_RANGE`]); otherwise ranges are bounded
/// by the run's first and last new iteration.
pub fn index_condition_ranges(
    iterations: &BTreeSet<usize>,
    used: &BTreeSet<usize>,
    max_iteration: usize,
) -> Vec<usize> {
    let mut all: BTreeMap<usize, bool> = used.iter().map(|&it| (it, false)).collect();
    all.extend(iterations.iter().map(|&it| (it, true)));
    let all: Vec<(usize, bool)> = all.into_iter().collect();

    let mut info = Vec::new();
    let mut i = 0;
    while i < all.len() {
        let min = all[i].0;
        let mut max = min;
        let mut new_range: Option<(usize, usize)> = all[i].1.then_some((min, min));

        i += 1;
        while i < all.len() && all[i].0 == max + 1 {
            max = all[i].0;
            if all[i].1 {
                new_range = Some(new_range.map_or((max, max), |(lo, _)| (lo, max)));
            }
            i += 1;
        }

        if let Some((lo_new, hi_new)) = new_range {
            if lo_new == hi_new {
                info.extend([lo_new, hi_new]);
            } else {
                info.push(if min == 0 { 0 } else { lo_new });
                info.push(if max == max_iteration { OPEN_RANGE } else { hi_new });
            }
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(v: &[usize]) -> BTreeSet<usize> {
        v.iter().copied().collect()
    }

    #[test]
    fn first_branch_ranges() {
        assert_eq!(index_condition_ranges(&set(&[0, 1, 2]), &set(&[]), 5), vec![0, 2]);
        assert_eq!(index_condition_ranges(&set(&[3]), &set(&[]), 5), vec![3, 3]);
        assert_eq!(index_condition_ranges(&set(&[1, 3]), &set(&[]), 5), vec![1, 1, 3, 3]);
    }

    #[test]
    fn claimed_iterations_widen_runs() {
        // 0..=2 already taken: the run 0..=4 starts at 0.
        assert_eq!(index_condition_ranges(&set(&[3, 4]), &set(&[0, 1, 2]), 5), vec![0, 4]);
        // reaching the last iteration leaves the range open
        assert_eq!(
            index_condition_ranges(&set(&[4, 5]), &set(&[3]), 5),
            vec![4, OPEN_RANGE]
        );
    }

    #[test]
    fn repeated_claims_count() {
        let mut elements = BTreeMap::new();
        claim(&mut elements, 0, 7, (1, 0)).unwrap();
        claim(&mut elements, 0, 7, (1, 0)).unwrap();
        assert_eq!(elements[&0].count, 2);
        assert!(matches!(
            claim(&mut elements, 0, 8, (1, 0)),
            Err(CgError::ConflictingHessianElement { first: 7, second: 8, .. })
        ));
    }
}
