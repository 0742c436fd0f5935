use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::error::{CgError, Result};
use crate::float::Float;
use crate::pattern::IndexPattern;
use crate::tape::LoopTape;

use super::{next_loop_id, LoopIndexedPosition, LoopPosition};

/// Per-iteration tape pairs of one original pair.
pub type IterationPairs = Vec<BTreeSet<(usize, usize)>>;

/// Hessian classification tables of one loop.
///
/// Each table maps an original pair `(j1, j2)` to the tape pairs, per
/// iteration, whose first index reverse-maps to `j1` and second to `j2`.
#[derive(Debug, Default)]
struct HessianTables {
    sparsity: BTreeSet<(usize, usize)>,
    indexed_indexed: BTreeMap<(usize, usize), IterationPairs>,
    indexed_non_indexed: BTreeMap<(usize, usize), IterationPairs>,
    non_indexed_indexed: BTreeMap<(usize, usize), IterationPairs>,
    non_indexed_non_indexed: BTreeMap<(usize, usize), IterationPairs>,
    /// Keyed by (temporary, original indexed); tape pairs are (temporary, indexed).
    temporary_indexed: BTreeMap<(usize, usize), IterationPairs>,
}

/// One repeating structure of a model: a single-iteration tape run
/// `iterations` times with different indexes.
///
/// Tape inputs are ordered: indexed independents, then non-indexed
/// independents, then temporaries. Tape output `i` is equation `i`.
#[derive(Debug)]
pub struct LoopModel<F: Float> {
    id: usize,
    tape: LoopTape<F>,
    iterations: usize,
    /// `[equation][iteration]`
    dependents: Vec<Vec<LoopPosition>>,
    /// `[indexed tape input][iteration]`
    indexed: Vec<Vec<LoopPosition>>,
    non_indexed: Vec<LoopPosition>,
    /// `original` is the temporary's position among the model temporaries.
    temporaries: Vec<LoopPosition>,

    dependent_orig: BTreeMap<usize, LoopIndexedPosition>,
    /// Original independent → tape indexes per iteration.
    indexed_orig: BTreeMap<usize, Vec<BTreeSet<usize>>>,
    non_indexed_orig: BTreeMap<usize, LoopPosition>,
    temporary_orig: BTreeMap<usize, LoopPosition>,

    dependent_patterns: Vec<IndexPattern>,
    indexed_patterns: Vec<IndexPattern>,

    jacobian: OnceLock<Vec<BTreeSet<usize>>>,
    hessian: OnceLock<HessianTables>,
}

impl<F: Float> LoopModel<F> {
    /// Create a loop with an id from the process-wide sequence.
    ///
    /// - `dependents[i][it]`: original dependent written by equation `i` at
    ///   iteration `it`.
    /// - `indexed[j][it]`: original independent read by indexed input `j`.
    /// - `non_indexed[j]`: original independent of non-indexed input `j`.
    /// - `temporaries[k]`: model temporary fed to temporary input `k`.
    pub fn new(
        tape: LoopTape<F>,
        iterations: usize,
        dependents: Vec<Vec<usize>>,
        indexed: Vec<Vec<usize>>,
        non_indexed: Vec<usize>,
        temporaries: Vec<usize>,
    ) -> Result<Self> {
        Self::with_id(
            next_loop_id(),
            tape,
            iterations,
            dependents,
            indexed,
            non_indexed,
            temporaries,
        )
    }

    /// Create a loop with a caller-supplied id.
    pub fn with_id(
        id: usize,
        tape: LoopTape<F>,
        iterations: usize,
        dependents: Vec<Vec<usize>>,
        indexed: Vec<Vec<usize>>,
        non_indexed: Vec<usize>,
        temporaries: Vec<usize>,
    ) -> Result<Self> {
        if iterations == 0 {
            return Err(CgError::InvalidLoop(format!("loop {id} has no iterations")));
        }
        let n_inputs = indexed.len() + non_indexed.len() + temporaries.len();
        if tape.num_inputs() != n_inputs {
            return Err(CgError::SizeMismatch {
                what: "loop tape input",
                expected: n_inputs,
                actual: tape.num_inputs(),
            });
        }
        if tape.num_outputs() != dependents.len() {
            return Err(CgError::SizeMismatch {
                what: "loop tape output",
                expected: dependents.len(),
                actual: tape.num_outputs(),
            });
        }
        for per_iteration in dependents.iter().chain(indexed.iter()) {
            if per_iteration.len() != iterations {
                return Err(CgError::SizeMismatch {
                    what: "per-iteration index",
                    expected: iterations,
                    actual: per_iteration.len(),
                });
            }
        }

        let mut dependent_orig = BTreeMap::new();
        for (i, deps) in dependents.iter().enumerate() {
            for (it, &orig) in deps.iter().enumerate() {
                let pos = LoopIndexedPosition {
                    tape: i,
                    original: orig,
                    iteration: it,
                };
                if dependent_orig.insert(orig, pos).is_some() {
                    return Err(CgError::InvalidLoop(format!(
                        "dependent {orig} is written more than once by loop {id}"
                    )));
                }
            }
        }

        let mut indexed_orig: BTreeMap<usize, Vec<BTreeSet<usize>>> = BTreeMap::new();
        for (j, origs) in indexed.iter().enumerate() {
            for (it, &orig) in origs.iter().enumerate() {
                indexed_orig
                    .entry(orig)
                    .or_insert_with(|| vec![BTreeSet::new(); iterations])[it]
                    .insert(j);
            }
        }

        let n_indexed = indexed.len();
        let non_indexed: Vec<LoopPosition> = non_indexed
            .into_iter()
            .enumerate()
            .map(|(j, original)| LoopPosition {
                tape: n_indexed + j,
                original,
            })
            .collect();
        let non_indexed_orig = non_indexed.iter().map(|p| (p.original, *p)).collect();

        let offset = n_indexed + non_indexed.len();
        let temporaries: Vec<LoopPosition> = temporaries
            .into_iter()
            .enumerate()
            .map(|(k, original)| LoopPosition {
                tape: offset + k,
                original,
            })
            .collect();
        let temporary_orig = temporaries.iter().map(|p| (p.original, *p)).collect();

        let dependent_patterns = dependents.iter().map(|d| IndexPattern::detect_dense(d)).collect();
        let indexed_patterns = indexed.iter().map(|d| IndexPattern::detect_dense(d)).collect();

        let to_positions = |rows: Vec<Vec<usize>>| -> Vec<Vec<LoopPosition>> {
            rows.into_iter()
                .enumerate()
                .map(|(tape, origs)| {
                    origs
                        .into_iter()
                        .map(|original| LoopPosition { tape, original })
                        .collect()
                })
                .collect()
        };

        Ok(LoopModel {
            id,
            tape,
            iterations,
            dependents: to_positions(dependents),
            indexed: to_positions(indexed),
            non_indexed,
            temporaries,
            dependent_orig,
            indexed_orig,
            non_indexed_orig,
            temporary_orig,
            dependent_patterns,
            indexed_patterns,
            jacobian: OnceLock::new(),
            hessian: OnceLock::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn tape(&self) -> &LoopTape<F> {
        &self.tape
    }

    #[inline]
    pub fn iteration_count(&self) -> usize {
        self.iterations
    }

    #[inline]
    pub fn equation_count(&self) -> usize {
        self.dependents.len()
    }

    pub fn dependents(&self) -> &[Vec<LoopPosition>] {
        &self.dependents
    }

    pub fn indexed_indeps(&self) -> &[Vec<LoopPosition>] {
        &self.indexed
    }

    pub fn non_indexed_indeps(&self) -> &[LoopPosition] {
        &self.non_indexed
    }

    pub fn temporary_indeps(&self) -> &[LoopPosition] {
        &self.temporaries
    }

    /// Equation and iteration writing original dependent `orig`.
    pub fn dependent(&self, orig: usize) -> Option<LoopIndexedPosition> {
        self.dependent_orig.get(&orig).copied()
    }

    /// Tape position of non-indexed original independent `orig`, or `None`
    /// when the loop does not read it through a non-indexed input.
    pub fn non_indexed_indep(&self, orig: usize) -> Option<LoopPosition> {
        self.non_indexed_orig.get(&orig).copied()
    }

    /// Tape position of model temporary `k`, if the loop reads it.
    pub fn temporary_indep(&self, k: usize) -> Option<LoopPosition> {
        self.temporary_orig.get(&k).copied()
    }

    /// Indexed tape inputs reading original `orig` at iteration `it`.
    pub fn indexed_tape_indexes(&self, it: usize, orig: usize) -> Option<&BTreeSet<usize>> {
        self.indexed_orig
            .get(&orig)
            .and_then(|per_it| per_it.get(it))
            .filter(|s| !s.is_empty())
    }

    /// Indexed tape inputs reading original `orig`, for every iteration.
    pub fn indexed_tape_indexes_all(&self, orig: usize) -> Option<&[BTreeSet<usize>]> {
        self.indexed_orig.get(&orig).map(Vec::as_slice)
    }

    #[inline]
    pub fn is_indexed_independent(&self, tape: usize) -> bool {
        tape < self.indexed.len()
    }

    #[inline]
    pub fn is_temporary(&self, tape: usize) -> bool {
        tape >= self.indexed.len() + self.non_indexed.len() && tape < self.tape.num_inputs()
    }

    /// Model temporary behind temporary tape input `tape`.
    pub fn temporary_of(&self, tape: usize) -> Option<usize> {
        if self.is_temporary(tape) {
            Some(self.temporaries[tape - self.indexed.len() - self.non_indexed.len()].original)
        } else {
            None
        }
    }

    /// Original independent read by x-side tape input `tape` at `it`.
    pub fn original_indep(&self, tape: usize, it: usize) -> Option<usize> {
        if self.is_indexed_independent(tape) {
            Some(self.indexed[tape][it].original)
        } else if tape < self.indexed.len() + self.non_indexed.len() {
            Some(self.non_indexed[tape - self.indexed.len()].original)
        } else {
            None
        }
    }

    /// Output location pattern of equation `i`.
    pub fn dependent_pattern(&self, i: usize) -> &IndexPattern {
        &self.dependent_patterns[i]
    }

    /// Input index pattern of indexed input `j`.
    pub fn indexed_pattern(&self, j: usize) -> &IndexPattern {
        &self.indexed_patterns[j]
    }

    /// Input dependencies of every tape equation. Computed once.
    pub fn eval_jacobian_sparsity(&self) -> &[BTreeSet<usize>] {
        self.jacobian.get_or_init(|| self.tape.jacobian_sparsity())
    }

    /// Symmetric tape Hessian pattern. Computed once, together with the
    /// classification tables.
    pub fn eval_hessian_sparsity(&self) -> &BTreeSet<(usize, usize)> {
        &self.tables().sparsity
    }

    /// Whether the tape output depends on tape input `tape`.
    pub fn depends_on(&self, tape: usize) -> bool {
        self.eval_jacobian_sparsity().iter().any(|row| row.contains(&tape))
    }

    pub fn hessian_indexed_indexed(&self, j1: usize, j2: usize) -> &[BTreeSet<(usize, usize)>] {
        lookup(&self.tables().indexed_indexed, j1, j2)
    }

    pub fn hessian_indexed_non_indexed(&self, j1: usize, j2: usize) -> &[BTreeSet<(usize, usize)>] {
        lookup(&self.tables().indexed_non_indexed, j1, j2)
    }

    pub fn hessian_non_indexed_indexed(&self, j1: usize, j2: usize) -> &[BTreeSet<(usize, usize)>] {
        lookup(&self.tables().non_indexed_indexed, j1, j2)
    }

    pub fn hessian_non_indexed_non_indexed(&self, j1: usize, j2: usize) -> &[BTreeSet<(usize, usize)>] {
        lookup(&self.tables().non_indexed_non_indexed, j1, j2)
    }

    /// Tape pairs `(temporary, indexed)` for model temporary `k` and
    /// original indexed independent `j`.
    pub fn hessian_temporary_indexed(&self, k: usize, j: usize) -> &[BTreeSet<(usize, usize)>] {
        lookup(&self.tables().temporary_indexed, k, j)
    }

    fn tables(&self) -> &HessianTables {
        self.hessian.get_or_init(|| self.build_tables())
    }

    fn build_tables(&self) -> HessianTables {
        let sparsity = self.tape.hessian_sparsity();
        let n = self.iterations;
        let mut tables = HessianTables::default();

        for &(p, q) in &sparsity {
            for it in 0..n {
                let table = match (self.is_indexed_independent(p), self.is_indexed_independent(q)) {
                    _ if self.is_temporary(p) => {
                        if let (Some(k), true) = (self.temporary_of(p), self.is_indexed_independent(q)) {
                            let orig = self.indexed[q][it].original;
                            insert(&mut tables.temporary_indexed, (k, orig), n, it, (p, q));
                        }
                        continue;
                    }
                    _ if self.is_temporary(q) => continue,
                    (true, true) => &mut tables.indexed_indexed,
                    (true, false) => &mut tables.indexed_non_indexed,
                    (false, true) => &mut tables.non_indexed_indexed,
                    (false, false) => &mut tables.non_indexed_non_indexed,
                };
                if let (Some(j1), Some(j2)) = (self.original_indep(p, it), self.original_indep(q, it)) {
                    insert(table, (j1, j2), n, it, (p, q));
                }
            }
        }

        tracing::trace!(
            loop_id = self.id,
            tape_nnz = sparsity.len(),
            indexed_indexed = tables.indexed_indexed.len(),
            non_indexed_non_indexed = tables.non_indexed_non_indexed.len(),
            "classified loop hessian"
        );
        tables.sparsity = sparsity;
        tables
    }
}

fn insert(
    table: &mut BTreeMap<(usize, usize), IterationPairs>,
    key: (usize, usize),
    iterations: usize,
    it: usize,
    pair: (usize, usize),
) {
    table
        .entry(key)
        .or_insert_with(|| vec![BTreeSet::new(); iterations])[it]
        .insert(pair);
}

fn lookup(table: &BTreeMap<(usize, usize), IterationPairs>, j1: usize, j2: usize) -> &[BTreeSet<(usize, usize)>] {
    table.get(&(j1, j2)).map(Vec::as_slice).unwrap_or(&[])
}
