//! Whole-model decomposition, compilation and the compiled model library.
//!
//! A [`LoopedModel`] splits an original model into its non-loop equations
//! and a set of loops. [`ModelCompiler`] assembles the compressed
//! derivative graphs of a model into a [`ModelLibrary`], from which a
//! [`LibraryModel`] is loaded and evaluated through [`GenericModel`].

use std::collections::BTreeSet;

use crate::error::{CgError, Result};
use crate::float::Float;
use crate::loops::{LoopModel, NonLoopModel};
use crate::sparse::SparsityPattern;

mod compiler;
mod library;

pub use self::compiler::{compile_all, CompileOptions, ModelCompiler};
pub use self::library::{EntryPoint, LibraryModel, ModelInfo, ModelLibrary, Symbol};

/// A model of `range` equations over `domain` independents, decomposed into
/// non-loop equations and loops.
#[derive(Debug)]
pub struct LoopedModel<F: Float> {
    name: String,
    domain: usize,
    range: usize,
    non_loop: Option<NonLoopModel<F>>,
    loops: Vec<LoopModel<F>>,
}

impl<F: Float> LoopedModel<F> {
    /// Validate and assemble a model decomposition.
    ///
    /// Every dependent in `0..range` must be computed exactly once, either
    /// by the non-loop model or by one loop iteration. The non-loop tape
    /// reads the full domain and provides every temporary a loop reads.
    pub fn new(
        name: impl Into<String>,
        domain: usize,
        range: usize,
        non_loop: Option<NonLoopModel<F>>,
        loops: Vec<LoopModel<F>>,
    ) -> Result<Self> {
        let name = name.into();
        if domain == 0 || range == 0 {
            return Err(CgError::InvalidModel(format!(
                "model '{name}' has domain {domain} and range {range}"
            )));
        }

        let mut covered = vec![false; range];
        let mut cover = |orig: usize| -> Result<()> {
            match covered.get_mut(orig) {
                Some(slot) if !*slot => {
                    *slot = true;
                    Ok(())
                }
                Some(_) => Err(CgError::InvalidModel(format!("dependent {orig} is computed twice"))),
                None => Err(CgError::InvalidModel(format!(
                    "dependent {orig} is outside the range {range}"
                ))),
            }
        };

        let temporary_count = match &non_loop {
            Some(nl) => {
                if nl.tape().num_inputs() != domain {
                    return Err(CgError::SizeMismatch {
                        what: "non-loop tape input",
                        expected: domain,
                        actual: nl.tape().num_inputs(),
                    });
                }
                for &orig in nl.dependents() {
                    cover(orig)?;
                }
                nl.temporary_count()
            }
            None => 0,
        };

        for lm in &loops {
            for pos in lm.dependents().iter().flatten() {
                cover(pos.original)?;
            }
            let independents = lm
                .indexed_indeps()
                .iter()
                .flatten()
                .chain(lm.non_indexed_indeps());
            for pos in independents {
                if pos.original >= domain {
                    return Err(CgError::InvalidLoop(format!(
                        "loop {} reads independent {} outside the domain {domain}",
                        lm.id(),
                        pos.original
                    )));
                }
            }
            if let Some(pos) = lm.temporary_indeps().iter().find(|p| p.original >= temporary_count) {
                return Err(CgError::InvalidLoop(format!(
                    "loop {} reads temporary {} but only {temporary_count} exist",
                    lm.id(),
                    pos.original
                )));
            }
        }

        if let Some(missing) = covered.iter().position(|c| !c) {
            return Err(CgError::InvalidModel(format!(
                "dependent {missing} of model '{name}' is never computed"
            )));
        }

        tracing::debug!(
            model = %name,
            domain,
            range,
            loops = loops.len(),
            temporaries = temporary_count,
            "looped model"
        );
        Ok(LoopedModel {
            name,
            domain,
            range,
            non_loop,
            loops,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn domain(&self) -> usize {
        self.domain
    }

    #[inline]
    pub fn range(&self) -> usize {
        self.range
    }

    pub fn non_loop(&self) -> Option<&NonLoopModel<F>> {
        self.non_loop.as_ref()
    }

    pub fn loops(&self) -> &[LoopModel<F>] {
        &self.loops
    }

    /// Model outputs at `x`, running every loop iteration.
    pub fn evaluate(&self, x: &[F]) -> Result<Vec<F>> {
        if x.len() != self.domain {
            return Err(CgError::SizeMismatch {
                what: "independent",
                expected: self.domain,
                actual: x.len(),
            });
        }
        let mut y = vec![F::zero(); self.range];

        let mut temporaries = Vec::new();
        if let Some(nl) = &self.non_loop {
            let z = nl.tape().forward(x)?;
            let n_dep = nl.dependents().len();
            for (i, &orig) in nl.dependents().iter().enumerate() {
                y[orig] = z[i];
            }
            temporaries = z[n_dep..].to_vec();
        }

        for lm in &self.loops {
            let mut inputs = vec![F::zero(); lm.tape().num_inputs()];
            for it in 0..lm.iteration_count() {
                for (j, per_it) in lm.indexed_indeps().iter().enumerate() {
                    inputs[j] = x[per_it[it].original];
                }
                for p in lm.non_indexed_indeps() {
                    inputs[p.tape] = x[p.original];
                }
                for p in lm.temporary_indeps() {
                    inputs[p.tape] = temporaries[p.original];
                }
                let ys = lm.tape().forward(&inputs)?;
                for (i, deps) in lm.dependents().iter().enumerate() {
                    y[deps[it].original] = ys[i];
                }
            }
        }
        Ok(y)
    }

    /// Independents each dependent depends on.
    pub fn jacobian_sparsity(&self) -> Vec<BTreeSet<usize>> {
        let mut rows = vec![BTreeSet::new(); self.range];
        let temporaries = self.temporary_dependencies();

        if let Some(nl) = &self.non_loop {
            let sparsity = nl.jacobian_sparsity();
            for (i, &orig) in nl.dependents().iter().enumerate() {
                rows[orig].extend(sparsity[i].iter().copied());
            }
        }

        for lm in &self.loops {
            let sparsity = lm.eval_jacobian_sparsity();
            for (eq, deps) in lm.dependents().iter().enumerate() {
                for (it, dep) in deps.iter().enumerate() {
                    for &a in &sparsity[eq] {
                        self.original_dependencies(lm, &temporaries, a, it, &mut rows[dep.original]);
                    }
                }
            }
        }
        rows
    }

    /// Symmetric pattern of the weighted Hessian `Σ_i w_i ∂²y_i/∂x²`.
    pub fn hessian_sparsity(&self) -> BTreeSet<(usize, usize)> {
        let temporaries = self.temporary_dependencies();
        let mut pattern = BTreeSet::new();

        if let Some(nl) = &self.non_loop {
            pattern.extend(nl.hessian_sparsity_orig().iter().copied());
        }

        for lm in &self.loops {
            let mut left = BTreeSet::new();
            let mut right = BTreeSet::new();
            for &(p, q) in lm.eval_hessian_sparsity() {
                for it in 0..lm.iteration_count() {
                    left.clear();
                    right.clear();
                    self.original_dependencies(lm, &temporaries, p, it, &mut left);
                    self.original_dependencies(lm, &temporaries, q, it, &mut right);
                    for &a in &left {
                        for &b in &right {
                            pattern.insert((a, b));
                            pattern.insert((b, a));
                        }
                    }
                }
            }
            // second order through the temporaries
            if let Some(nl) = &self.non_loop {
                for p in lm.temporary_indeps() {
                    if lm.depends_on(p.tape) {
                        pattern.extend(nl.hessian_sparsity_temp(p.original).iter().copied());
                    }
                }
            }
        }
        pattern
    }

    /// Row-major compressed layout of [`jacobian_sparsity`](Self::jacobian_sparsity).
    pub fn jacobian_pattern(&self) -> SparsityPattern {
        SparsityPattern::from_sets(self.domain, &self.jacobian_sparsity())
    }

    /// Lower triangle (`row >= col`) of [`hessian_sparsity`](Self::hessian_sparsity).
    pub fn hessian_lower_pattern(&self) -> SparsityPattern {
        let entries: Vec<(usize, usize)> = self
            .hessian_sparsity()
            .into_iter()
            .filter(|&(r, c)| r >= c)
            .collect();
        SparsityPattern::from_entries(self.domain, self.domain, &entries)
    }

    fn temporary_dependencies(&self) -> Vec<BTreeSet<usize>> {
        match &self.non_loop {
            Some(nl) => (0..nl.temporary_count())
                .map(|k| nl.temporary_jacobian_sparsity(k).clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Original independents behind loop tape input `a` at iteration `it`.
    fn original_dependencies(
        &self,
        lm: &LoopModel<F>,
        temporaries: &[BTreeSet<usize>],
        a: usize,
        it: usize,
        into: &mut BTreeSet<usize>,
    ) {
        match lm.temporary_of(a) {
            Some(k) => {
                if let Some(deps) = temporaries.get(k) {
                    into.extend(deps.iter().copied());
                }
            }
            None => into.extend(lm.original_indep(a, it)),
        }
    }
}

/// A model whose zero-order values and compressed derivatives can be
/// evaluated.
///
/// Every method validates buffer sizes before any computation.
pub trait GenericModel<F: Float> {
    fn name(&self) -> &str;

    /// Number of independents.
    fn domain(&self) -> usize;

    /// Number of dependents.
    fn range(&self) -> usize;

    /// Dependents at `x` into `y`.
    fn forward_zero(&self, x: &[F], y: &mut [F]) -> Result<()>;

    fn jacobian_sparsity(&self) -> Result<&SparsityPattern>;

    /// Compressed Jacobian at `x`, laid out as [`jacobian_sparsity`](Self::jacobian_sparsity).
    fn sparse_jacobian(&self, x: &[F], values: &mut [F]) -> Result<()>;

    fn hessian_sparsity(&self) -> Result<&SparsityPattern>;

    /// Compressed weighted Hessian at `x` with one weight per dependent.
    fn sparse_hessian(&self, x: &[F], w: &[F], values: &mut [F]) -> Result<()>;

    /// Dense `range × domain` Jacobian scattered from the compressed one.
    fn jacobian(&self, x: &[F]) -> Result<Vec<Vec<F>>> {
        let pattern = self.jacobian_sparsity()?;
        let mut values = vec![F::zero(); pattern.nnz()];
        self.sparse_jacobian(x, &mut values)?;
        let mut dense = vec![vec![F::zero(); self.domain()]; self.range()];
        for ((r, c), v) in pattern.entries().zip(values) {
            dense[r][c] = v;
        }
        Ok(dense)
    }

    /// Dense `domain × domain` weighted Hessian. Entries missing from the
    /// compressed layout are filled from their mirror.
    fn hessian(&self, x: &[F], w: &[F]) -> Result<Vec<Vec<F>>> {
        let pattern = self.hessian_sparsity()?;
        let mut values = vec![F::zero(); pattern.nnz()];
        self.sparse_hessian(x, w, &mut values)?;
        let n = self.domain();
        let present: BTreeSet<(usize, usize)> = pattern.entries().collect();
        let mut dense = vec![vec![F::zero(); n]; n];
        for ((r, c), v) in pattern.entries().zip(values) {
            dense[r][c] = v;
            if !present.contains(&(c, r)) {
                dense[c][r] = v;
            }
        }
        Ok(dense)
    }
}
