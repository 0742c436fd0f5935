use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CgError, Result};
use crate::graph::ArenaThreadLocal;
use crate::value::Cg;

use super::context::{merge_loop_result, mul, Assembly};
use super::contribution::claim;
use super::{HessianElement, LoopModel, LoopScope};

/// A tape derivative `∂y_eq/∂a` of one loop, optionally chained through
/// `∂z/∂x_col` when `a` is a temporary.
type JacobianStream = (usize, usize, Option<usize>);

/// Requested Jacobian elements, in order. Elements are `(dependent,
/// independent)` pairs and must be unique.
pub(crate) fn assemble_sparse_jacobian<F: ArenaThreadLocal>(
    asm: &mut Assembly<'_, F>,
    elements: &[(usize, usize)],
) -> Result<Vec<Cg<F>>> {
    let mut location = BTreeMap::new();
    for (k, &(row, col)) in elements.iter().enumerate() {
        if location.insert((row, col), k).is_some() {
            return Err(CgError::InvalidModel(format!(
                "jacobian element ({row}, {col}) is requested twice"
            )));
        }
    }

    let mut out = vec![Cg::constant(F::zero()); elements.len()];

    if let Some(nl) = asm.non_loop {
        let sparsity = nl.jacobian_sparsity();
        let mut rows = vec![BTreeSet::new(); nl.tape().num_outputs()];
        let mut any = false;
        for &(row, col) in location.keys() {
            if let Some(i) = nl.equation(row) {
                if sparsity[i].contains(&col) {
                    rows[i].insert(col);
                    any = true;
                }
            }
        }
        if any {
            let entries = nl.tape().jacobian_entries(&asm.x, &rows)?;
            for ((i, col), v) in entries {
                if let Some(&k) = location.get(&(nl.dependents()[i], col)) {
                    out[k] = v;
                }
            }
        }
    }

    for lm in asm.loops {
        assemble_loop(asm, lm, &location, &mut out)?;
    }
    Ok(out)
}

fn assemble_loop<F: ArenaThreadLocal>(
    asm: &mut Assembly<'_, F>,
    lm: &LoopModel<F>,
    location: &BTreeMap<(usize, usize), usize>,
    out: &mut [Cg<F>],
) -> Result<()> {
    let sparsity = lm.eval_jacobian_sparsity();
    let mut streams: BTreeMap<JacobianStream, BTreeMap<usize, HessianElement>> = BTreeMap::new();
    let mut needed = vec![BTreeSet::new(); lm.equation_count()];
    let mut touched = BTreeSet::new();

    for (&(row, col), &k) in location {
        let Some(pos) = lm.dependent(row) else {
            continue;
        };
        let (eq, it) = (pos.tape, pos.iteration);
        for &a in &sparsity[eq] {
            let chain = match lm.temporary_of(a) {
                Some(t) => {
                    if asm.temporary_derivative(t, col)?.is_none() {
                        continue;
                    }
                    Some(col)
                }
                None if lm.original_indep(a, it) == Some(col) => None,
                None => continue,
            };
            claim(streams.entry((eq, a, chain)).or_default(), it, k, (eq, a))?;
            needed[eq].insert(a);
            touched.insert(k);
        }
    }
    if streams.is_empty() {
        return Ok(());
    }

    let mut scope = LoopScope::open::<F>(lm.id(), lm.iteration_count())?;
    let inputs = asm.loop_inputs(lm, &scope)?;
    let jac = lm.tape().jacobian_entries(&inputs, &needed)?;

    for (&(eq, a, chain), elems) in &streams {
        let mut value = jac.get(&(eq, a)).copied().unwrap_or(Cg::constant(F::zero()));
        if let (Some(col), Some(t)) = (chain, lm.temporary_of(a)) {
            let dz = asm.temporary_derivative(t, col)?.unwrap_or(Cg::constant(F::zero()));
            value = mul(value, dz)?;
        }
        scope.contribute(elems, value)?;
    }

    let (branches, reused) = scope.branch_stats();
    if let Some(end) = scope.close::<F>()? {
        for &k in &touched {
            merge_loop_result(&mut out[k], end, k)?;
        }
    }
    tracing::debug!(
        loop_id = lm.id(),
        streams = streams.len(),
        elements = touched.len(),
        branches,
        reused,
        "jacobian loop"
    );
    Ok(())
}
