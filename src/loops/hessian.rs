use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CgError, Result};
use crate::graph::{ArenaThreadLocal, Argument, OpKind};
use crate::value::Cg;

use super::context::{add, merge_loop_result, mul, Assembly};
use super::contribution::{claim, push};
use super::{HessianElement, LoopModel, LoopScope};

/// One loop-body value feeding requested Hessian elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Stream {
    /// Tape second derivative at `(hi, lo)`, `hi >= lo`. A temporary side
    /// carries `Some(j)` and is chained through `∂z/∂x_j`.
    Pair {
        hi: usize,
        lo: usize,
        coef_hi: Option<usize>,
        coef_lo: Option<usize>,
    },
    /// `∂y/∂z` of temporary input `tape` times `∂²z/∂x_j1∂x_j2`.
    Second { tape: usize, j1: usize, j2: usize },
}

type Streams = BTreeMap<Stream, BTreeMap<usize, HessianElement>>;

/// Where each requested element comes from.
#[derive(Debug)]
struct Layout {
    /// Lower-triangle pair to the output location computing it.
    compute: BTreeMap<(usize, usize), usize>,
    /// `(location, source)`: upper elements whose mirror is computed.
    duplicates: Vec<(usize, usize)>,
}

fn layout(elements: &[(usize, usize)]) -> Result<Layout> {
    let mut seen = BTreeSet::new();
    let mut compute = BTreeMap::new();
    for (k, &(r, c)) in elements.iter().enumerate() {
        if !seen.insert((r, c)) {
            return Err(CgError::RepeatedHessianElement { j1: r, j2: c });
        }
        if r >= c {
            compute.insert((r, c), k);
        }
    }
    let mut duplicates = Vec::new();
    for (k, &(r, c)) in elements.iter().enumerate() {
        if r < c {
            match compute.get(&(c, r)) {
                Some(&src) => duplicates.push((k, src)),
                None => {
                    compute.insert((c, r), k);
                }
            }
        }
    }
    Ok(Layout { compute, duplicates })
}

/// Weighted Hessian `Σ_i w_i ∂²y_i/∂x²` at the requested elements, in
/// order.
///
/// Lower-triangle elements are computed, an upper element is an alias of
/// its mirror when the mirror is requested too and is otherwise computed
/// as the mirror.
pub(crate) fn assemble_sparse_hessian<F: ArenaThreadLocal>(
    asm: &mut Assembly<'_, F>,
    elements: &[(usize, usize)],
) -> Result<Vec<Cg<F>>> {
    let layout = layout(elements)?;
    let requested: BTreeSet<(usize, usize)> = layout.compute.keys().copied().collect();
    let zero = Cg::constant(F::zero());
    let mut out = vec![zero; elements.len()];

    if let Some(nl) = asm.non_loop {
        let pairs: BTreeSet<(usize, usize)> = requested
            .intersection(nl.hessian_sparsity_orig())
            .copied()
            .collect();
        if !pairs.is_empty() {
            let n_dep = nl.dependents().len();
            let seeds: Vec<Cg<F>> = (0..nl.tape().num_outputs())
                .map(|i| if i < n_dep { asm.w[nl.dependents()[i]] } else { zero })
                .collect();
            let h = nl.tape().hessian_entries(&asm.x, &seeds, &pairs)?;
            for (pair, v) in h {
                if let Some(&k) = layout.compute.get(&pair) {
                    out[k] = add(out[k], v)?;
                }
            }
        }
    }

    for lm in asm.loops {
        assemble_loop(asm, lm, &layout, &requested, &mut out)?;
    }

    for &(k, src) in &layout.duplicates {
        out[k] = match out[src] {
            Cg::Variable(r) => Cg::Variable(push::<F>(OpKind::Alias, vec![Argument::Node(r)], Vec::new())?),
            constant => constant,
        };
    }
    Ok(out)
}

fn claim_all(streams: &mut Streams, stream: Stream, iterations: usize, k: usize, pair: (usize, usize)) -> Result<()> {
    let elements = streams.entry(stream).or_default();
    for it in 0..iterations {
        claim(elements, it, k, pair)?;
    }
    Ok(())
}

/// Independent-independent contributions of one original pair.
fn claim_table(streams: &mut Streams, table: &[BTreeSet<(usize, usize)>], k: usize) -> Result<bool> {
    let mut any = false;
    for (it, pairs) in table.iter().enumerate() {
        for &(p, q) in pairs {
            let stream = Stream::Pair {
                hi: p.max(q),
                lo: p.min(q),
                coef_hi: None,
                coef_lo: None,
            };
            claim(streams.entry(stream).or_default(), it, k, (p, q))?;
            any = true;
        }
    }
    Ok(any)
}

/// Temporary-independent contributions: temporary input `t` chained
/// through `∂z/∂x_chain`, paired with the loop inputs reading `x_orig`.
fn claim_temporary_side<F: ArenaThreadLocal>(
    streams: &mut Streams,
    lm: &LoopModel<F>,
    t: usize,
    k_temp: usize,
    chain: usize,
    orig: usize,
    k: usize,
) -> Result<bool> {
    let n = lm.iteration_count();
    let mut any = false;
    if let Some(p) = lm.non_indexed_indep(orig) {
        if lm.eval_hessian_sparsity().contains(&(t, p.tape)) {
            let stream = Stream::Pair {
                hi: t,
                lo: p.tape,
                coef_hi: Some(chain),
                coef_lo: None,
            };
            claim_all(streams, stream, n, k, (t, p.tape))?;
            any = true;
        }
    }
    for (it, pairs) in lm.hessian_temporary_indexed(k_temp, orig).iter().enumerate() {
        for &(tp, a) in pairs {
            if tp != t {
                continue;
            }
            let stream = Stream::Pair {
                hi: t,
                lo: a,
                coef_hi: Some(chain),
                coef_lo: None,
            };
            claim(streams.entry(stream).or_default(), it, k, (t, a))?;
            any = true;
        }
    }
    Ok(any)
}

fn assemble_loop<F: ArenaThreadLocal>(
    asm: &mut Assembly<'_, F>,
    lm: &LoopModel<F>,
    layout: &Layout,
    requested: &BTreeSet<(usize, usize)>,
    out: &mut [Cg<F>],
) -> Result<()> {
    let n = lm.iteration_count();
    let zero = Cg::constant(F::zero());

    // (tape input, model temporary, independents the temporary depends on)
    let mut temps = Vec::with_capacity(lm.temporary_indeps().len());
    for p in lm.temporary_indeps() {
        let deps: BTreeSet<usize> = asm
            .temporary_jacobian()?
            .get(p.original)
            .map(|row| row.keys().copied().collect())
            .unwrap_or_default();
        temps.push((p.tape, p.original, deps));
    }

    let mut streams = Streams::new();
    let mut touched = BTreeSet::new();

    for (&(r, c), &k) in &layout.compute {
        let mut any = claim_table(&mut streams, lm.hessian_indexed_indexed(r, c), k)?;
        any |= claim_table(&mut streams, lm.hessian_indexed_non_indexed(r, c), k)?;
        any |= claim_table(&mut streams, lm.hessian_non_indexed_indexed(r, c), k)?;
        any |= claim_table(&mut streams, lm.hessian_non_indexed_non_indexed(r, c), k)?;

        for (t, k_temp, deps) in &temps {
            // x_r on the independent side, x_c through the temporary
            if deps.contains(&c) {
                any |= claim_temporary_side(&mut streams, lm, *t, *k_temp, c, r, k)?;
            }
            // x_r through the temporary, x_c on the independent side
            if deps.contains(&r) {
                any |= claim_temporary_side(&mut streams, lm, *t, *k_temp, r, c, k)?;
            }
        }

        for (tp, _, _) in temps.iter().filter(|(_, _, d)| d.contains(&r)) {
            for (tq, _, _) in temps.iter().filter(|(_, _, d)| d.contains(&c)) {
                if !lm.eval_hessian_sparsity().contains(&(*tp, *tq)) {
                    continue;
                }
                let stream = if tp >= tq {
                    Stream::Pair {
                        hi: *tp,
                        lo: *tq,
                        coef_hi: Some(r),
                        coef_lo: Some(c),
                    }
                } else {
                    Stream::Pair {
                        hi: *tq,
                        lo: *tp,
                        coef_hi: Some(c),
                        coef_lo: Some(r),
                    }
                };
                claim_all(&mut streams, stream, n, k, (*tp, *tq))?;
                any = true;
            }
        }

        if let Some(nl) = asm.non_loop {
            for (t, k_temp, _) in &temps {
                if lm.depends_on(*t) && nl.hessian_sparsity_temp(*k_temp).contains(&(r, c)) {
                    let stream = Stream::Second { tape: *t, j1: r, j2: c };
                    claim_all(&mut streams, stream, n, k, (*t, *t))?;
                    any = true;
                }
            }
        }

        if any {
            touched.insert(k);
        }
    }
    if streams.is_empty() {
        return Ok(());
    }

    let mut scope = LoopScope::open::<F>(lm.id(), n)?;
    let inputs = asm.loop_inputs(lm, &scope)?;
    let weights = asm.loop_weights(lm, &scope)?;

    let pairs: BTreeSet<(usize, usize)> = streams
        .keys()
        .filter_map(|s| match *s {
            Stream::Pair { hi, lo, .. } => Some((hi, lo)),
            Stream::Second { .. } => None,
        })
        .collect();
    let h = lm.tape().hessian_entries(&inputs, &weights, &pairs)?;
    let gradient = if streams.keys().any(|s| matches!(s, Stream::Second { .. })) {
        lm.tape().gradient(&inputs, &weights)?
    } else {
        Vec::new()
    };

    for (&stream, elems) in &streams {
        let value = match stream {
            Stream::Pair {
                hi,
                lo,
                coef_hi,
                coef_lo,
            } => {
                let mut v = h.get(&(hi, lo)).copied().unwrap_or(zero);
                for (side, coef) in [(hi, coef_hi), (lo, coef_lo)] {
                    if let (Some(j), Some(t)) = (coef, lm.temporary_of(side)) {
                        let dz = asm.temporary_derivative(t, j)?.unwrap_or(zero);
                        v = mul(v, dz)?;
                    }
                }
                v
            }
            Stream::Second { tape, j1, j2 } => {
                let g = gradient.get(tape).copied().unwrap_or(zero);
                let d2z = match lm.temporary_of(tape) {
                    Some(t) => asm
                        .temporary_hessian(t, requested)?
                        .get(&(j1, j2))
                        .copied()
                        .unwrap_or(zero),
                    None => zero,
                };
                mul(g, d2z)?
            }
        };
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
        "hessian loop"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::record;
    use crate::graph::{Arena, ArenaGuard};

    #[test]
    fn upper_elements_alias_their_mirror() {
        let l = layout(&[(1, 0), (0, 1), (0, 2)]).unwrap();
        assert_eq!(l.compute.get(&(1, 0)), Some(&0));
        // (0, 2) has no lower mirror and is computed in its place
        assert_eq!(l.compute.get(&(2, 0)), Some(&2));
        assert_eq!(l.duplicates, vec![(1, 0)]);
    }

    #[test]
    fn repeated_request_is_rejected() {
        assert_eq!(
            layout(&[(1, 1), (2, 1), (1, 1)]).unwrap_err(),
            CgError::RepeatedHessianElement { j1: 1, j2: 1 }
        );
    }

    #[test]
    fn alias_of_a_structural_zero_stays_constant() {
        // y_i = a * x_i * x_i: (1, 0) is structurally zero
        let n = 4;
        let tape = record(2, |v: &[Cg<f64>]| vec![v[1] * v[0] * v[0]]).unwrap();
        let lm = LoopModel::new(tape, n, vec![(0..n).collect()], vec![(0..n).collect()], vec![n], vec![]).unwrap();
        let loops = vec![lm];

        let mut arena = Arena::<f64>::new();
        let out = {
            let _guard = ArenaGuard::new(&mut arena);
            let mut asm = Assembly::new(None, &loops, n + 1, Some(n)).unwrap();
            assemble_sparse_hessian(&mut asm, &[(1, 0), (0, 1), (n, 1), (1, n)]).unwrap()
        };
        assert!(out[0].is_identically_zero());
        assert!(out[1].is_identically_zero());
        assert!(out[2].is_variable());
        let alias = arena.node(out[3].node().unwrap()).unwrap();
        assert_eq!(alias.op(), OpKind::Alias);
        assert_eq!(alias.args()[0].node(), out[2].node());
    }
}
