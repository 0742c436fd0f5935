use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::graph::{with_active_arena, ArenaThreadLocal, Argument, NodeRef, OpKind, ARRAY_W, ARRAY_X};
use crate::opcode::OpCode;
use crate::value::Cg;

use super::contribution::{push, LoopScope};
use super::{LoopModel, NonLoopModel};

/// Shared state of one assembly pass. Every method records into the
/// thread-local active arena.
pub(crate) struct Assembly<'m, F: ArenaThreadLocal> {
    pub non_loop: Option<&'m NonLoopModel<F>>,
    pub loops: &'m [LoopModel<F>],
    pub x: Vec<Cg<F>>,
    pub w: Vec<Cg<F>>,
    z: Option<Vec<Cg<F>>>,
    dzdx: Option<Vec<BTreeMap<usize, Cg<F>>>>,
    d2z: BTreeMap<usize, BTreeMap<(usize, usize), Cg<F>>>,
}

impl<'m, F: ArenaThreadLocal> Assembly<'m, F> {
    /// Create the model inputs: `domain` independents and, when `weights` is
    /// given, one Hessian weight per dependent.
    pub fn new(
        non_loop: Option<&'m NonLoopModel<F>>,
        loops: &'m [LoopModel<F>],
        domain: usize,
        weights: Option<usize>,
    ) -> Result<Self> {
        let x = with_active_arena(|a| a.new_independents(ARRAY_X, domain))?;
        let w = match weights {
            Some(m) => with_active_arena(|a| a.new_independents(ARRAY_W, m))?,
            None => Vec::new(),
        };
        Ok(Assembly {
            non_loop,
            loops,
            x,
            w,
            z: None,
            dzdx: None,
            d2z: BTreeMap::new(),
        })
    }

    /// Values of the non-loop outputs (dependents, then temporaries).
    pub fn non_loop_outputs(&mut self) -> Result<&[Cg<F>]> {
        if self.z.is_none() {
            let values = match self.non_loop {
                Some(nl) => nl.tape().eval(&self.x)?,
                None => Vec::new(),
            };
            self.z = Some(values);
        }
        Ok(self.z.as_deref().unwrap_or(&[]))
    }

    /// Value of temporary `k`.
    pub fn temporary(&mut self, k: usize) -> Result<Cg<F>> {
        let offset = self.non_loop.map_or(0, |nl| nl.dependents().len());
        Ok(self.non_loop_outputs()?[offset + k])
    }

    /// `∂z_k/∂x_j` for every temporary `k` and every `j` it depends on.
    pub fn temporary_jacobian(&mut self) -> Result<&[BTreeMap<usize, Cg<F>>]> {
        if self.dzdx.is_none() {
            let mut dzdx = Vec::new();
            if let Some(nl) = self.non_loop {
                let n_dep = nl.dependents().len();
                let rows: Vec<BTreeSet<usize>> = nl
                    .jacobian_sparsity()
                    .iter()
                    .enumerate()
                    .map(|(i, row)| if i < n_dep { BTreeSet::new() } else { row.clone() })
                    .collect();
                let entries = nl.tape().jacobian_entries(&self.x, &rows)?;
                dzdx = vec![BTreeMap::new(); nl.temporary_count()];
                for ((i, j), v) in entries {
                    if !v.is_identically_zero() {
                        dzdx[i - n_dep].insert(j, v);
                    }
                }
            }
            self.dzdx = Some(dzdx);
        }
        Ok(self.dzdx.as_deref().unwrap_or(&[]))
    }

    /// `∂z_k/∂x_j` or `None` when `z_k` does not depend on `x_j`.
    pub fn temporary_derivative(&mut self, k: usize, j: usize) -> Result<Option<Cg<F>>> {
        Ok(self.temporary_jacobian()?.get(k).and_then(|row| row.get(&j)).copied())
    }

    /// Second derivatives of temporary `k` at the `requested` pairs where
    /// they are structurally nonzero. `requested` must be the same for the
    /// whole pass.
    pub fn temporary_hessian(
        &mut self,
        k: usize,
        requested: &BTreeSet<(usize, usize)>,
    ) -> Result<&BTreeMap<(usize, usize), Cg<F>>> {
        if !self.d2z.contains_key(&k) {
            let mut entries = BTreeMap::new();
            if let Some(nl) = self.non_loop {
                let out = nl.temporary_output(k);
                let pairs: BTreeSet<(usize, usize)> = requested
                    .intersection(nl.hessian_sparsity_temp(k))
                    .copied()
                    .collect();
                let seeds: Vec<Cg<F>> = (0..nl.tape().num_outputs())
                    .map(|i| Cg::constant(if i == out { F::one() } else { F::zero() }))
                    .collect();
                entries = nl.tape().hessian_entries(&self.x, &seeds, &pairs)?;
            }
            self.d2z.insert(k, entries);
        }
        Ok(&self.d2z[&k])
    }

    /// Inputs of a loop tape inside `scope`: pattern reads of the indexed
    /// independents, the non-indexed independents and the temporaries.
    pub fn loop_inputs(&mut self, lm: &LoopModel<F>, scope: &LoopScope) -> Result<Vec<Cg<F>>> {
        let mut inputs = Vec::with_capacity(lm.tape().num_inputs());
        for j in 0..lm.indexed_indeps().len() {
            inputs.push(scope.indexed_indep::<F>(ARRAY_X, lm.indexed_pattern(j).clone())?);
        }
        for p in lm.non_indexed_indeps() {
            inputs.push(self.x[p.original]);
        }
        for p in lm.temporary_indeps() {
            inputs.push(self.temporary(p.original)?);
        }
        Ok(inputs)
    }

    /// Hessian weight of every loop equation, read through its dependent
    /// pattern.
    pub fn loop_weights(&self, lm: &LoopModel<F>, scope: &LoopScope) -> Result<Vec<Cg<F>>> {
        (0..lm.equation_count())
            .map(|i| scope.indexed_indep::<F>(ARRAY_W, lm.dependent_pattern(i).clone()))
            .collect()
    }
}

/// Add the accumulator at `location` of the loop ending at `loop_end` to
/// `slot`.
///
/// A zero slot becomes a new multi-assign, an existing multi-assign gets
/// the loop appended, anything else is wrapped in a new multi-assign.
pub(crate) fn merge_loop_result<F: ArenaThreadLocal>(
    slot: &mut Cg<F>,
    loop_end: NodeRef,
    location: usize,
) -> Result<()> {
    let end = Argument::Node(loop_end);
    let existing = match *slot {
        Cg::Variable(r) => {
            let op = with_active_arena::<F, _>(|a| a.node(r).map(|n| n.op()))??;
            (op == OpKind::DependentMultiAssign).then_some(r)
        }
        Cg::Constant(_) => None,
    };
    if let Some(r) = existing {
        return with_active_arena::<F, _>(|a| a.append_arguments(r, &[end]))?;
    }
    let args = if slot.is_identically_zero() {
        vec![end]
    } else {
        vec![(*slot).into(), end]
    };
    *slot = Cg::Variable(push::<F>(OpKind::DependentMultiAssign, args, vec![location])?);
    Ok(())
}

/// `a + b` recorded in the active arena.
pub(crate) fn add<F: ArenaThreadLocal>(a: Cg<F>, b: Cg<F>) -> Result<Cg<F>> {
    with_active_arena(|arena| a.binary(OpCode::Add, b, arena))?
}

/// `a * b` recorded in the active arena.
pub(crate) fn mul<F: ArenaThreadLocal>(a: Cg<F>, b: Cg<F>) -> Result<Cg<F>> {
    with_active_arena(|arena| a.binary(OpCode::Mul, b, arena))?
}
