use std::collections::{BTreeMap, BTreeSet};

use crate::dual::Dual;
use crate::error::{CgError, Result};
use crate::float::Float;
use crate::opcode::{self, OpCode, UNUSED};
use crate::scalar::Elementary;

impl<F: Float> super::LoopTape<F> {
    /// Reverse sweep over values from [`forward_sweep`](Self::forward_sweep).
    ///
    /// Output `k` is seeded with `seeds[k]`. Adjoints that are identically
    /// zero are skipped, which keeps symbolic sweeps from recording nodes
    /// for branches that do not contribute.
    pub fn reverse_sweep<T: Elementary<Base = F>>(
        &self,
        vals: &[T],
        seeds: &[T],
        buf: &mut Vec<T>,
    ) -> Result<()> {
        self.check_outputs(seeds.len())?;
        if vals.len() != self.opcodes.len() {
            return Err(CgError::SizeMismatch {
                what: "tape value buffer",
                expected: self.opcodes.len(),
                actual: vals.len(),
            });
        }

        buf.clear();
        buf.resize(self.opcodes.len(), T::zero());
        for (&o, &s) in self.output_indices.iter().zip(seeds) {
            buf[o as usize] = buf[o as usize] + s;
        }

        for i in (0..self.opcodes.len()).rev() {
            let op = self.opcodes[i];
            if matches!(op, OpCode::Input | OpCode::Const) {
                continue;
            }
            let adj = buf[i];
            if adj.is_identically_zero() {
                continue;
            }
            buf[i] = T::zero();

            let [a_idx, b_idx] = self.arg_indices[i];
            let a = vals[a_idx as usize];
            let (b, exp) = match op {
                OpCode::Powi => (T::zero(), opcode::powi_exp_decode(b_idx)),
                _ if b_idx != UNUSED => (vals[b_idx as usize], 0),
                _ => (T::zero(), 0),
            };
            let (da, db) = opcode::reverse_partials(op, a, b, vals[i], exp);

            buf[a_idx as usize] = buf[a_idx as usize] + da * adj;
            if op.is_binary() {
                buf[b_idx as usize] = buf[b_idx as usize] + db * adj;
            }
        }
        Ok(())
    }

    /// Weighted gradient `Σ_k w[k] ∂y_k/∂x` at `x`.
    pub fn gradient<T: Elementary<Base = F>>(&self, x: &[T], w: &[T]) -> Result<Vec<T>> {
        let mut vals = Vec::new();
        let mut adj = Vec::new();
        self.forward_sweep(x, &mut vals)?;
        self.reverse_sweep(&vals, w, &mut adj)?;
        adj.truncate(self.num_inputs());
        Ok(adj)
    }

    /// Selected first derivatives `∂y_i/∂x_j` for every `j` in `rows[i]`.
    ///
    /// One forward tangent sweep is made per distinct column.
    pub fn jacobian_entries<T: Elementary<Base = F>>(
        &self,
        x: &[T],
        rows: &[BTreeSet<usize>],
    ) -> Result<BTreeMap<(usize, usize), T>> {
        self.check_outputs(rows.len())?;
        let columns: BTreeSet<usize> = rows.iter().flatten().copied().collect();

        let mut entries = BTreeMap::new();
        let mut inputs: Vec<Dual<T>> = x.iter().map(|&xi| Dual::constant(xi)).collect();
        let mut buf = Vec::new();
        for j in columns {
            inputs[j].eps = T::one();
            self.forward_sweep(&inputs, &mut buf)?;
            inputs[j].eps = T::zero();

            for (i, row) in rows.iter().enumerate() {
                if row.contains(&j) {
                    entries.insert((i, j), buf[self.output_indices[i] as usize].eps);
                }
            }
        }
        Ok(entries)
    }

    /// Selected second derivatives of `Σ_k w[k] y_k` via forward-over-reverse.
    ///
    /// One sweep pair is made per distinct column of `pairs`.
    pub fn hessian_entries<T: Elementary<Base = F>>(
        &self,
        x: &[T],
        w: &[T],
        pairs: &BTreeSet<(usize, usize)>,
    ) -> Result<BTreeMap<(usize, usize), T>> {
        self.check_inputs(x.len())?;
        self.check_outputs(w.len())?;

        let mut by_column: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &(j1, j2) in pairs {
            by_column.entry(j2).or_default().push(j1);
        }

        let seeds: Vec<Dual<T>> = w.iter().map(|&wi| Dual::constant(wi)).collect();
        let mut inputs: Vec<Dual<T>> = x.iter().map(|&xi| Dual::constant(xi)).collect();
        let mut vals = Vec::new();
        let mut adj = Vec::new();
        let mut entries = BTreeMap::new();
        for (j2, j1s) in by_column {
            inputs[j2].eps = T::one();
            self.forward_sweep(&inputs, &mut vals)?;
            self.reverse_sweep(&vals, &seeds, &mut adj)?;
            inputs[j2].eps = T::zero();

            for j1 in j1s {
                entries.insert((j1, j2), adj[j1].eps);
            }
        }
        Ok(entries)
    }

    /// Dense numeric Jacobian, `jac[i][j] = ∂y_i/∂x_j`.
    pub fn jacobian(&self, x: &[F]) -> Result<Vec<Vec<F>>> {
        let all: BTreeSet<usize> = (0..self.num_inputs()).collect();
        let rows = vec![all; self.num_outputs()];
        let entries = self.jacobian_entries(x, &rows)?;

        let mut jac = vec![vec![F::zero(); self.num_inputs()]; self.num_outputs()];
        for ((i, j), v) in entries {
            jac[i][j] = v;
        }
        Ok(jac)
    }

    /// Dense numeric Hessian of `Σ_k w[k] y_k`.
    pub fn hessian(&self, x: &[F], w: &[F]) -> Result<Vec<Vec<F>>> {
        let n = self.num_inputs();
        let pairs: BTreeSet<(usize, usize)> =
            (0..n).flat_map(|i| (0..n).map(move |j| (i, j))).collect();
        let entries = self.hessian_entries(x, w, &pairs)?;

        let mut hess = vec![vec![F::zero(); n]; n];
        for ((i, j), v) in entries {
            hess[i][j] = v;
        }
        Ok(hess)
    }
}
