use std::collections::BTreeSet;

use crate::float::Float;
use crate::sparse::{detect_hessian_sparsity_impl, detect_jacobian_sparsity_impl, live_entries};

impl<F: Float> super::LoopTape<F> {
    /// Input dependencies of every output.
    pub fn jacobian_sparsity(&self) -> Vec<BTreeSet<usize>> {
        detect_jacobian_sparsity_impl(
            &self.opcodes,
            &self.arg_indices,
            self.num_inputs(),
            &self.output_indices,
        )
    }

    /// Symmetric Hessian pattern of the sum of all outputs.
    pub fn hessian_sparsity(&self) -> BTreeSet<(usize, usize)> {
        let outputs: Vec<usize> = (0..self.num_outputs()).collect();
        self.hessian_sparsity_for(&outputs)
    }

    /// Symmetric Hessian pattern of the sum of the selected outputs.
    pub fn hessian_sparsity_for(&self, outputs: &[usize]) -> BTreeSet<(usize, usize)> {
        let roots: Vec<u32> = outputs.iter().map(|&k| self.output_indices[k]).collect();
        let live = live_entries(&self.arg_indices, &self.opcodes, &roots);
        detect_hessian_sparsity_impl(&self.opcodes, &self.arg_indices, self.num_inputs(), &live)
    }
}
