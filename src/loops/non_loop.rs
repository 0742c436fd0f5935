use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::error::{CgError, Result};
use crate::float::Float;
use crate::tape::LoopTape;

/// Equations outside every loop, plus the temporaries that loops read.
///
/// The tape reads the full model domain. Its first outputs are the
/// original dependents listed in `dependents`, the remaining
/// `temporary_count` outputs are the temporaries.
#[derive(Debug)]
pub struct NonLoopModel<F: Float> {
    tape: LoopTape<F>,
    dependents: Vec<usize>,
    temporary_count: usize,
    dependent_orig: BTreeMap<usize, usize>,
    jacobian: OnceLock<Vec<BTreeSet<usize>>>,
    hessian_orig: OnceLock<BTreeSet<(usize, usize)>>,
    hessian_temps: OnceLock<Vec<BTreeSet<(usize, usize)>>>,
}

impl<F: Float> NonLoopModel<F> {
    pub fn new(tape: LoopTape<F>, dependents: Vec<usize>, temporary_count: usize) -> Result<Self> {
        let expected = dependents.len() + temporary_count;
        if tape.num_outputs() != expected {
            return Err(CgError::SizeMismatch {
                what: "non-loop tape output",
                expected,
                actual: tape.num_outputs(),
            });
        }
        let mut dependent_orig = BTreeMap::new();
        for (i, &orig) in dependents.iter().enumerate() {
            if dependent_orig.insert(orig, i).is_some() {
                return Err(CgError::InvalidModel(format!(
                    "dependent {orig} is listed twice outside loops"
                )));
            }
        }
        Ok(NonLoopModel {
            tape,
            dependents,
            temporary_count,
            dependent_orig,
            jacobian: OnceLock::new(),
            hessian_orig: OnceLock::new(),
            hessian_temps: OnceLock::new(),
        })
    }

    #[inline]
    pub fn tape(&self) -> &LoopTape<F> {
        &self.tape
    }

    /// Original dependent of each non-loop equation.
    pub fn dependents(&self) -> &[usize] {
        &self.dependents
    }

    /// Tape output of original dependent `orig`, if it is computed here.
    pub fn equation(&self, orig: usize) -> Option<usize> {
        self.dependent_orig.get(&orig).copied()
    }

    #[inline]
    pub fn temporary_count(&self) -> usize {
        self.temporary_count
    }

    /// Tape output holding temporary `k`.
    #[inline]
    pub fn temporary_output(&self, k: usize) -> usize {
        self.dependents.len() + k
    }

    /// Input dependencies of every tape output. Computed once.
    pub fn jacobian_sparsity(&self) -> &[BTreeSet<usize>] {
        self.jacobian.get_or_init(|| self.tape.jacobian_sparsity())
    }

    /// Independents temporary `k` depends on.
    pub fn temporary_jacobian_sparsity(&self, k: usize) -> &BTreeSet<usize> {
        &self.jacobian_sparsity()[self.temporary_output(k)]
    }

    /// Symmetric Hessian pattern of the original equations.
    pub fn hessian_sparsity_orig(&self) -> &BTreeSet<(usize, usize)> {
        self.hessian_orig.get_or_init(|| {
            let outputs: Vec<usize> = (0..self.dependents.len()).collect();
            self.tape.hessian_sparsity_for(&outputs)
        })
    }

    /// Symmetric Hessian pattern of temporary `k`.
    pub fn hessian_sparsity_temp(&self, k: usize) -> &BTreeSet<(usize, usize)> {
        let temps = self.hessian_temps.get_or_init(|| {
            (0..self.temporary_count)
                .map(|k| self.tape.hessian_sparsity_for(&[self.temporary_output(k)]))
                .collect()
        });
        &temps[k]
    }
}
