use std::sync::Arc;

use tracing::instrument;

use crate::error::{CgError, Result};
use crate::graph::{evaluate, Arena, ArenaGuard, ArenaThreadLocal};
use crate::loops::{assemble_forward_zero, assemble_sparse_hessian, assemble_sparse_jacobian, Assembly};
use crate::sparse::SparsityPattern;
use crate::value::Cg;

use super::library::{
    symbol_name, EntryPoint, ModelInfo, ModelLibrary, Symbol, FORWARD_ZERO, HESSIAN_SPARSITY, INFO,
    JACOBIAN_SPARSITY, SPARSE_HESSIAN, SPARSE_JACOBIAN,
};
use super::LoopedModel;

/// Which entry points to generate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompileOptions {
    pub forward_zero: bool,
    pub sparse_jacobian: bool,
    pub sparse_hessian: bool,
    /// Jacobian elements to compute instead of the full sparsity.
    pub custom_jacobian_elements: Option<Vec<(usize, usize)>>,
    /// Hessian elements to compute instead of the lower triangle of the
    /// full sparsity.
    pub custom_hessian_elements: Option<Vec<(usize, usize)>>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            forward_zero: true,
            sparse_jacobian: true,
            sparse_hessian: true,
            custom_jacobian_elements: None,
            custom_hessian_elements: None,
        }
    }
}

/// Compiles one [`LoopedModel`] into library entry points.
///
/// Each entry point is assembled into its own arena, activated on the
/// calling thread for the duration of the assembly.
#[derive(Debug)]
pub struct ModelCompiler<'m, F: ArenaThreadLocal> {
    model: &'m LoopedModel<F>,
    options: CompileOptions,
}

impl<'m, F: ArenaThreadLocal> ModelCompiler<'m, F> {
    pub fn new(model: &'m LoopedModel<F>, options: CompileOptions) -> Self {
        ModelCompiler { model, options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile into a new library.
    pub fn compile(&self) -> Result<ModelLibrary<F>> {
        let mut library = ModelLibrary::new();
        self.compile_into(&mut library)?;
        Ok(library)
    }

    /// Compile into `library`, replacing any symbols of the same model.
    #[instrument(skip_all, fields(model = %self.model.name()))]
    pub fn compile_into(&self, library: &mut ModelLibrary<F>) -> Result<()> {
        let model = self.model;
        let name = model.name();
        library.insert(
            symbol_name(name, INFO),
            Symbol::Info(ModelInfo {
                name: name.to_string(),
                domain: model.domain(),
                range: model.range(),
                base_type: F::type_name().to_string(),
            }),
        );

        if self.options.forward_zero {
            let range = model.range();
            let f = self.entry_point(false, |asm| assemble_forward_zero(asm, range))?;
            library.insert(symbol_name(name, FORWARD_ZERO), Symbol::Function(f));
        }

        if self.options.sparse_jacobian {
            let pattern = match &self.options.custom_jacobian_elements {
                Some(elements) => {
                    check_elements(elements, model.range(), model.domain(), "jacobian")?;
                    SparsityPattern::from_entries(model.range(), model.domain(), elements)
                }
                None => model.jacobian_pattern(),
            };
            let elements: Vec<(usize, usize)> = pattern.entries().collect();
            let f = self.entry_point(false, |asm| assemble_sparse_jacobian(asm, &elements))?;
            tracing::debug!(nnz = pattern.nnz(), "sparse jacobian");
            library.insert(symbol_name(name, JACOBIAN_SPARSITY), Symbol::Sparsity(pattern));
            library.insert(symbol_name(name, SPARSE_JACOBIAN), Symbol::Function(f));
        }

        if self.options.sparse_hessian {
            let pattern = match &self.options.custom_hessian_elements {
                Some(elements) => {
                    check_elements(elements, model.domain(), model.domain(), "hessian")?;
                    SparsityPattern::from_entries(model.domain(), model.domain(), elements)
                }
                None => model.hessian_lower_pattern(),
            };
            let elements: Vec<(usize, usize)> = pattern.entries().collect();
            let f = self.entry_point(true, |asm| assemble_sparse_hessian(asm, &elements))?;
            tracing::debug!(nnz = pattern.nnz(), "sparse hessian");
            library.insert(symbol_name(name, HESSIAN_SPARSITY), Symbol::Sparsity(pattern));
            library.insert(symbol_name(name, SPARSE_HESSIAN), Symbol::Function(f));
        }
        Ok(())
    }

    /// Assemble one graph and wrap it as an entry point.
    fn entry_point(
        &self,
        weighted: bool,
        assemble: impl FnOnce(&mut Assembly<'_, F>) -> Result<Vec<Cg<F>>>,
    ) -> Result<EntryPoint<F>> {
        let model = self.model;
        let mut arena = Arena::new();
        let outputs = {
            let _guard = ArenaGuard::new(&mut arena);
            let mut asm = Assembly::new(
                model.non_loop(),
                model.loops(),
                model.domain(),
                weighted.then_some(model.range()),
            )?;
            assemble(&mut asm)?
        };
        tracing::debug!(nodes = arena.len(), outputs = outputs.len(), "assembled graph");

        let arena = Arc::new(arena);
        let n_out = outputs.len();
        let f: EntryPoint<F> = Arc::new(move |inputs: &[&[F]], out: &mut [F]| {
            if out.len() != n_out {
                return Err(CgError::SizeMismatch {
                    what: "output",
                    expected: n_out,
                    actual: out.len(),
                });
            }
            let values = evaluate(&arena, &outputs, inputs)?;
            out.copy_from_slice(&values);
            Ok(())
        });
        Ok(f)
    }
}

fn check_elements(elements: &[(usize, usize)], nrows: usize, ncols: usize, what: &str) -> Result<()> {
    match elements.iter().find(|&&(r, c)| r >= nrows || c >= ncols) {
        Some((r, c)) => Err(CgError::InvalidModel(format!(
            "custom {what} element ({r}, {c}) is outside {nrows}x{ncols}"
        ))),
        None => Ok(()),
    }
}

/// Compile several models into one library.
///
/// With the `parallel` feature the models compile on the rayon pool, each
/// into arenas owned by its worker thread.
#[instrument(skip_all, fields(models = models.len()))]
pub fn compile_all<F: ArenaThreadLocal>(
    models: &[LoopedModel<F>],
    options: &CompileOptions,
) -> Result<ModelLibrary<F>> {
    #[cfg(feature = "parallel")]
    let libraries: Vec<ModelLibrary<F>> = {
        use rayon::prelude::*;
        models
            .par_iter()
            .map(|m| ModelCompiler::new(m, options.clone()).compile())
            .collect::<Result<_>>()?
    };
    #[cfg(not(feature = "parallel"))]
    let libraries: Vec<ModelLibrary<F>> = models
        .iter()
        .map(|m| ModelCompiler::new(m, options.clone()).compile())
        .collect::<Result<_>>()?;

    let mut library = ModelLibrary::new();
    for lib in libraries {
        library.merge(lib);
    }
    Ok(library)
}
