use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{CgError, Result};
use crate::float::Float;
use crate::sparse::SparsityPattern;

use super::GenericModel;

/// A compiled function: reads the input arrays (`[x]` or `[x, w]`) and
/// writes every output.
pub type EntryPoint<F> = Arc<dyn Fn(&[&[F]], &mut [F]) -> Result<()> + Send + Sync>;

/// Metadata stored under `<model>_info`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModelInfo {
    pub name: String,
    pub domain: usize,
    pub range: usize,
    /// [`Float::type_name`] of the base type the model was compiled for.
    pub base_type: String,
}

/// One named library entry.
#[derive(Clone)]
pub enum Symbol<F> {
    Info(ModelInfo),
    Sparsity(SparsityPattern),
    Function(EntryPoint<F>),
}

impl<F> fmt::Debug for Symbol<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Info(info) => f.debug_tuple("Info").field(info).finish(),
            Symbol::Sparsity(p) => f.debug_tuple("Sparsity").field(&p.nnz()).finish(),
            Symbol::Function(_) => f.write_str("Function"),
        }
    }
}

pub(crate) const INFO: &str = "info";
pub(crate) const FORWARD_ZERO: &str = "forward_zero";
pub(crate) const JACOBIAN_SPARSITY: &str = "jacobian_sparsity";
pub(crate) const SPARSE_JACOBIAN: &str = "sparse_jacobian";
pub(crate) const HESSIAN_SPARSITY: &str = "hessian_sparsity";
pub(crate) const SPARSE_HESSIAN: &str = "sparse_hessian";

pub(crate) fn symbol_name(model: &str, entry: &str) -> String {
    format!("{model}_{entry}")
}

/// Named entry points of any number of compiled models.
#[derive(Clone, Debug, Default)]
pub struct ModelLibrary<F> {
    symbols: BTreeMap<String, Symbol<F>>,
}

impl<F: Float> ModelLibrary<F> {
    pub fn new() -> Self {
        ModelLibrary {
            symbols: BTreeMap::new(),
        }
    }

    /// Add or replace a symbol.
    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol<F>) {
        self.symbols.insert(name.into(), symbol);
    }

    /// Add or replace a function symbol.
    pub fn insert_function(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[&[F]], &mut [F]) -> Result<()> + Send + Sync + 'static,
    ) {
        self.insert(name, Symbol::Function(Arc::new(f)));
    }

    pub fn symbol(&self, name: &str) -> Option<&Symbol<F>> {
        self.symbols.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Symbol<F>> {
        self.symbols.remove(name)
    }

    /// Move every symbol of `other` into this library.
    pub fn merge(&mut self, other: ModelLibrary<F>) {
        self.symbols.extend(other.symbols);
    }

    /// Names of the models with an info entry.
    pub fn model_names(&self) -> Vec<&str> {
        self.symbols
            .values()
            .filter_map(|s| match s {
                Symbol::Info(info) => Some(info.name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Load model `name`, validating its entry points.
    pub fn model(&self, name: &str) -> Result<LibraryModel<F>> {
        let info = match self.symbols.get(&symbol_name(name, INFO)) {
            Some(Symbol::Info(info)) => info.clone(),
            _ => return Err(CgError::MissingEntryPoint(symbol_name(name, INFO))),
        };
        if info.base_type != F::type_name() {
            return Err(CgError::TypeMismatch {
                model: name.to_string(),
                expected: F::type_name(),
                found: info.base_type,
            });
        }
        if info.domain == 0 || info.range == 0 {
            return Err(CgError::InvalidModel(format!(
                "model '{name}' has domain {} and range {}",
                info.domain, info.range
            )));
        }

        let forward_zero = self.function(name, FORWARD_ZERO)?;
        let jacobian_sparsity = self.sparsity(name, JACOBIAN_SPARSITY, info.range, info.domain)?;
        let sparse_jacobian = self.function(name, SPARSE_JACOBIAN)?;
        let hessian_sparsity = self.sparsity(name, HESSIAN_SPARSITY, info.domain, info.domain)?;
        let sparse_hessian = self.function(name, SPARSE_HESSIAN)?;

        for (function, sparsity, f, s) in [
            (SPARSE_JACOBIAN, JACOBIAN_SPARSITY, &sparse_jacobian, &jacobian_sparsity),
            (SPARSE_HESSIAN, HESSIAN_SPARSITY, &sparse_hessian, &hessian_sparsity),
        ] {
            if f.is_some() && s.is_none() {
                return Err(CgError::IncompleteLibrary {
                    model: name.to_string(),
                    present: symbol_name(name, function),
                    missing: symbol_name(name, sparsity),
                });
            }
        }

        tracing::debug!(
            model = name,
            domain = info.domain,
            range = info.range,
            jacobian_nnz = jacobian_sparsity.as_ref().map(SparsityPattern::nnz),
            hessian_nnz = hessian_sparsity.as_ref().map(SparsityPattern::nnz),
            "loaded model"
        );
        Ok(LibraryModel {
            info,
            forward_zero,
            jacobian_sparsity,
            sparse_jacobian,
            hessian_sparsity,
            sparse_hessian,
        })
    }

    fn function(&self, model: &str, entry: &str) -> Result<Option<EntryPoint<F>>> {
        let name = symbol_name(model, entry);
        match self.symbols.get(&name) {
            None => Ok(None),
            Some(Symbol::Function(f)) => Ok(Some(Arc::clone(f))),
            Some(_) => Err(CgError::InvalidModel(format!("symbol '{name}' is not a function"))),
        }
    }

    fn sparsity(&self, model: &str, entry: &str, nrows: usize, ncols: usize) -> Result<Option<SparsityPattern>> {
        let name = symbol_name(model, entry);
        let pattern = match self.symbols.get(&name) {
            None => return Ok(None),
            Some(Symbol::Sparsity(p)) => p.clone(),
            Some(_) => return Err(CgError::InvalidModel(format!("symbol '{name}' is not a sparsity"))),
        };
        if pattern.rows.len() != pattern.cols.len() {
            return Err(CgError::SizeMismatch {
                what: "sparsity column",
                expected: pattern.rows.len(),
                actual: pattern.cols.len(),
            });
        }
        if pattern.nrows != nrows || pattern.ncols != ncols {
            return Err(CgError::InvalidModel(format!(
                "'{name}' is {}x{}, expected {nrows}x{ncols}",
                pattern.nrows, pattern.ncols
            )));
        }
        if let Some((r, c)) = pattern.entries().find(|&(r, c)| r >= nrows || c >= ncols) {
            return Err(CgError::InvalidModel(format!("'{name}' holds ({r}, {c}) out of bounds")));
        }
        Ok(Some(pattern))
    }
}

/// A model loaded from a [`ModelLibrary`].
#[derive(Clone)]
pub struct LibraryModel<F> {
    info: ModelInfo,
    forward_zero: Option<EntryPoint<F>>,
    jacobian_sparsity: Option<SparsityPattern>,
    sparse_jacobian: Option<EntryPoint<F>>,
    hessian_sparsity: Option<SparsityPattern>,
    sparse_hessian: Option<EntryPoint<F>>,
}

impl<F> fmt::Debug for LibraryModel<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryModel")
            .field("info", &self.info)
            .field("forward_zero", &self.forward_zero.is_some())
            .field("sparse_jacobian", &self.sparse_jacobian.is_some())
            .field("sparse_hessian", &self.sparse_hessian.is_some())
            .finish()
    }
}

impl<F: Float> LibraryModel<F> {
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn entry(&self, f: &Option<EntryPoint<F>>, entry: &str) -> Result<EntryPoint<F>> {
        f.clone()
            .ok_or_else(|| CgError::MissingEntryPoint(symbol_name(&self.info.name, entry)))
    }

    fn pattern<'a>(&self, p: &'a Option<SparsityPattern>, entry: &str) -> Result<&'a SparsityPattern> {
        p.as_ref()
            .ok_or_else(|| CgError::MissingEntryPoint(symbol_name(&self.info.name, entry)))
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(CgError::SizeMismatch { what, expected, actual })
    }
}

impl<F: Float> GenericModel<F> for LibraryModel<F> {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn domain(&self) -> usize {
        self.info.domain
    }

    fn range(&self) -> usize {
        self.info.range
    }

    fn forward_zero(&self, x: &[F], y: &mut [F]) -> Result<()> {
        let f = self.entry(&self.forward_zero, FORWARD_ZERO)?;
        check_len("independent", self.info.domain, x.len())?;
        check_len("dependent", self.info.range, y.len())?;
        f(&[x], y)
    }

    fn jacobian_sparsity(&self) -> Result<&SparsityPattern> {
        self.pattern(&self.jacobian_sparsity, JACOBIAN_SPARSITY)
    }

    fn sparse_jacobian(&self, x: &[F], values: &mut [F]) -> Result<()> {
        let f = self.entry(&self.sparse_jacobian, SPARSE_JACOBIAN)?;
        let nnz = self.jacobian_sparsity()?.nnz();
        check_len("independent", self.info.domain, x.len())?;
        check_len("jacobian nnz", nnz, values.len())?;
        f(&[x], values)
    }

    fn hessian_sparsity(&self) -> Result<&SparsityPattern> {
        self.pattern(&self.hessian_sparsity, HESSIAN_SPARSITY)
    }

    fn sparse_hessian(&self, x: &[F], w: &[F], values: &mut [F]) -> Result<()> {
        let f = self.entry(&self.sparse_hessian, SPARSE_HESSIAN)?;
        let nnz = self.hessian_sparsity()?.nnz();
        check_len("independent", self.info.domain, x.len())?;
        check_len("weight", self.info.range, w.len())?;
        check_len("hessian nnz", nnz, values.len())?;
        f(&[x, w], values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(domain: usize) -> Symbol<f64> {
        Symbol::Info(ModelInfo {
            name: "m".into(),
            domain,
            range: 1,
            base_type: "f64".into(),
        })
    }

    #[test]
    fn missing_info_is_reported() {
        let lib = ModelLibrary::<f64>::new();
        assert_eq!(
            lib.model("m").unwrap_err(),
            CgError::MissingEntryPoint("m_info".into())
        );
    }

    #[test]
    fn sparse_function_needs_its_sparsity() {
        let mut lib = ModelLibrary::<f64>::new();
        lib.insert("m_info", info(2));
        lib.insert_function("m_sparse_hessian", |_, _| Ok(()));
        assert!(matches!(
            lib.model("m"),
            Err(CgError::IncompleteLibrary { ref missing, .. }) if missing == "m_hessian_sparsity"
        ));
    }

    #[test]
    fn empty_domain_is_rejected() {
        let mut lib = ModelLibrary::<f64>::new();
        lib.insert("m_info", info(0));
        assert!(matches!(lib.model("m"), Err(CgError::InvalidModel(_))));
    }

    #[test]
    fn base_type_must_match() {
        let mut lib = ModelLibrary::<f32>::new();
        lib.insert(
            "m_info",
            Symbol::Info(ModelInfo {
                name: "m".into(),
                domain: 1,
                range: 1,
                base_type: "f64".into(),
            }),
        );
        assert!(matches!(lib.model("m"), Err(CgError::TypeMismatch { .. })));
    }
}
