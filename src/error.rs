//! Error taxonomy shared by graph recording, loop assembly and model loading.

/// Errors raised while recording, assembling or invoking a model.
///
/// Every variant is a fail-fast condition. Lookups that merely miss (an
/// original index that a loop does not use) are reported with `Option`
/// instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CgError {
    // ── Precondition violations ──
    #[error("operands belong to different arenas ({left} and {right})")]
    ArenaMismatch { left: u64, right: u64 },

    #[error("node {node} of arena {arena} is used outside its recording session")]
    StaleHandle { arena: u64, node: u32 },

    #[error("no active arena on this thread")]
    NoActiveArena,

    #[error("invalid {what} size: expected {expected}, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("entry point '{0}' is not available")]
    MissingEntryPoint(String),

    #[error("model '{model}' provides '{present}' but not '{missing}'")]
    IncompleteLibrary {
        model: String,
        present: String,
        missing: String,
    },

    #[error("model '{model}' was compiled for '{found}', requested '{expected}'")]
    TypeMismatch {
        model: String,
        expected: &'static str,
        found: String,
    },

    // ── Structural inconsistencies ──
    #[error("repeated hessian element requested for original pair ({j1}, {j2})")]
    RepeatedHessianElement { j1: usize, j2: usize },

    #[error(
        "conflicting claims for iteration {iteration} of tape pair ({t1}, {t2}): \
         locations {first} and {second}"
    )]
    ConflictingHessianElement {
        t1: usize,
        t2: usize,
        iteration: usize,
        first: usize,
        second: usize,
    },

    #[error("iteration partition covers {covered} of {expected} iterations")]
    IncompletePartition { covered: usize, expected: usize },

    #[error("invalid loop: {0}")]
    InvalidLoop(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("operation {0} cannot be used here")]
    UnsupportedOperation(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CgError>;
