pub mod api;
pub mod dual;
pub mod error;
pub mod float;
pub mod graph;
pub mod loops;
pub mod model;
pub mod opcode;
pub mod pattern;
pub mod scalar;
pub mod sparse;
pub mod tape;
mod traits;
pub mod value;

pub use api::record;
pub use dual::Dual;
pub use error::{CgError, Result};
pub use float::Float;
pub use graph::{Arena, ArenaGuard, NodeRef, OpKind};
pub use loops::{LoopModel, NonLoopModel};
pub use model::{
    compile_all, CompileOptions, GenericModel, LibraryModel, LoopedModel, ModelCompiler, ModelLibrary,
};
pub use pattern::IndexPattern;
pub use scalar::Elementary;
pub use sparse::SparsityPattern;
pub use tape::LoopTape;
pub use value::Cg;

/// Graph value over `f64`.
pub type Cg64 = Cg<f64>;
/// Graph value over `f32`.
pub type Cg32 = Cg<f32>;
