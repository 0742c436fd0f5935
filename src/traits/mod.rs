pub mod cg_ops;
pub mod dual_ops;
