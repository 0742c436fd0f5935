use std::fmt::{Debug, Display};

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

/// Marker trait for base floating-point types (`f32`, `f64`).
///
/// Bundles the numeric and utility traits needed throughout loopcg.
/// Only primitive float types implement this. Graph values and dual
/// numbers are built on top of it.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
    /// Name recorded in compiled model metadata and checked at load time.
    fn type_name() -> &'static str;
}

impl Float for f32 {
    fn type_name() -> &'static str {
        "f32"
    }
}

impl Float for f64 {
    fn type_name() -> &'static str {
        "f64"
    }
}
