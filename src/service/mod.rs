//! Service layer module

pub mod concerns;
pub mod fusion;
pub mod recommend;
pub mod types;

pub use fusion::{EngineMetrics, FusionEngine};
pub use types::*;
