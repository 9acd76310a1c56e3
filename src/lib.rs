//! Skin Analysis Fusion Library

pub mod cache;
pub mod calibrator;
pub mod config;
pub mod engine;
pub mod error;
pub mod retry;
pub mod service;
pub mod utils;

pub use config::Config;
pub use error::{AdapterError, FusionError};
pub use service::{AnalysisOptions, Focus, FusedResult, FusionEngine};
