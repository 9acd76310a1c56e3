//! Analysis engine module
//!
//! Provides the perception side of the pipeline:
//! - Uniform model adapter contract and result types
//! - Lazy, coalesced adapter loading with idle unloading
//! - Built-in geometry, texture and classification adapters
//! - Pixel-level detectors and image quality estimation

pub mod adapter;
pub mod classification;
pub mod detectors;
pub mod geometry;
pub mod pool;
pub mod preprocess;
pub mod texture;

pub use adapter::{
    AdapterKind, ClassificationResult, GeometryResult, LabelScore, Landmark, ModelAdapter,
    ModelResult, TextureResult,
};
pub use detectors::{AdvancedAlgorithms, AdvancedFeatures, BasicDetectors, PixelDetectors};
pub use pool::{AdapterFactory, AdapterLoader, AdapterStatus, BuiltinAdapters};
pub use preprocess::{assess_quality, ImageQuality, Lighting};
