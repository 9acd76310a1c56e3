//! Shared helpers

pub mod image;
pub mod math;

pub use self::image::{decode_image, ImageSample};
