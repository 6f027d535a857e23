//! Image editing by neural style transfer or a fixed filter pipeline.
//!
//! Style transfer optimizes the pixels of an image so that its VGG19
//! activations match a content image while the Gram matrices of its
//! activations match a style image.

pub mod common;
pub mod error;
pub mod filters;
pub mod imaging;
pub mod loss;
pub mod settings;
pub mod transfer;
pub mod vgg;

pub use error::{Error, Result};
pub use filters::Pipeline;
pub use settings::Settings;
pub use transfer::{Observer, Snapshot, StyleTransfer};
pub use vgg::{FeatureExtractor, Layer, Vgg19};
