use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    #[error("malformed settings: {0}")]
    Settings(#[from] serde_yaml::Error),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("invalid filter {0:?}")]
    InvalidFilter(String),
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("missing input {}, please provide an image", .0.display())]
    MissingInput(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
