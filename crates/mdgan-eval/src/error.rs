use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid statistics file {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to load model record: {0}")]
    Record(#[from] RecorderError),

    #[error("Unsupported model file {0}, expected .mpk, .pt or .pth")]
    UnsupportedModelFormat(PathBuf),

    #[error("Feature dimensions differ: {0} vs {1}")]
    DimMismatch(usize, usize),

    #[error("Covariance of {dim}-dimensional statistics is not {dim}x{dim}")]
    BadCovariance { dim: usize },

    #[error("Class probabilities need at least one class")]
    NoClasses,

    #[error("Need at least {needed} samples, got {got}")]
    NotEnoughSamples { needed: usize, got: usize },

    #[error("Failed to write image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}
