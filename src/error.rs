//! Error types for the AC-GAN compositing library

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid dimension relationships or option values
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Filename does not follow the pose-annotation schema
    #[error("Malformed pose filename '{file}': {reason}")]
    FormatError { file: String, reason: String },

    /// No qualifying files under a dataset root
    #[error("Found 0 files in subfolders of {}; supported extensions are: {}", root.display(), extensions.join(","))]
    EmptyDatasetError {
        root: PathBuf,
        extensions: Vec<String>,
    },

    /// Synthetic class folder missing from the real-sample taxonomy
    #[error("Class folder '{class}' under {} has no counterpart in the real-sample classes", root.display())]
    UnknownClassError { class: String, root: PathBuf },

    /// Filesystem error
    #[error("IO error at {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image could not be decoded
    #[error("Failed to decode image {}: {source}", path.display())]
    ImageError {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Tensor or image lacks an expected component
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Tensor shapes that must agree do not
    #[error("Shape mismatch: {0}")]
    ShapeMismatchError(String),

    /// A loss evaluated to NaN or infinity
    #[error("Non-finite {which} loss ({value}) at epoch {epoch}, batch {batch}")]
    NonFiniteLossError {
        which: &'static str,
        value: f64,
        epoch: usize,
        batch: usize,
    },

    /// libtorch error
    #[error("Torch error: {0}")]
    TorchError(#[from] tch::TchError),
}

impl Error {
    /// Attach a path to an IO error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoError {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for a shape mismatch between two named tensors
    pub fn mismatch(what: &str, expected: &[i64], actual: &[i64]) -> Self {
        Error::ShapeMismatchError(format!("{what}: expected {expected:?}, got {actual:?}"))
    }

    /// Whether the error comes from dataset construction rather than training
    pub fn is_dataset_error(&self) -> bool {
        matches!(
            self,
            Error::FormatError { .. }
                | Error::EmptyDatasetError { .. }
                | Error::UnknownClassError { .. }
        )
    }
}
