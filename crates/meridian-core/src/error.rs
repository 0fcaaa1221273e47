use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeridianError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid FITS file {path}: {reason}")]
    InvalidFits { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame dimensions do not match: {first_height}x{first_width} vs {height}x{width}")]
    DimensionMismatch {
        first_height: usize,
        first_width: usize,
        height: usize,
        width: usize,
    },

    #[error("No valid frames could be loaded")]
    NoValidFrames,

    #[error("Could not find enough matching stars after {iterations} iterations")]
    InsufficientMatches { iterations: usize },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Registry error: {0}")]
    Registry(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MeridianError>;
