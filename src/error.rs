use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Tensor error: {0}")]
    Tensor(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required: {}", .0.join(", "))]
    MissingRequirements(Vec<String>),
}

impl Error {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
