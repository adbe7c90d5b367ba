use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to parse plan document {name}: {source}")]
    ParseDocument {
        name: String,
        source: serde_json::Error,
    },
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("image encoding error: {0}")]
    Image(#[from] image::error::ImageError),
    #[error("unsupported import file: {path}")]
    UnsupportedImport { path: PathBuf },
    #[error("plan {plan_id} already exists")]
    DuplicatePlan { plan_id: String },
    #[error("page buffer of {len} bytes does not match {width}x{height} rgba")]
    InvalidPage { width: u32, height: u32, len: usize },
}

pub type MatrixResult<T> = std::result::Result<T, MatrixError>;
