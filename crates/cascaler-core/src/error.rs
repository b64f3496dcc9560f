// crates/cascaler-core/src/error.rs
//
// Error kinds shared across the workspace. Validation and NotFound abort
// before any work starts; Decode/Carving/Io on a single item are recorded in
// that item's result; Encode/Mux abort the whole job.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CasError {
    #[error("{0}")]
    Validation(String),

    #[error("no supported media found in {0}")]
    NotFound(PathBuf),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("mux error: {0}")]
    Mux(String),

    #[error("carving failed: {0}")]
    Carving(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("config error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CasError>;

impl CasError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found<P: AsRef<Path>>(path: P) -> Self {
        Self::NotFound(path.as_ref().to_path_buf())
    }

    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    pub fn mux<S: Into<String>>(msg: S) -> Self {
        Self::Mux(msg.into())
    }

    pub fn carving<S: Into<String>>(msg: S) -> Self {
        Self::Carving(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}
