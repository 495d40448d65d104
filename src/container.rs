//! The container: a single file holding a hierarchy of chunked datasets.
//!
//! This module isolates the engine from the container format. The engine only
//! uses the operations exposed here: opening and closing files, creating and
//! opening datasets, hyperslab-selected reads and writes, storage sizes, and
//! JSON-valued attributes.
//!
//! Datasets are stored `CHUNKED` with per-dimension chunk extents equal to
//! the chunk shape; compression (when specified) is applied to each chunk
//! payload as it is stored. No bytes are written outside the container file.
//!
//! All native resources are scoped: files and datasets release their
//! resources when dropped, on every exit path.

mod attribute;
mod dataset;
mod file;
mod index;
mod native_type;

use thiserror::Error;

use crate::{compressor::CompressorError, data_type::UnsupportedDataTypeError};

pub use dataset::Dataset;
pub use file::{ContainerFile, OpenMode};
pub use native_type::{NativeType, TypeClass};

/// A container error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContainerError {
    /// A file, dataset, or attribute was not found.
    #[error("not found: {_0}")]
    NotFound(String),
    /// A file or dataset already exists.
    #[error("already exists: {_0}")]
    AlreadyExists(String),
    /// An invalid argument or violated precondition.
    #[error("invalid argument: {_0}")]
    InvalidArgument(String),
    /// An IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A native type with no engine counterpart.
    #[error(transparent)]
    UnsupportedType(#[from] UnsupportedDataTypeError),
    /// A compressor failure.
    #[error(transparent)]
    Compressor(#[from] CompressorError),
    /// Any other error.
    #[error("{_0}")]
    Other(String),
}

impl From<String> for ContainerError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}
