//! Schema negotiation.
//!
//! [`effective_metadata`] merges a user [`Schema`] and optional
//! [`ArrayMetadataConstraints`] against any pre-existing container metadata,
//! producing the effective [`ArrayMetadata`] a driver handle is opened with.
//!
//! Merging rules per field:
//! - `rank`: all sources must agree if present.
//! - `shape`, `dtype`, `chunk_shape`, `compression`: all present sources must
//!   agree; absent fields are filled from the remaining sources.
//! - new datasets default `chunk_shape` to the shape itself (single chunk).
//! - fill values and dimension units are rejected.

use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    array_subset::{ArrayShape, ChunkShape},
    compressor::CompressorConfiguration,
    data_type::DataType,
    metadata::{ArrayMetadata, ArrayMetadataConstraints, ArrayMetadataError},
};

/// Chunk layout constraints of a [`Schema`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct ChunkLayoutConstraints {
    /// The grid origin. Must be all zeros when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_origin: Option<Vec<u64>>,
    /// The inner order. Must be the identity permutation when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_order: Option<Vec<usize>>,
    /// The per-dimension chunk extent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkShape>,
}

/// The chunk layout of an open array.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    /// The grid origin; always all zeros.
    pub grid_origin: Vec<u64>,
    /// The inner order; always the identity permutation.
    pub inner_order: Vec<usize>,
    /// The per-dimension chunk extent.
    pub chunk: ArrayShape,
}

/// A user-supplied dataset schema.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    /// The element data type.
    pub dtype: Option<DataType>,
    /// The array shape.
    pub shape: Option<ArrayShape>,
    /// Chunk layout constraints.
    pub chunk_layout: Option<ChunkLayoutConstraints>,
    /// The compressor.
    pub compression: Option<CompressorConfiguration>,
    /// A fill value. Unsupported; rejected when present.
    pub fill_value: Option<serde_json::Value>,
    /// Dimension units. Unsupported; rejected when present.
    pub dimension_units: Option<Vec<String>>,
}

/// A schema negotiation error.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Sources disagree on the rank.
    #[error("rank {got} does not match rank {expected}")]
    RankMismatch {
        /// The conflicting rank.
        got: usize,
        /// The rank fixed by an earlier source.
        expected: usize,
    },
    /// Sources disagree on the shape or chunk shape.
    #[error("{field:?} mismatch: expected {expected}, got {got}")]
    ShapeMismatch {
        /// The mismatched field.
        field: &'static str,
        /// The value fixed by an earlier source.
        expected: String,
        /// The conflicting value.
        got: String,
    },
    /// Sources disagree on the data type.
    #[error("\"dtype\" mismatch: expected {expected}, got {got}")]
    DtypeMismatch {
        /// The data type fixed by an earlier source.
        expected: DataType,
        /// The conflicting data type.
        got: DataType,
    },
    /// Sources disagree on the compressor.
    #[error("\"compression\" mismatch: expected {expected}, got {got}")]
    CompressorMismatch {
        /// The compressor fixed by an earlier source.
        expected: String,
        /// The conflicting compressor.
        got: String,
    },
    /// A feature the driver does not support.
    #[error("{_0} is not supported")]
    UnsupportedFeature(&'static str),
    /// The sources do not determine a complete metadata.
    #[error("cannot determine metadata: {_0:?} must be specified")]
    IncompleteSpec(&'static str),
    /// An invalid chunk layout.
    #[error("invalid chunk layout: {_0}")]
    InvalidChunkLayout(String),
    /// The effective metadata is invalid.
    #[error(transparent)]
    Metadata(#[from] ArrayMetadataError),
}

fn display_compression(compression: &Option<CompressorConfiguration>) -> String {
    compression
        .as_ref()
        .map_or_else(|| "null".to_string(), ToString::to_string)
}

/// Derive the effective [`ArrayMetadata`] for opening a dataset.
///
/// When `existing` is present (the dataset already exists in the container),
/// its decoded metadata fixes every field; the constraints and schema are
/// validated for compatibility against it. Otherwise metadata is synthesized
/// from the constraints and schema.
///
/// # Errors
/// Returns a [`SchemaError`] if the sources are inconsistent, incomplete, or
/// request unsupported features.
pub fn effective_metadata(
    constraints: &ArrayMetadataConstraints,
    schema: &Schema,
    existing: Option<&ArrayMetadata>,
) -> Result<ArrayMetadata, SchemaError> {
    if schema.fill_value.is_some() {
        return Err(SchemaError::UnsupportedFeature("fill_value"));
    }
    if schema.dimension_units.is_some() {
        return Err(SchemaError::UnsupportedFeature("dimension_units"));
    }
    let layout = schema.chunk_layout.as_ref();
    if let Some(layout) = layout {
        if let Some(grid_origin) = &layout.grid_origin {
            if grid_origin.iter().any(|&origin| origin != 0) {
                return Err(SchemaError::InvalidChunkLayout(format!(
                    "grid_origin {grid_origin:?} must be all zeros"
                )));
            }
        }
        if let Some(inner_order) = &layout.inner_order {
            if !inner_order
                .iter()
                .enumerate()
                .all(|(dimension, &order)| dimension == order)
            {
                return Err(SchemaError::UnsupportedFeature("non-identity inner_order"));
            }
        }
    }

    // Rank: all sources must agree if present.
    let mut rank: Option<usize> = None;
    let sources = [
        existing.map(ArrayMetadata::rank),
        constraints.shape.as_ref().map(Vec::len),
        constraints.chunk_shape.as_ref().map(Vec::len),
        schema.shape.as_ref().map(Vec::len),
        layout.and_then(|layout| layout.chunk.as_ref()).map(Vec::len),
        layout
            .and_then(|layout| layout.grid_origin.as_ref())
            .map(Vec::len),
        layout
            .and_then(|layout| layout.inner_order.as_ref())
            .map(Vec::len),
    ];
    for source in sources.into_iter().flatten() {
        match rank {
            Some(expected) if expected != source => {
                return Err(SchemaError::RankMismatch {
                    got: source,
                    expected,
                })
            }
            _ => rank = Some(source),
        }
    }

    // Data type: all present sources must be equal.
    let mut dtype: Option<DataType> = existing.map(|metadata| metadata.dtype);
    for source in [constraints.dtype, schema.dtype].into_iter().flatten() {
        match dtype {
            Some(expected) if expected != source => {
                return Err(SchemaError::DtypeMismatch {
                    expected,
                    got: source,
                })
            }
            _ => dtype = Some(source),
        }
    }
    let dtype = dtype.ok_or(SchemaError::IncompleteSpec("dtype"))?;

    // Shape: all present sources must be equal.
    let mut shape: Option<ArrayShape> = existing.map(|metadata| metadata.shape.clone());
    for source in [constraints.shape.clone(), schema.shape.clone()]
        .into_iter()
        .flatten()
    {
        match &shape {
            Some(expected) if *expected != source => {
                return Err(SchemaError::ShapeMismatch {
                    field: "shape",
                    expected: format!("{expected:?}"),
                    got: format!("{source:?}"),
                })
            }
            _ => shape = Some(source),
        }
    }
    let shape = shape.ok_or(SchemaError::IncompleteSpec("shape"))?;

    // Chunk shape: all present sources must be equal; new datasets fall back
    // to a single chunk spanning the shape.
    let mut chunk_shape: Option<ChunkShape> = existing.map(|metadata| metadata.chunk_shape.clone());
    for source in [
        constraints.chunk_shape.clone(),
        layout.and_then(|layout| layout.chunk.clone()),
    ]
    .into_iter()
    .flatten()
    {
        match &chunk_shape {
            Some(expected) if *expected != source => {
                return Err(SchemaError::ShapeMismatch {
                    field: "chunk_shape",
                    expected: format!("{expected:?}"),
                    got: format!("{source:?}"),
                })
            }
            _ => chunk_shape = Some(source),
        }
    }
    let chunk_shape = chunk_shape.unwrap_or_else(|| {
        shape
            .iter()
            .map(|&extent| NonZeroU64::new(extent.max(1)).expect("max(1) is nonzero"))
            .collect()
    });

    // Compression: all present sources must be structurally equal. An
    // existing dataset and a `null` constraint both fix "no compression".
    let mut compression: Option<Option<CompressorConfiguration>> =
        existing.map(|metadata| metadata.compression.clone());
    for source in [
        constraints.compression.clone(),
        schema.compression.clone().map(Some),
    ]
    .into_iter()
    .flatten()
    {
        match &compression {
            Some(expected) if *expected != source => {
                return Err(SchemaError::CompressorMismatch {
                    expected: display_compression(expected),
                    got: display_compression(&source),
                })
            }
            _ => compression = Some(source),
        }
    }
    let compression = compression.flatten();

    let metadata = ArrayMetadata::new(shape, chunk_shape, dtype, compression);
    metadata.validate()?;
    Ok(metadata)
}
