//! The array metadata model.
//!
//! [`ArrayMetadata`] fully describes a stored array: shape, chunk shape,
//! element type, and optional compressor. [`ArrayMetadataConstraints`] is the
//! partial form used at open time, where every field is optional.
//!
//! Two metadatas are *compatible* iff their [compatibility
//! keys](ArrayMetadata::compatibility_key) are equal. The key is a canonical
//! serialization of `{chunk_shape, dtype, compression}`; `shape` is
//! deliberately excluded to permit future extension.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    array_subset::{ArrayShape, ChunkShape},
    compressor::{compressor_is_registered, CompressorConfiguration},
    data_type::DataType,
};

/// The maximum dimensionality of an array.
pub const MAX_RANK: usize = 32;

/// Array metadata. Fully describes a stored array.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArrayMetadata {
    /// The extent of each dimension in elements.
    pub shape: ArrayShape,
    /// The extent of each chunk dimension in elements.
    ///
    /// The last chunk along each axis may be partial; its effective size uses
    /// the clipped extent.
    pub chunk_shape: ChunkShape,
    /// The element data type.
    pub dtype: DataType,
    /// The compressor, or [`None`] for no compression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressorConfiguration>,
}

/// An array metadata validation error.
#[derive(Debug, Error)]
pub enum ArrayMetadataError {
    /// The rank exceeds [`MAX_RANK`].
    #[error("rank {_0} exceeds the maximum supported rank of {MAX_RANK}")]
    RankTooLarge(usize),
    /// The shape and chunk shape dimensionality differ.
    #[error("shape has {_0} dimensions but chunk shape has {_1}")]
    IncompatibleChunkShape(usize, usize),
    /// The compressor id is not in the registry.
    #[error("compressor {_0:?} is not registered")]
    UnknownCompressor(String),
}

impl ArrayMetadata {
    /// Create new array metadata.
    #[must_use]
    pub fn new(
        shape: ArrayShape,
        chunk_shape: ChunkShape,
        dtype: DataType,
        compression: Option<CompressorConfiguration>,
    ) -> Self {
        Self {
            shape,
            chunk_shape,
            dtype,
            compression,
        }
    }

    /// Return the dimensionality of the array.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Validate the metadata.
    ///
    /// # Errors
    /// Returns an [`ArrayMetadataError`] if the metadata is invalid.
    pub fn validate(&self) -> Result<(), ArrayMetadataError> {
        if self.rank() > MAX_RANK {
            return Err(ArrayMetadataError::RankTooLarge(self.rank()));
        }
        if self.shape.len() != self.chunk_shape.len() {
            return Err(ArrayMetadataError::IncompatibleChunkShape(
                self.shape.len(),
                self.chunk_shape.len(),
            ));
        }
        if let Some(compression) = &self.compression {
            if !compressor_is_registered(compression.id()) {
                return Err(ArrayMetadataError::UnknownCompressor(
                    compression.id().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Return the canonical compatibility key of the metadata.
    ///
    /// The key serializes `chunk_shape`, `dtype`, and `compression` in that
    /// fixed order, with compressor parameters in key-sorted order. `shape` is
    /// excluded.
    #[must_use]
    pub fn compatibility_key(&self) -> String {
        let chunk_shape = serde_json::Value::from(
            self.chunk_shape
                .iter()
                .map(|c| c.get())
                .collect::<Vec<u64>>(),
        );
        let compression = self
            .compression
            .as_ref()
            .map_or_else(|| "null".to_string(), ToString::to_string);
        format!(
            r#"{{"chunk_shape":{chunk_shape},"dtype":"{}","compression":{compression}}}"#,
            self.dtype.identifier()
        )
    }

    /// Returns true if `other` has an equal compatibility key.
    #[must_use]
    pub fn compatible_with(&self, other: &Self) -> bool {
        self.compatibility_key() == other.compatibility_key()
    }
}

/// Partial array metadata. Mirrors [`ArrayMetadata`] with every field
/// optional.
///
/// A `compression` of `null` constrains the array to be uncompressed, whereas
/// an absent `compression` leaves it unconstrained.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ArrayMetadataConstraints {
    /// The extent of each dimension in elements, if constrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ArrayShape>,
    /// The extent of each chunk dimension in elements, if constrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_shape: Option<ChunkShape>,
    /// The element data type, if constrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DataType>,
    /// The compressor, if constrained.
    #[serde(
        default,
        deserialize_with = "deserialize_constrained_compression",
        skip_serializing_if = "Option::is_none"
    )]
    pub compression: Option<Option<CompressorConfiguration>>,
}

fn deserialize_constrained_compression<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<Option<Option<CompressorConfiguration>>, D::Error> {
    Ok(Some(Option::<CompressorConfiguration>::deserialize(d)?))
}

impl ArrayMetadataConstraints {
    /// Return the rank fixed by the constraints, or [`None`] if no indexed
    /// field is present.
    #[must_use]
    pub fn rank(&self) -> Option<usize> {
        std::cmp::max(
            self.shape.as_ref().map(Vec::len),
            self.chunk_shape.as_ref().map(Vec::len),
        )
    }
}
