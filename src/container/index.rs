//! The on-disk container index.
//!
//! A container file is a fixed-size superblock, followed by chunk payloads
//! and index blocks. The superblock points at the latest index block, a JSON
//! document describing every dataset and its chunk allocation table. Index
//! blocks and chunk payloads are appended; superseded extents are not
//! reclaimed.

use serde::{Deserialize, Serialize};

use crate::compressor::CompressorConfiguration;

use super::native_type::NativeType;

/// The container file magic number.
pub(crate) const MAGIC: [u8; 8] = [0x89, b'G', b'C', b'F', 0x0D, 0x0A, 0x1A, 0x0A];

/// The container format version.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// The size of the superblock in bytes.
pub(crate) const SUPERBLOCK_LEN: u64 = 32;

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub(crate) struct ContainerIndex {
    pub datasets: Vec<DatasetRecord>,
}

impl ContainerIndex {
    pub fn find(&self, path: &str) -> Option<&DatasetRecord> {
        self.datasets.iter().find(|record| record.path == path)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut DatasetRecord> {
        self.datasets.iter_mut().find(|record| record.path == path)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub(crate) struct DatasetRecord {
    pub path: String,
    pub dtype: NativeType,
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressorConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<AttributeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkRecord>,
}

impl DatasetRecord {
    pub fn find_chunk(&self, key: &[u64]) -> Option<&ChunkRecord> {
        self.chunks.iter().find(|chunk| chunk.key == key)
    }

    pub fn find_chunk_mut(&mut self, key: &[u64]) -> Option<&mut ChunkRecord> {
        self.chunks.iter_mut().find(|chunk| chunk.key == key)
    }
}

/// An allocated chunk extent.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub(crate) struct ChunkRecord {
    pub key: Vec<u64>,
    pub offset: u64,
    pub stored_len: u64,
    /// The allocated capacity of the extent. Rewrites that fit are performed
    /// in place; larger payloads are appended to a fresh extent.
    pub capacity: u64,
}

/// A named attribute. Attributes preserve insertion order.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub(crate) struct AttributeRecord {
    pub name: String,
    pub value: AttributeValue,
}

/// A natively typed attribute value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub(crate) enum AttributeValue {
    Int64(i64),
    Float64(f64),
    String(String),
}
