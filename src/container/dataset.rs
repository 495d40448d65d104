//! Datasets and hyperslab-selected IO.

use std::{
    io::{Read, Seek, SeekFrom, Write},
    num::NonZeroU64,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    array_subset::{chunk_shape_to_array_shape, ArraySubset, ChunkShape},
    compressor::Compressor,
    data_type::DataType,
};

use super::{
    attribute::{attribute_to_record, logical_name, record_to_json},
    file::FileInner,
    index::ChunkRecord,
    native_type::NativeType,
    ContainerError,
};

/// A dataset inside a [`ContainerFile`](super::ContainerFile).
///
/// A dataset handle keeps the container file alive. Handles are not
/// thread-safe at the container level; all hyperslab, storage size, and
/// attribute operations against one dataset are serialized by a per-dataset
/// mutex.
pub struct Dataset {
    inner: Arc<FileInner>,
    path: String,
    native: NativeType,
    shape: Vec<u64>,
    chunk_shape: ChunkShape,
    compressor: Option<Compressor>,
    /// Serializes all operations against this dataset.
    io: Mutex<()>,
}

impl Dataset {
    pub(crate) fn new(
        inner: Arc<FileInner>,
        path: String,
        native: NativeType,
        shape: Vec<u64>,
        chunk_shape: ChunkShape,
        compressor: Option<Compressor>,
    ) -> Self {
        Self {
            inner,
            path,
            native,
            shape,
            chunk_shape,
            compressor,
            io: Mutex::new(()),
        }
    }

    /// Return the path of the dataset inside the container.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Return the shape of the dataset.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Return the chunk shape of the dataset.
    #[must_use]
    pub fn chunk_shape(&self) -> &[NonZeroU64] {
        &self.chunk_shape
    }

    /// Return the native type of the dataset.
    #[must_use]
    pub const fn native_type(&self) -> NativeType {
        self.native
    }

    /// Read the hyperslab at `offsets` with `extents` into `out`.
    ///
    /// Unallocated extents read back as zeroes.
    ///
    /// # Errors
    /// Returns [`ContainerError::InvalidArgument`] on violated preconditions
    /// (memory type size mismatch, out of bounds selection, or wrong buffer
    /// size) and [`ContainerError::Io`] on IO errors.
    pub fn read_hyperslab(
        &self,
        offsets: &[u64],
        extents: &[u64],
        dtype: DataType,
        out: &mut [u8],
    ) -> Result<(), ContainerError> {
        let _io = self.io.lock();
        let region = self.check_transfer(offsets, extents, dtype, out.len())?;
        if region.is_empty() {
            return Ok(());
        }
        let element_size = self.native.size();
        let chunk_shape_u64 = chunk_shape_to_array_shape(&self.chunk_shape);
        let internal = |err: &dyn std::fmt::Display| ContainerError::Other(err.to_string());
        for (chunk_indices, chunk_sub) in &region
            .chunks(&self.chunk_shape)
            .map_err(|err| internal(&err))?
        {
            let overlap = chunk_sub.overlap(&region).map_err(|err| internal(&err))?;
            let in_region = overlap
                .relative_to(region.start())
                .map_err(|err| internal(&err))?;
            if let Some(chunk_bytes) = self.read_chunk_raw(&chunk_indices)? {
                let in_chunk = overlap
                    .relative_to(chunk_sub.start())
                    .map_err(|err| internal(&err))?;
                let sub = in_chunk
                    .extract_bytes(&chunk_bytes, &chunk_shape_u64, element_size)
                    .map_err(|err| internal(&err))?;
                in_region
                    .inject_bytes(&sub, out, region.shape(), element_size)
                    .map_err(|err| internal(&err))?;
            } else {
                let zeroes = vec![0u8; overlap.num_elements_usize() * element_size];
                in_region
                    .inject_bytes(&zeroes, out, region.shape(), element_size)
                    .map_err(|err| internal(&err))?;
            }
        }
        Ok(())
    }

    /// Write `data` to the hyperslab at `offsets` with `extents`.
    ///
    /// # Errors
    /// Returns [`ContainerError::InvalidArgument`] on violated preconditions
    /// and [`ContainerError::Io`] on IO errors.
    pub fn write_hyperslab(
        &self,
        offsets: &[u64],
        extents: &[u64],
        dtype: DataType,
        data: &[u8],
    ) -> Result<(), ContainerError> {
        let _io = self.io.lock();
        if self.inner.readonly() {
            return Err(ContainerError::InvalidArgument(format!(
                "container {} is read-only",
                self.inner.path().display()
            )));
        }
        let region = self.check_transfer(offsets, extents, dtype, data.len())?;
        if region.is_empty() {
            return Ok(());
        }
        let element_size = self.native.size();
        let chunk_shape_u64 = chunk_shape_to_array_shape(&self.chunk_shape);
        let chunk_len: usize =
            usize::try_from(chunk_shape_u64.iter().product::<u64>()).unwrap() * element_size;
        let internal = |err: &dyn std::fmt::Display| ContainerError::Other(err.to_string());
        for (chunk_indices, chunk_sub) in &region
            .chunks(&self.chunk_shape)
            .map_err(|err| internal(&err))?
        {
            let overlap = chunk_sub.overlap(&region).map_err(|err| internal(&err))?;
            let in_region = overlap
                .relative_to(region.start())
                .map_err(|err| internal(&err))?;
            let sub = in_region
                .extract_bytes(data, region.shape(), element_size)
                .map_err(|err| internal(&err))?;
            let raw = if overlap == chunk_sub {
                sub
            } else {
                // Read-modify-write of a partially covered chunk.
                let mut chunk_bytes = self
                    .read_chunk_raw(&chunk_indices)?
                    .unwrap_or_else(|| vec![0u8; chunk_len]);
                let in_chunk = overlap
                    .relative_to(chunk_sub.start())
                    .map_err(|err| internal(&err))?;
                in_chunk
                    .inject_bytes(&sub, &mut chunk_bytes, &chunk_shape_u64, element_size)
                    .map_err(|err| internal(&err))?;
                chunk_bytes
            };
            self.write_chunk_raw(&chunk_indices, raw)?;
        }
        Ok(())
    }

    /// Return the bytes the dataset occupies on disk.
    ///
    /// # Errors
    /// Returns [`ContainerError::Other`] if the dataset record has been
    /// removed from under the handle.
    pub fn storage_size(&self) -> Result<u64, ContainerError> {
        let _io = self.io.lock();
        let state = self.inner.state.lock();
        let record = state
            .index
            .find(&self.path)
            .ok_or_else(|| ContainerError::Other(format!("dataset {} vanished", self.path)))?;
        Ok(record.chunks.iter().map(|chunk| chunk.stored_len).sum())
    }

    /// Persist the container index.
    ///
    /// # Errors
    /// Returns [`ContainerError::Io`] on IO errors.
    pub fn flush(&self) -> Result<(), ContainerError> {
        self.inner.flush()
    }

    /// Set the attribute `name` to a JSON value, overwriting any existing
    /// value.
    ///
    /// # Errors
    /// Returns [`ContainerError::InvalidArgument`] for JSON booleans and
    /// nulls and [`ContainerError::Io`] on IO errors.
    pub fn set_attribute(
        &self,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), ContainerError> {
        let _io = self.io.lock();
        if self.inner.readonly() {
            return Err(ContainerError::InvalidArgument(format!(
                "container {} is read-only",
                self.inner.path().display()
            )));
        }
        let record = attribute_to_record(name, value)?;
        let mut state = self.inner.state.lock();
        {
            let dataset = state
                .index
                .find_mut(&self.path)
                .ok_or_else(|| ContainerError::Other(format!("dataset {} vanished", self.path)))?;
            if let Some(position) = dataset
                .attributes
                .iter()
                .position(|attribute| logical_name(attribute) == name)
            {
                dataset.attributes[position] = record;
            } else {
                dataset.attributes.push(record);
            }
            state.index_dirty = true;
        }
        self.inner.persist_index_locked(&mut state)
    }

    /// Return the value of the attribute `name`.
    ///
    /// # Errors
    /// Returns [`ContainerError::NotFound`] if the attribute does not exist.
    pub fn attribute(&self, name: &str) -> Result<serde_json::Value, ContainerError> {
        let _io = self.io.lock();
        let state = self.inner.state.lock();
        let record = state
            .index
            .find(&self.path)
            .and_then(|dataset| {
                dataset
                    .attributes
                    .iter()
                    .find(|attribute| logical_name(attribute) == name)
            })
            .ok_or_else(|| ContainerError::NotFound(format!("attribute {name}")))?;
        record_to_json(record)
    }

    /// Return the attribute names in insertion order.
    #[must_use]
    pub fn attribute_names(&self) -> Vec<String> {
        let _io = self.io.lock();
        let state = self.inner.state.lock();
        state
            .index
            .find(&self.path)
            .map(|dataset| {
                dataset
                    .attributes
                    .iter()
                    .map(|attribute| logical_name(attribute).to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_transfer(
        &self,
        offsets: &[u64],
        extents: &[u64],
        dtype: DataType,
        buffer_len: usize,
    ) -> Result<ArraySubset, ContainerError> {
        let memory_type = NativeType::from_data_type(dtype);
        if memory_type.size() != self.native.size() {
            return Err(ContainerError::InvalidArgument(format!(
                "memory type {memory_type:?} does not match dataset type {:?}",
                self.native
            )));
        }
        let region = ArraySubset::new_with_start_shape(offsets.to_vec(), extents.to_vec())
            .map_err(|err| ContainerError::InvalidArgument(err.to_string()))?;
        if !region.inbounds(&self.shape) {
            return Err(ContainerError::InvalidArgument(format!(
                "hyperslab {region} is out of bounds of dataset shape {:?}",
                self.shape
            )));
        }
        let expected = region.num_elements() * self.native.size() as u64;
        if buffer_len as u64 != expected {
            return Err(ContainerError::InvalidArgument(format!(
                "buffer of {buffer_len} bytes for a hyperslab of {expected} bytes"
            )));
        }
        Ok(region)
    }

    /// Read the full (unclipped) raw bytes of a chunk, or [`None`] if the
    /// chunk is unallocated.
    fn read_chunk_raw(&self, key: &[u64]) -> Result<Option<Vec<u8>>, ContainerError> {
        let stored = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let Some(record) = state
                .index
                .find(&self.path)
                .and_then(|dataset| dataset.find_chunk(key))
            else {
                return Ok(None);
            };
            let mut stored = vec![0u8; usize::try_from(record.stored_len).unwrap()];
            state.file.seek(SeekFrom::Start(record.offset))?;
            state.file.read_exact(&mut stored)?;
            stored
        };
        let raw = match &self.compressor {
            Some(compressor) => compressor.decode(stored)?,
            None => stored,
        };
        let expected = usize::try_from(
            self.chunk_shape
                .iter()
                .map(|c| c.get())
                .product::<u64>(),
        )
        .unwrap()
            * self.native.size();
        if raw.len() == expected {
            Ok(Some(raw))
        } else {
            Err(ContainerError::Other(format!(
                "chunk {key:?} of {}: decoded {} bytes, expected {expected}",
                self.path,
                raw.len()
            )))
        }
    }

    /// Store the full (unclipped) raw bytes of a chunk.
    fn write_chunk_raw(&self, key: &[u64], raw: Vec<u8>) -> Result<(), ContainerError> {
        let stored = match &self.compressor {
            Some(compressor) => compressor.encode(raw)?,
            None => raw,
        };
        let stored_len = stored.len() as u64;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let (offset, append) = {
            let dataset = state
                .index
                .find(&self.path)
                .ok_or_else(|| ContainerError::Other(format!("dataset {} vanished", self.path)))?;
            match dataset.find_chunk(key) {
                Some(record) if stored_len <= record.capacity => (record.offset, false),
                _ => (state.end_offset, true),
            }
        };
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&stored)?;
        if append {
            state.end_offset = offset + stored_len;
        }
        let dataset = state
            .index
            .find_mut(&self.path)
            .ok_or_else(|| ContainerError::Other(format!("dataset {} vanished", self.path)))?;
        match dataset.find_chunk_mut(key) {
            Some(record) => {
                if append {
                    record.offset = offset;
                    record.capacity = stored_len;
                }
                record.stored_len = stored_len;
            }
            None => dataset.chunks.push(ChunkRecord {
                key: key.to_vec(),
                offset,
                stored_len,
                capacity: stored_len,
            }),
        }
        state.index_dirty = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ContainerFile, OpenMode};
    use super::*;
    use crate::compressor::CompressorConfiguration;

    fn nz(shape: &[u64]) -> ChunkShape {
        shape.iter().map(|&i| NonZeroU64::new(i).unwrap()).collect()
    }

    fn gzip(level: u64) -> CompressorConfiguration {
        serde_json::from_value(serde_json::json!({"id": "gzip", "level": level})).unwrap()
    }

    #[test]
    fn dataset_hyperslab_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file =
            ContainerFile::open(tmp.path().join("hyperslab.gcf"), OpenMode::CreateTruncate)
                .unwrap();
        let dataset = file
            .create_dataset("/a", DataType::UInt8, &[4, 4], &nz(&[2, 2]), None)
            .unwrap();

        // Unallocated chunks read back as zeroes.
        let mut out = vec![0xffu8; 16];
        dataset
            .read_hyperslab(&[0, 0], &[4, 4], DataType::UInt8, &mut out)
            .unwrap();
        assert_eq!(out, vec![0u8; 16]);

        let data: Vec<u8> = (0..16).collect();
        dataset
            .write_hyperslab(&[0, 0], &[4, 4], DataType::UInt8, &data)
            .unwrap();
        let mut out = vec![0u8; 16];
        dataset
            .read_hyperslab(&[0, 0], &[4, 4], DataType::UInt8, &mut out)
            .unwrap();
        assert_eq!(out, data);

        // Partial chunk overwrite.
        dataset
            .write_hyperslab(&[1, 1], &[2, 2], DataType::UInt8, &[91, 92, 93, 94])
            .unwrap();
        let mut out = vec![0u8; 4];
        dataset
            .read_hyperslab(&[1, 1], &[2, 2], DataType::UInt8, &mut out)
            .unwrap();
        assert_eq!(out, vec![91, 92, 93, 94]);
        let mut out = vec![0u8; 16];
        dataset
            .read_hyperslab(&[0, 0], &[4, 4], DataType::UInt8, &mut out)
            .unwrap();
        assert_eq!(out[0], 0);
        assert_eq!(out[5], 91);
        assert_eq!(out[10], 94);

        assert!(dataset.storage_size().unwrap() > 0);
    }

    #[test]
    fn dataset_hyperslab_preconditions() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = ContainerFile::open(tmp.path().join("pre.gcf"), OpenMode::CreateTruncate)
            .unwrap();
        let dataset = file
            .create_dataset("/a", DataType::UInt16, &[4], &nz(&[2]), None)
            .unwrap();

        let mut small = vec![0u8; 2];
        assert!(matches!(
            dataset.read_hyperslab(&[0], &[4], DataType::UInt16, &mut small),
            Err(ContainerError::InvalidArgument(_))
        ));
        let mut out = vec![0u8; 8];
        assert!(matches!(
            dataset.read_hyperslab(&[2], &[4], DataType::UInt16, &mut out),
            Err(ContainerError::InvalidArgument(_))
        ));
        assert!(matches!(
            dataset.read_hyperslab(&[0], &[4], DataType::UInt8, &mut out),
            Err(ContainerError::InvalidArgument(_))
        ));
        // Same byte count is permitted.
        dataset
            .read_hyperslab(&[0], &[4], DataType::Int16, &mut out)
            .unwrap();
    }

    #[test]
    fn dataset_compressed_persistence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("compressed.gcf");
        let data: Vec<u8> = (0..100u32).map(|i| (i % 10) as u8).collect();
        {
            let file = ContainerFile::open(&path, OpenMode::CreateTruncate).unwrap();
            let dataset = file
                .create_dataset("/z", DataType::UInt8, &[10, 10], &nz(&[5, 5]), Some(&gzip(5)))
                .unwrap();
            dataset
                .write_hyperslab(&[0, 0], &[10, 10], DataType::UInt8, &data)
                .unwrap();
            assert!(dataset.storage_size().unwrap() > 0);
        }
        let file = ContainerFile::open(&path, OpenMode::ReadOnly).unwrap();
        let (dataset, metadata) = file.open_dataset("/z").unwrap();
        assert_eq!(metadata.compression.unwrap().id(), "gzip");
        let mut out = vec![0u8; 100];
        dataset
            .read_hyperslab(&[0, 0], &[10, 10], DataType::UInt8, &mut out)
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn dataset_partial_edge_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = ContainerFile::open(tmp.path().join("edge.gcf"), OpenMode::CreateTruncate)
            .unwrap();
        let dataset = file
            .create_dataset("/e", DataType::UInt8, &[7], &nz(&[3]), None)
            .unwrap();
        let data: Vec<u8> = (10..17).collect();
        dataset
            .write_hyperslab(&[0], &[7], DataType::UInt8, &data)
            .unwrap();
        // The last chunk serves one element.
        let mut out = vec![0u8; 1];
        dataset
            .read_hyperslab(&[6], &[1], DataType::UInt8, &mut out)
            .unwrap();
        assert_eq!(out, vec![16]);
    }

    #[test]
    fn dataset_attributes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("attrs.gcf");
        {
            let file = ContainerFile::open(&path, OpenMode::CreateTruncate).unwrap();
            let dataset = file
                .create_dataset("/a", DataType::UInt8, &[1], &nz(&[1]), None)
                .unwrap();
            dataset
                .set_attribute("unit", &serde_json::json!("mV"))
                .unwrap();
            dataset
                .set_attribute("info", &serde_json::json!({"v": 1, "tags": ["a", "b"]}))
                .unwrap();
            dataset.set_attribute("count", &serde_json::json!(3)).unwrap();
            // Overwrite keeps insertion order.
            dataset
                .set_attribute("unit", &serde_json::json!("uV"))
                .unwrap();
            assert!(matches!(
                dataset.set_attribute("flag", &serde_json::json!(true)),
                Err(ContainerError::InvalidArgument(_))
            ));
        }
        let file = ContainerFile::open(&path, OpenMode::ReadOnly).unwrap();
        let (dataset, _) = file.open_dataset("/a").unwrap();
        assert_eq!(dataset.attribute_names(), vec!["unit", "info", "count"]);
        assert_eq!(dataset.attribute("unit").unwrap(), serde_json::json!("uV"));
        assert_eq!(
            dataset.attribute("info").unwrap(),
            serde_json::json!({"v": 1, "tags": ["a", "b"]})
        );
        assert!(matches!(
            dataset.attribute("missing"),
            Err(ContainerError::NotFound(_))
        ));
    }

    #[test]
    fn dataset_scalar() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = ContainerFile::open(tmp.path().join("scalar.gcf"), OpenMode::CreateTruncate)
            .unwrap();
        let dataset = file
            .create_dataset("/s", DataType::Float64, &[], &nz(&[]), None)
            .unwrap();
        let value = 42.0f64.to_ne_bytes();
        dataset
            .write_hyperslab(&[], &[], DataType::Float64, &value)
            .unwrap();
        let mut out = [0u8; 8];
        dataset
            .read_hyperslab(&[], &[], DataType::Float64, &mut out)
            .unwrap();
        assert_eq!(out, value);
    }
}
