//! The driver facade.
//!
//! A [`Driver`] exposes an array-like interface over a chunked dataset:
//! [`read_region`](Driver::read_region) and
//! [`write_region`](Driver::write_region) transfer arbitrary rectangular
//! regions, decomposed into chunk-aligned operations through the
//! [chunk cache](crate::chunk_cache).
//!
//! Drivers are opened from a [`DriverSpec`], the JSON dataset spec:
//! ```json
//! {
//!     "driver": "hdf5",
//!     "path": "/path/to/container",
//!     "dataset": "/path/inside/container",
//!     "dtype": "float32",
//!     "shape": [100, 100],
//!     "chunk_layout": { "chunk": [20, 20] },
//!     "compression": { "id": "gzip", "level": 1 }
//! }
//! ```
//! The `driver` string selects a registered driver from the process-global
//! driver registry.

use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    array_subset::{ArrayShape, ArraySubset},
    chunk_cache::{
        CacheStats, ChunkCache, ChunkCacheError, ChunkCacheOptions, ChunkData,
    },
    compressor::CompressorConfiguration,
    container::{ContainerError, ContainerFile, Dataset, OpenMode as ContainerOpenMode},
    data_type::DataType,
    metadata::{ArrayMetadata, ArrayMetadataConstraints},
    plugin::PluginCreateError,
    schema::{effective_metadata, ChunkLayout, ChunkLayoutConstraints, Schema, SchemaError},
};

/// The identifier of the built-in driver.
pub const IDENTIFIER: &str = "hdf5";

// Register the driver.
inventory::submit! {
    DriverPlugin::new(IDENTIFIER, is_name_hdf5, open_hdf5)
}

fn is_name_hdf5(name: &str) -> bool {
    name.eq(IDENTIFIER)
}

/// A driver error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// A region outside the bounds of the array.
    #[error("region {_0} is out of bounds of array shape {_1:?}")]
    OutOfBounds(ArraySubset, ArrayShape),
    /// An invalid argument.
    #[error("invalid argument: {_0}")]
    InvalidArgument(String),
    /// A container error.
    #[error(transparent)]
    Container(#[from] ContainerError),
    /// A chunk cache error.
    #[error(transparent)]
    Cache(#[from] ChunkCacheError),
    /// A schema negotiation error.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A plugin error.
    #[error(transparent)]
    Plugin(#[from] PluginCreateError),
}

/// The dataset JSON spec consumed by [`Driver::open`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DriverSpec {
    /// The driver registry id, e.g. `"hdf5"`.
    pub driver: String,
    /// The filesystem path to the container.
    pub path: PathBuf,
    /// The slash-delimited path of the dataset inside the container.
    pub dataset: String,
    /// The element data type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DataType>,
    /// The per-dimension extents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<ArrayShape>,
    /// The chunk layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_layout: Option<ChunkLayoutConstraints>,
    /// The compressor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressorConfiguration>,
    /// A fill value. Unsupported; rejected at open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_value: Option<serde_json::Value>,
    /// Dimension units. Unsupported; rejected at open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_units: Option<Vec<String>>,
    /// Metadata constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArrayMetadataConstraints>,
}

impl DriverSpec {
    /// Return the user schema carried by the spec.
    #[must_use]
    pub fn to_schema(&self) -> Schema {
        Schema {
            dtype: self.dtype,
            shape: self.shape.clone(),
            chunk_layout: self.chunk_layout.clone(),
            compression: self.compression.clone(),
            fill_value: self.fill_value.clone(),
            dimension_units: self.dimension_units.clone(),
        }
    }
}

/// The mode a driver is opened with.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum OpenMode {
    /// Open an existing dataset read-only.
    ReadOnly,
    /// Open an existing dataset for reading and writing.
    #[default]
    Open,
    /// Create the dataset; error if it already exists.
    Create,
    /// Open the dataset if it exists, create it otherwise.
    OpenOrCreate,
}

/// Options for opening a [`Driver`].
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// The open mode.
    pub mode: OpenMode,
    /// The chunk cache options.
    pub cache: ChunkCacheOptions,
}

impl OpenOptions {
    /// Create open options with `mode` and the default cache options.
    #[must_use]
    pub fn new(mode: OpenMode) -> Self {
        Self {
            mode,
            cache: ChunkCacheOptions::default(),
        }
    }
}

/// A driver registration: maps the `driver` string of a [`DriverSpec`] to an
/// open function.
pub struct DriverPlugin {
    identifier: &'static str,
    match_name_fn: fn(name: &str) -> bool,
    open_fn: fn(spec: &DriverSpec, options: &OpenOptions) -> Result<Driver, DriverError>,
}

inventory::collect!(DriverPlugin);

impl DriverPlugin {
    /// Create a new driver plugin for registration.
    #[must_use]
    pub const fn new(
        identifier: &'static str,
        match_name_fn: fn(name: &str) -> bool,
        open_fn: fn(spec: &DriverSpec, options: &OpenOptions) -> Result<Driver, DriverError>,
    ) -> Self {
        Self {
            identifier,
            match_name_fn,
            open_fn,
        }
    }

    /// Returns true if this plugin is associated with `name`.
    #[must_use]
    pub fn match_name(&self, name: &str) -> bool {
        (self.match_name_fn)(name)
    }

    /// Returns the identifier of the plugin.
    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        self.identifier
    }

    /// Open a driver from `spec` and `options`.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the open fails.
    pub fn open(&self, spec: &DriverSpec, options: &OpenOptions) -> Result<Driver, DriverError> {
        (self.open_fn)(spec, options)
    }
}

/// A driver handle over one chunked dataset.
///
/// The metadata of an open driver is immutable for the lifetime of the
/// handle. Dropping the driver stops the background writer and flushes dirty
/// chunks.
pub struct Driver {
    // Dropped first so outstanding dirty chunks reach the container before
    // the file handle persists its index.
    cache: ChunkCache,
    dataset: Arc<Dataset>,
    metadata: Arc<ArrayMetadata>,
    file: Arc<ContainerFile>,
}

fn open_hdf5(spec: &DriverSpec, options: &OpenOptions) -> Result<Driver, DriverError> {
    let schema = spec.to_schema();
    let constraints = spec.metadata.clone().unwrap_or_default();

    let container_mode = match options.mode {
        OpenMode::ReadOnly => ContainerOpenMode::ReadOnly,
        OpenMode::Open => ContainerOpenMode::ReadWrite,
        OpenMode::Create | OpenMode::OpenOrCreate => {
            if spec.path.exists() {
                ContainerOpenMode::ReadWrite
            } else {
                ContainerOpenMode::CreateTruncate
            }
        }
    };
    let file = Arc::new(ContainerFile::open(&spec.path, container_mode)?);

    let (dataset, metadata) = match file.open_dataset(&spec.dataset) {
        Ok((dataset, existing)) => {
            if options.mode == OpenMode::Create {
                return Err(DriverError::Container(ContainerError::AlreadyExists(
                    spec.dataset.clone(),
                )));
            }
            let metadata = effective_metadata(&constraints, &schema, Some(&existing))?;
            (dataset, metadata)
        }
        Err(ContainerError::NotFound(_))
            if matches!(options.mode, OpenMode::Create | OpenMode::OpenOrCreate) =>
        {
            let metadata = effective_metadata(&constraints, &schema, None)?;
            let dataset = file.create_dataset(
                &spec.dataset,
                metadata.dtype,
                &metadata.shape,
                &metadata.chunk_shape,
                metadata.compression.as_ref(),
            )?;
            (dataset, metadata)
        }
        Err(err) => return Err(err.into()),
    };
    let dataset = Arc::new(dataset);
    let metadata = Arc::new(metadata);
    let cache = ChunkCache::new(dataset.clone(), &metadata, &options.cache);
    Ok(Driver {
        cache,
        dataset,
        metadata,
        file,
    })
}

impl Driver {
    /// Open a driver from `spec` and `options` via the driver registry.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the `driver` string is not registered,
    /// the container or dataset cannot be opened, or the schema negotiation
    /// fails.
    pub fn open(spec: &DriverSpec, options: &OpenOptions) -> Result<Self, DriverError> {
        for plugin in inventory::iter::<DriverPlugin> {
            if plugin.match_name(&spec.driver) {
                return plugin.open(spec, options);
            }
        }
        Err(DriverError::Plugin(PluginCreateError::Unsupported {
            name: spec.driver.clone(),
            plugin_type: "driver",
        }))
    }

    /// Return the metadata of the array.
    #[must_use]
    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    /// Return the element data type of the array.
    #[must_use]
    pub fn dtype(&self) -> DataType {
        self.metadata.dtype
    }

    /// Return the shape of the array.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.metadata.shape
    }

    /// Return the dimensionality of the array.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.metadata.rank()
    }

    /// Return the schema of the array, derived from its metadata.
    #[must_use]
    pub fn schema(&self) -> Schema {
        let layout = self.chunk_layout();
        Schema {
            dtype: Some(self.dtype()),
            shape: Some(self.metadata.shape.clone()),
            chunk_layout: Some(ChunkLayoutConstraints {
                grid_origin: Some(layout.grid_origin),
                inner_order: Some(layout.inner_order),
                chunk: Some(self.metadata.chunk_shape.clone()),
            }),
            compression: self.metadata.compression.clone(),
            fill_value: None,
            dimension_units: None,
        }
    }

    /// Return the chunk layout of the array, derived from its metadata.
    #[must_use]
    pub fn chunk_layout(&self) -> ChunkLayout {
        ChunkLayout {
            grid_origin: vec![0; self.rank()],
            inner_order: (0..self.rank()).collect(),
            chunk: self
                .metadata
                .chunk_shape
                .iter()
                .map(|extent| extent.get())
                .collect(),
        }
    }

    /// Read the region at `offsets` with `extents` into `out`.
    ///
    /// The buffer must hold exactly `product(extents) * dtype.size()` bytes.
    /// A zero-extent region reads nothing and succeeds.
    ///
    /// # Errors
    /// Returns [`DriverError::OutOfBounds`] if the region exceeds the array
    /// shape, [`DriverError::InvalidArgument`] if the buffer size is wrong,
    /// and a [`DriverError::Cache`] if a chunk read fails.
    pub fn read_region(
        &self,
        offsets: &[u64],
        extents: &[u64],
        out: &mut [u8],
    ) -> Result<(), DriverError> {
        let region = self.check_region(offsets, extents, out.len())?;
        if region.is_empty() {
            return Ok(());
        }
        let element_size = self.dtype().size();
        let invalid = |err: &dyn std::fmt::Display| DriverError::InvalidArgument(err.to_string());
        for (chunk_indices, chunk_sub) in &region
            .chunks(&self.metadata.chunk_shape)
            .map_err(|err| invalid(&err))?
        {
            let clipped = chunk_sub
                .bound(self.shape())
                .map_err(|err| invalid(&err))?;
            let chunk = self.cache.read_chunk(&chunk_indices)?;
            let overlap = clipped.overlap(&region).map_err(|err| invalid(&err))?;
            let in_chunk = overlap
                .relative_to(clipped.start())
                .map_err(|err| invalid(&err))?;
            let bytes = in_chunk
                .extract_bytes(&chunk.data, &chunk.shape, element_size)
                .map_err(|err| invalid(&err))?;
            let in_region = overlap
                .relative_to(region.start())
                .map_err(|err| invalid(&err))?;
            in_region
                .inject_bytes(&bytes, out, region.shape(), element_size)
                .map_err(|err| invalid(&err))?;
        }
        Ok(())
    }

    /// Write `data` to the region at `offsets` with `extents`.
    ///
    /// Chunks fully covered by the region are replaced outright; partially
    /// covered chunks are read (through the cache), overlaid, and stored.
    ///
    /// # Errors
    /// Returns [`DriverError::OutOfBounds`] if the region exceeds the array
    /// shape, [`DriverError::InvalidArgument`] if the buffer size is wrong,
    /// and a [`DriverError::Cache`] if a chunk transfer fails.
    pub fn write_region(
        &self,
        offsets: &[u64],
        extents: &[u64],
        data: &[u8],
    ) -> Result<(), DriverError> {
        let region = self.check_region(offsets, extents, data.len())?;
        if region.is_empty() {
            return Ok(());
        }
        let element_size = self.dtype().size();
        let invalid = |err: &dyn std::fmt::Display| DriverError::InvalidArgument(err.to_string());
        for (chunk_indices, chunk_sub) in &region
            .chunks(&self.metadata.chunk_shape)
            .map_err(|err| invalid(&err))?
        {
            let clipped = chunk_sub
                .bound(self.shape())
                .map_err(|err| invalid(&err))?;
            let overlap = clipped.overlap(&region).map_err(|err| invalid(&err))?;
            let in_region = overlap
                .relative_to(region.start())
                .map_err(|err| invalid(&err))?;
            let sub = in_region
                .extract_bytes(data, region.shape(), element_size)
                .map_err(|err| invalid(&err))?;
            let chunk = if overlap == clipped {
                // The region covers the whole chunk (clipping included);
                // build a fresh chunk buffer directly.
                ChunkData {
                    data: sub,
                    dtype: self.dtype(),
                    shape: clipped.shape().to_vec(),
                }
            } else {
                let mut chunk = self.cache.read_chunk(&chunk_indices)?;
                let in_chunk = overlap
                    .relative_to(clipped.start())
                    .map_err(|err| invalid(&err))?;
                let shape = chunk.shape.clone();
                in_chunk
                    .inject_bytes(&sub, &mut chunk.data, &shape, element_size)
                    .map_err(|err| invalid(&err))?;
                chunk
            };
            self.cache.write_chunk(&chunk_indices, chunk)?;
        }
        Ok(())
    }

    /// Return the filesystem path of the container file.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }

    /// Synchronously write all dirty chunks and persist the container.
    ///
    /// # Errors
    /// Returns the first error encountered.
    pub fn flush(&self) -> Result<(), DriverError> {
        self.cache.flush()?;
        self.file.flush()?;
        Ok(())
    }

    /// Return the bytes the dataset occupies on disk.
    ///
    /// # Errors
    /// Returns a [`DriverError::Container`] if the container query fails.
    pub fn storage_size(&self) -> Result<u64, DriverError> {
        Ok(self.dataset.storage_size()?)
    }

    /// Return a point-in-time snapshot of the chunk cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Evict cached chunks until the cache holds at most `target_bytes`.
    ///
    /// # Errors
    /// Returns the first write-back error encountered.
    pub fn evict_to(&self, target_bytes: usize) -> Result<(), DriverError> {
        Ok(self.cache.evict_to(target_bytes)?)
    }

    /// Set the attribute `name` of the dataset to a JSON value.
    ///
    /// # Errors
    /// Returns a [`DriverError::Container`] if the value is unsupported or
    /// the write fails.
    pub fn set_attribute(
        &self,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), DriverError> {
        Ok(self.dataset.set_attribute(name, value)?)
    }

    /// Return the value of the attribute `name`.
    ///
    /// # Errors
    /// Returns a [`DriverError::Container`] with
    /// [`ContainerError::NotFound`] if the attribute does not exist.
    pub fn attribute(&self, name: &str) -> Result<serde_json::Value, DriverError> {
        Ok(self.dataset.attribute(name)?)
    }

    /// Return the attribute names of the dataset in insertion order.
    #[must_use]
    pub fn attribute_names(&self) -> Vec<String> {
        self.dataset.attribute_names()
    }

    /// Stop the background writer and join it.
    ///
    /// Dropping the driver does this implicitly, followed by a final flush.
    pub fn stop(&mut self) {
        self.cache.stop();
    }

    fn check_region(
        &self,
        offsets: &[u64],
        extents: &[u64],
        buffer_len: usize,
    ) -> Result<ArraySubset, DriverError> {
        let region = ArraySubset::new_with_start_shape(offsets.to_vec(), extents.to_vec())
            .map_err(|err| DriverError::InvalidArgument(err.to_string()))?;
        if !region.inbounds(self.shape()) {
            return Err(DriverError::OutOfBounds(region, self.shape().to_vec()));
        }
        let expected = region.num_elements() * self.dtype().size() as u64;
        if buffer_len as u64 != expected {
            return Err(DriverError::InvalidArgument(format!(
                "buffer of {buffer_len} bytes for a region of {expected} bytes"
            )));
        }
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_spec_json() {
        let spec: DriverSpec = serde_json::from_value(serde_json::json!({
            "driver": "hdf5",
            "path": "/tmp/example.gcf",
            "dataset": "/a/b",
            "dtype": "float32",
            "shape": [10, 10],
            "chunk_layout": {"chunk": [5, 5]},
            "compression": {"id": "gzip", "level": 9},
            "metadata": {"shape": [10, 10]}
        }))
        .unwrap();
        assert_eq!(spec.driver, "hdf5");
        assert_eq!(spec.dtype, Some(DataType::Float32));
        assert_eq!(spec.compression.as_ref().unwrap().id(), "gzip");
        let schema = spec.to_schema();
        assert_eq!(schema.shape, Some(vec![10, 10]));

        assert!(serde_json::from_value::<DriverSpec>(serde_json::json!({
            "driver": "hdf5",
            "path": "/tmp/example.gcf",
            "dataset": "/a/b",
            "unknown_field": 1
        }))
        .is_err());
    }

    #[test]
    fn driver_registry_unknown() {
        let spec: DriverSpec = serde_json::from_value(serde_json::json!({
            "driver": "n5",
            "path": "/tmp/example.gcf",
            "dataset": "/a"
        }))
        .unwrap();
        assert!(matches!(
            Driver::open(&spec, &OpenOptions::default()),
            Err(DriverError::Plugin(PluginCreateError::Unsupported { .. }))
        ));
    }
}
