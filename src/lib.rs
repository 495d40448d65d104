//! A Rust library for chunked storage of N-dimensional typed arrays inside a
//! hierarchical container file.
//!
//! `gridfile` exposes an array-like interface: read and write of arbitrary
//! rectangular regions of a logically N-dimensional array. Data is physically
//! stored in fixed-size chunks inside a single container file, with optional
//! per-chunk compression.
//!
//! The best docs to start with are [`driver::Driver`] and [`container::ContainerFile`].
//!
//! ## Overview
//! - [`driver`]: the [`Driver`](driver::Driver) facade with
//!   [`read_region`](driver::Driver::read_region) /
//!   [`write_region`](driver::Driver::write_region) and the dataset JSON spec.
//! - [`chunk_cache`]: in-memory cache of decoded chunks with dirty tracking,
//!   LRU eviction, and a background write-back thread.
//! - [`container`]: the container file format and its dataset, hyperslab, and
//!   attribute operations.
//! - [`schema`]: negotiation of user schemas and metadata constraints against
//!   pre-existing container state.
//! - [`metadata`]: the array metadata model, its JSON codec, and the
//!   compatibility key.
//! - [`compressor`]: the process-global compressor registry (built-in: `gzip`).
//! - [`array_subset`]: rectangular subsets and chunk/coordinate arithmetic.
//!
//! ## Example
//! ```rust
//! use gridfile::driver::{Driver, DriverSpec, OpenMode, OpenOptions};
//!
//! # let tmp = tempfile::TempDir::new()?;
//! # let path = tmp.path().join("example.gcf");
//! let spec: DriverSpec = serde_json::from_value(serde_json::json!({
//!     "driver": "hdf5",
//!     "path": path,
//!     "dataset": "/measurements/voltage",
//!     "dtype": "float32",
//!     "shape": [10, 10],
//!     "chunk_layout": { "chunk": [5, 5] },
//!     "compression": { "id": "gzip", "level": 5 }
//! }))?;
//!
//! let driver = Driver::open(&spec, &OpenOptions::new(OpenMode::Create))?;
//! let data: Vec<u8> = vec![1.5f32; 100]
//!     .iter()
//!     .flat_map(|v| v.to_ne_bytes())
//!     .collect();
//! driver.write_region(&[0, 0], &[10, 10], &data)?;
//!
//! let mut readback = vec![0u8; 100 * 4];
//! driver.read_region(&[0, 0], &[10, 10], &mut readback)?;
//! assert_eq!(readback, data);
//! driver.flush()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]

pub mod array_subset;
pub mod chunk_cache;
pub mod compressor;
pub mod config;
pub mod container;
pub mod data_type;
pub mod driver;
pub mod metadata;
pub mod plugin;
pub mod schema;

/// Re-export [`serde_json`].
pub use serde_json;
