//! The chunk cache and its write-back engine.
//!
//! A [`ChunkCache`] holds decoded chunks keyed by their chunk indices. Cache
//! entries carry a dirty bit; dirty entries are written back to the container
//! by [`flush`](ChunkCache::flush), on eviction, and (under
//! [`WritePolicy::WriteBack`]) by a background writer thread that runs for
//! the lifetime of the cache.
//!
//! Entries are exclusively owned by the cache; readers receive value copies.
//! Eviction is least-recently-accessed with insertion order as the tie
//! breaker, and a dirty entry is never silently discarded: it is written back
//! first, and a write-back failure aborts that entry's eviction.
//!
//! Concurrent reads of the same missing chunk coalesce into a single
//! container read; coalesced waiters count as cache hits, so
//! [`CacheStats::misses`] equals the number of container reads issued.

use std::{collections::HashMap, sync::Arc, thread::JoinHandle, time::Duration};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::warn;

use crate::{
    array_subset::{
        chunk_indices_inbounds, chunk_origin, chunk_subset_clipped, ArrayIndices, ArrayShape,
        ArraySubset, ChunkShape,
    },
    config::global_config,
    container::{ContainerError, Dataset},
    data_type::DataType,
    metadata::ArrayMetadata,
};

/// The indices identifying a chunk.
pub type ChunkKey = ArrayIndices;

/// The write policy of a chunk cache.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum WritePolicy {
    /// Writes update the cache and are immediately written to the container.
    WriteThrough,
    /// Writes update the cache only; dirty chunks reach the container via the
    /// background writer, [`flush`](ChunkCache::flush), or eviction.
    #[default]
    WriteBack,
}

/// Options for a [`ChunkCache`].
///
/// The defaults are drawn from the [global configuration](crate::config).
#[derive(Clone, Debug)]
pub struct ChunkCacheOptions {
    /// The write policy.
    pub write_policy: WritePolicy,
    /// The interval between background write-back cycles.
    pub write_interval: Duration,
    /// The cache capacity in bytes, or [`None`] for unbounded.
    pub capacity: Option<usize>,
}

impl Default for ChunkCacheOptions {
    fn default() -> Self {
        let config = global_config();
        Self {
            write_policy: config.write_policy(),
            write_interval: config.write_interval(),
            capacity: config.chunk_cache_capacity(),
        }
    }
}

/// The decoded data of one chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkData {
    /// The decoded bytes, of length `product(shape) * dtype.size()`.
    pub data: Vec<u8>,
    /// The element data type.
    pub dtype: DataType,
    /// The extent of this chunk per dimension, clipped against the array
    /// shape.
    pub shape: ArrayShape,
}

/// A point-in-time snapshot of cache statistics.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    /// The number of cached chunks.
    pub entries: usize,
    /// The total bytes of cached chunk data.
    pub total_bytes: usize,
    /// The number of dirty entries.
    pub dirty_count: usize,
    /// The number of cache hits (including coalesced waiters).
    pub hits: u64,
    /// The number of cache misses, i.e. container reads issued.
    pub misses: u64,
}

/// A chunk cache error.
#[derive(Debug, Error)]
pub enum ChunkCacheError {
    /// A container read failed.
    #[error("read chunk at {key:?}: {source}")]
    Read {
        /// The chunk indices.
        key: ChunkKey,
        /// The container error.
        #[source]
        source: ContainerError,
    },
    /// A container write failed.
    #[error("write chunk at {key:?}: {source}")]
    Write {
        /// The chunk indices.
        key: ChunkKey,
        /// The container error.
        #[source]
        source: ContainerError,
    },
    /// Chunk indices outside the chunk grid.
    #[error("chunk indices {_0:?} are not within the chunk grid")]
    InvalidChunkIndices(ChunkKey),
    /// Chunk data that does not fit the chunk.
    #[error("chunk data with shape {got:?} and {len} bytes does not fit chunk {key:?} with clipped shape {expected:?}")]
    InvalidChunkData {
        /// The chunk indices.
        key: ChunkKey,
        /// The shape of the rejected data.
        got: ArrayShape,
        /// The byte length of the rejected data.
        len: usize,
        /// The clipped shape of the chunk.
        expected: ArrayShape,
    },
    /// A container error outside of chunk IO.
    #[error(transparent)]
    Container(#[from] ContainerError),
}

struct CacheEntry {
    data: Vec<u8>,
    shape: ArrayShape,
    dirty: bool,
    last_access: u64,
    inserted: u64,
    /// Write counter; a flush only clears the dirty bit if no write
    /// superseded the flushed bytes.
    generation: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ChunkKey, CacheEntry>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    clock: u64,
}

#[derive(Default)]
struct PendingLoad {
    result: Mutex<Option<Result<ChunkData, String>>>,
    complete: Condvar,
}

struct CacheShared {
    dataset: Arc<Dataset>,
    dtype: DataType,
    shape: ArrayShape,
    chunk_shape: ChunkShape,
    state: Mutex<CacheState>,
    /// In-flight container loads. Lock order: `state` before `pending`.
    pending: Mutex<HashMap<ChunkKey, Arc<PendingLoad>>>,
    shutdown: Mutex<bool>,
    shutdown_signal: Condvar,
}

enum ReadAction {
    Hit(ChunkData),
    Wait(Arc<PendingLoad>),
    Load(Arc<PendingLoad>),
}

impl CacheShared {
    fn clipped_subset(&self, key: &[u64]) -> Result<ArraySubset, ChunkCacheError> {
        if !chunk_indices_inbounds(key, &self.chunk_shape, &self.shape) {
            return Err(ChunkCacheError::InvalidChunkIndices(key.to_vec()));
        }
        chunk_subset_clipped(key, &self.chunk_shape, &self.shape)
            .map_err(|_| ChunkCacheError::InvalidChunkIndices(key.to_vec()))
    }

    fn read_chunk(&self, key: &[u64]) -> Result<ChunkData, ChunkCacheError> {
        let clipped = self.clipped_subset(key)?;
        let action = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.clock += 1;
            let now = state.clock;
            if let Some(entry) = state.entries.get_mut(key) {
                entry.last_access = now;
                state.hits += 1;
                ReadAction::Hit(ChunkData {
                    data: entry.data.clone(),
                    dtype: self.dtype,
                    shape: entry.shape.clone(),
                })
            } else {
                let mut pending = self.pending.lock();
                if let Some(load) = pending.get(key) {
                    state.hits += 1;
                    ReadAction::Wait(load.clone())
                } else {
                    let load = Arc::new(PendingLoad::default());
                    pending.insert(key.to_vec(), load.clone());
                    state.misses += 1;
                    ReadAction::Load(load)
                }
            }
        };
        match action {
            ReadAction::Hit(chunk) => Ok(chunk),
            ReadAction::Wait(load) => {
                let mut result = load.result.lock();
                while result.is_none() {
                    load.complete.wait(&mut result);
                }
                match result.as_ref().expect("loop exits once set") {
                    Ok(chunk) => Ok(chunk.clone()),
                    Err(message) => Err(ChunkCacheError::Read {
                        key: key.to_vec(),
                        source: ContainerError::Other(message.clone()),
                    }),
                }
            }
            ReadAction::Load(load) => {
                let loaded = self.load_chunk(key, &clipped);
                if let Ok(chunk) = &loaded {
                    let mut guard = self.state.lock();
                    let state = &mut *guard;
                    // A write may have raced the load; never clobber it.
                    if !state.entries.contains_key(key) {
                        state.clock += 1;
                        let now = state.clock;
                        state.total_bytes += chunk.data.len();
                        state.entries.insert(
                            key.to_vec(),
                            CacheEntry {
                                data: chunk.data.clone(),
                                shape: chunk.shape.clone(),
                                dirty: false,
                                last_access: now,
                                inserted: now,
                                generation: 0,
                            },
                        );
                    }
                }
                {
                    let mut result = load.result.lock();
                    *result = Some(
                        loaded
                            .as_ref()
                            .map(Clone::clone)
                            .map_err(|err| err.to_string()),
                    );
                    load.complete.notify_all();
                }
                self.pending.lock().remove(key);
                loaded
            }
        }
    }

    fn load_chunk(&self, key: &[u64], clipped: &ArraySubset) -> Result<ChunkData, ChunkCacheError> {
        let mut data = vec![0u8; clipped.num_elements_usize() * self.dtype.size()];
        self.dataset
            .read_hyperslab(clipped.start(), clipped.shape(), self.dtype, &mut data)
            .map_err(|source| ChunkCacheError::Read {
                key: key.to_vec(),
                source,
            })?;
        Ok(ChunkData {
            data,
            dtype: self.dtype,
            shape: clipped.shape().to_vec(),
        })
    }

    fn write_chunk(&self, key: &[u64], chunk: ChunkData) -> Result<(), ChunkCacheError> {
        let clipped = self.clipped_subset(key)?;
        if chunk.shape != clipped.shape()
            || chunk.data.len() != clipped.num_elements_usize() * self.dtype.size()
        {
            return Err(ChunkCacheError::InvalidChunkData {
                key: key.to_vec(),
                got: chunk.shape,
                len: chunk.data.len(),
                expected: clipped.shape().to_vec(),
            });
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.clock += 1;
        let now = state.clock;
        match state.entries.entry(key.to_vec()) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                state.total_bytes = state.total_bytes - entry.data.len() + chunk.data.len();
                entry.data = chunk.data;
                entry.shape = chunk.shape;
                entry.dirty = true;
                entry.last_access = now;
                entry.generation += 1;
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                state.total_bytes += chunk.data.len();
                vacant.insert(CacheEntry {
                    data: chunk.data,
                    shape: chunk.shape,
                    dirty: true,
                    last_access: now,
                    inserted: now,
                    generation: 1,
                });
            }
        }
        Ok(())
    }

    /// Write the entry for `key` back to the container, clearing its dirty
    /// bit unless a concurrent write superseded the flushed bytes.
    fn flush_key(&self, key: &[u64]) -> Result<(), ChunkCacheError> {
        let snapshot = {
            let state = self.state.lock();
            state
                .entries
                .get(key)
                .filter(|entry| entry.dirty)
                .map(|entry| (entry.data.clone(), entry.shape.clone(), entry.generation))
        };
        let Some((data, shape, generation)) = snapshot else {
            return Ok(());
        };
        self.write_entry_to_container(key, &data, &shape)?;
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            if entry.generation == generation {
                entry.dirty = false;
            }
        }
        Ok(())
    }

    fn write_entry_to_container(
        &self,
        key: &[u64],
        data: &[u8],
        shape: &[u64],
    ) -> Result<(), ChunkCacheError> {
        let origin = chunk_origin(key, &self.chunk_shape);
        self.dataset
            .write_hyperslab(&origin, shape, self.dtype, data)
            .map_err(|source| ChunkCacheError::Write {
                key: key.to_vec(),
                source,
            })
    }

    /// Write all dirty entries. Every entry is attempted; errors are logged
    /// and the first is returned.
    fn flush(&self) -> Result<(), ChunkCacheError> {
        let dirty: Vec<ChunkKey> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .filter(|(_, entry)| entry.dirty)
                .map(|(key, _)| key.clone())
                .collect()
        };
        let mut first_error = None;
        for key in dirty {
            if let Err(err) = self.flush_key(&key) {
                warn!("flush: {err}");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        if let Err(err) = self.dataset.flush() {
            let err = ChunkCacheError::Container(err);
            warn!("flush: {err}");
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Evict entries by ascending last access until the cache holds at most
    /// `target_bytes`. Dirty entries are written back first; a write-back
    /// failure aborts that entry's eviction and continues with others.
    fn evict_to(&self, target_bytes: usize) -> Result<(), ChunkCacheError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.total_bytes <= target_bytes {
            return Ok(());
        }
        let mut candidates: Vec<(u64, u64, ChunkKey)> = state
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_access, entry.inserted, key.clone()))
            .collect();
        candidates.sort();
        let mut first_error = None;
        for (_, _, key) in candidates {
            if state.total_bytes <= target_bytes {
                break;
            }
            let entry = state.entries.get(&key).expect("key was just enumerated");
            if entry.dirty {
                let origin = chunk_origin(&key, &self.chunk_shape);
                if let Err(source) =
                    self.dataset
                        .write_hyperslab(&origin, &entry.shape, self.dtype, &entry.data)
                {
                    let err = ChunkCacheError::Write {
                        key: key.clone(),
                        source,
                    };
                    warn!("evict: {err}");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    continue;
                }
            }
            let removed = state.entries.remove(&key).expect("key was just enumerated");
            state.total_bytes -= removed.data.len();
        }
        first_error.map_or(Ok(()), Err)
    }

    fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            dirty_count: state.entries.values().filter(|entry| entry.dirty).count(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}

fn background_writer(shared: &CacheShared, interval: Duration) {
    loop {
        {
            let mut shutdown = shared.shutdown.lock();
            if !*shutdown {
                shared.shutdown_signal.wait_for(&mut shutdown, interval);
            }
            if *shutdown {
                break;
            }
        }
        // Errors are logged inside flush and retried next cycle.
        let _ = shared.flush();
    }
    let _ = shared.flush();
}

/// An in-memory cache of decoded chunks with dirty tracking and write-back.
pub struct ChunkCache {
    shared: Arc<CacheShared>,
    write_policy: WritePolicy,
    capacity: Option<usize>,
    writer: Option<JoinHandle<()>>,
}

impl ChunkCache {
    /// Create a new chunk cache over `dataset` described by `metadata`.
    ///
    /// Under [`WritePolicy::WriteBack`] a background writer thread is started
    /// that flushes dirty entries every
    /// [`write_interval`](ChunkCacheOptions::write_interval).
    ///
    /// # Panics
    /// Panics if the background writer thread cannot be spawned.
    #[must_use]
    pub fn new(dataset: Arc<Dataset>, metadata: &ArrayMetadata, options: &ChunkCacheOptions) -> Self {
        let shared = Arc::new(CacheShared {
            dataset,
            dtype: metadata.dtype,
            shape: metadata.shape.clone(),
            chunk_shape: metadata.chunk_shape.clone(),
            state: Mutex::new(CacheState::default()),
            pending: Mutex::new(HashMap::new()),
            shutdown: Mutex::new(false),
            shutdown_signal: Condvar::new(),
        });
        let writer = (options.write_policy == WritePolicy::WriteBack).then(|| {
            let shared = shared.clone();
            let interval = options.write_interval;
            std::thread::Builder::new()
                .name("gridfile-writeback".to_string())
                .spawn(move || background_writer(&shared, interval))
                .expect("spawn write-back thread")
        });
        Self {
            shared,
            write_policy: options.write_policy,
            capacity: options.capacity,
            writer,
        }
    }

    /// Return the write policy of the cache.
    #[must_use]
    pub const fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    /// Read the chunk at `key`.
    ///
    /// A cache hit yields a value copy of the entry. On a miss the chunk is
    /// loaded from the container and cached clean; concurrent misses for the
    /// same key coalesce into a single container read.
    ///
    /// # Errors
    /// Returns a [`ChunkCacheError`] if the key is outside the chunk grid or
    /// the container read fails.
    pub fn read_chunk(&self, key: &[u64]) -> Result<ChunkData, ChunkCacheError> {
        let chunk = self.shared.read_chunk(key)?;
        self.enforce_capacity();
        Ok(chunk)
    }

    /// Replace the chunk at `key` with `chunk` and mark it dirty.
    ///
    /// Under [`WritePolicy::WriteThrough`] the chunk is additionally written
    /// to the container before returning.
    ///
    /// # Errors
    /// Returns a [`ChunkCacheError`] if the key is outside the chunk grid,
    /// the data does not fit the chunk's clipped extent, or a write-through
    /// fails.
    pub fn write_chunk(&self, key: &[u64], chunk: ChunkData) -> Result<(), ChunkCacheError> {
        self.shared.write_chunk(key, chunk)?;
        if self.write_policy == WritePolicy::WriteThrough {
            self.shared.flush_key(key)?;
        }
        self.enforce_capacity();
        Ok(())
    }

    /// Synchronously write all dirty entries to the container.
    ///
    /// Every dirty entry is attempted. Dirty bits are cleared for
    /// successfully written entries.
    ///
    /// # Errors
    /// Returns the first error encountered.
    pub fn flush(&self) -> Result<(), ChunkCacheError> {
        self.shared.flush()
    }

    /// Evict entries, least recently accessed first, until the cache holds at
    /// most `target_bytes` of chunk data.
    ///
    /// Dirty entries are written back before removal. A write-back failure
    /// aborts that entry's eviction and continues with others.
    ///
    /// # Errors
    /// Returns the first write-back error encountered.
    pub fn evict_to(&self, target_bytes: usize) -> Result<(), ChunkCacheError> {
        self.shared.evict_to(target_bytes)
    }

    /// Return a point-in-time snapshot of the cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.shared.stats()
    }

    /// Signal the background writer to shut down and join it.
    ///
    /// The writer performs one final flush before exiting. Dropping the cache
    /// implicitly calls `stop` and then runs a final synchronous
    /// [`flush`](Self::flush).
    pub fn stop(&mut self) {
        {
            let mut shutdown = self.shared.shutdown.lock();
            *shutdown = true;
        }
        self.shared.shutdown_signal.notify_all();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!("write-back thread panicked");
            }
        }
    }

    fn enforce_capacity(&self) {
        if let Some(capacity) = self.capacity {
            if let Err(err) = self.shared.evict_to(capacity) {
                warn!("capacity eviction: {err}");
            }
        }
    }
}

impl Drop for ChunkCache {
    fn drop(&mut self) {
        self.stop();
        if let Err(err) = self.shared.flush() {
            warn!("final flush: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use crate::container::{ContainerFile, OpenMode};

    use super::*;

    fn nz(shape: &[u64]) -> ChunkShape {
        shape.iter().map(|&i| NonZeroU64::new(i).unwrap()).collect()
    }

    fn test_cache(
        dir: &std::path::Path,
        options: &ChunkCacheOptions,
    ) -> (ContainerFile, ChunkCache, ArrayMetadata) {
        let file = ContainerFile::open(dir.join("cache.gcf"), OpenMode::CreateTruncate).unwrap();
        let metadata = ArrayMetadata::new(vec![7], nz(&[3]), DataType::UInt8, None);
        let dataset = file
            .create_dataset("/c", metadata.dtype, &metadata.shape, &metadata.chunk_shape, None)
            .unwrap();
        let cache = ChunkCache::new(Arc::new(dataset), &metadata, options);
        (file, cache, metadata)
    }

    fn chunk(data: Vec<u8>) -> ChunkData {
        let shape = vec![data.len() as u64];
        ChunkData {
            data,
            dtype: DataType::UInt8,
            shape,
        }
    }

    #[test]
    fn chunk_cache_hits_and_misses() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (_file, cache, _) = test_cache(
            tmp.path(),
            &ChunkCacheOptions {
                write_policy: WritePolicy::WriteBack,
                write_interval: Duration::from_secs(60),
                capacity: None,
            },
        );
        let first = cache.read_chunk(&[0]).unwrap();
        assert_eq!(first.data, vec![0, 0, 0]);
        let second = cache.read_chunk(&[0]).unwrap();
        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);

        // The partial edge chunk has a clipped extent of one element.
        let edge = cache.read_chunk(&[2]).unwrap();
        assert_eq!(edge.shape, vec![1]);

        assert!(matches!(
            cache.read_chunk(&[3]),
            Err(ChunkCacheError::InvalidChunkIndices(_))
        ));
    }

    #[test]
    fn chunk_cache_write_validation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (_file, cache, _) = test_cache(
            tmp.path(),
            &ChunkCacheOptions {
                write_policy: WritePolicy::WriteBack,
                write_interval: Duration::from_secs(60),
                capacity: None,
            },
        );
        // The edge chunk takes its clipped extent only.
        assert!(matches!(
            cache.write_chunk(&[2], chunk(vec![1, 2, 3])),
            Err(ChunkCacheError::InvalidChunkData { .. })
        ));
        cache.write_chunk(&[2], chunk(vec![1])).unwrap();
        assert_eq!(cache.stats().dirty_count, 1);
    }

    #[test]
    fn chunk_cache_flush_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (file, cache, _) = test_cache(
            tmp.path(),
            &ChunkCacheOptions {
                write_policy: WritePolicy::WriteBack,
                write_interval: Duration::from_secs(60),
                capacity: None,
            },
        );
        cache.write_chunk(&[0], chunk(vec![1, 2, 3])).unwrap();
        cache.write_chunk(&[1], chunk(vec![4, 5, 6])).unwrap();
        cache.flush().unwrap();
        assert_eq!(cache.stats().dirty_count, 0);
        let len_after_first = std::fs::metadata(file.path()).unwrap().len();
        // A second flush writes nothing: no entry is re-written when clean.
        cache.flush().unwrap();
        let len_after_second = std::fs::metadata(file.path()).unwrap().len();
        assert_eq!(len_after_first, len_after_second);
    }

    #[test]
    fn chunk_cache_lru_eviction() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (_file, cache, _) = test_cache(
            tmp.path(),
            &ChunkCacheOptions {
                write_policy: WritePolicy::WriteBack,
                write_interval: Duration::from_secs(60),
                capacity: None,
            },
        );
        cache.write_chunk(&[0], chunk(vec![1, 2, 3])).unwrap();
        cache.write_chunk(&[1], chunk(vec![4, 5, 6])).unwrap();
        cache.write_chunk(&[2], chunk(vec![7])).unwrap();
        // Evict to a size permitting only the most recently accessed entry.
        cache.evict_to(1).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 1);
        // The survivor is the last accessed key; reading it is a hit.
        let hits_before = stats.hits;
        cache.read_chunk(&[2]).unwrap();
        assert_eq!(cache.stats().hits, hits_before + 1);
        // Evicted dirty entries were written back, not discarded.
        let reread = cache.read_chunk(&[0]).unwrap();
        assert_eq!(reread.data, vec![1, 2, 3]);
    }

    #[test]
    fn chunk_cache_write_through() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (file, cache, _) = test_cache(
            tmp.path(),
            &ChunkCacheOptions {
                write_policy: WritePolicy::WriteThrough,
                write_interval: Duration::from_secs(60),
                capacity: None,
            },
        );
        cache.write_chunk(&[0], chunk(vec![9, 8, 7])).unwrap();
        assert_eq!(cache.stats().dirty_count, 0);
        // The data reached the container without an explicit flush.
        let (dataset, _) = file.open_dataset("/c").unwrap();
        let mut out = vec![0u8; 3];
        dataset
            .read_hyperslab(&[0], &[3], DataType::UInt8, &mut out)
            .unwrap();
        assert_eq!(out, vec![9, 8, 7]);
    }

    #[test]
    fn chunk_cache_coalescing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (_file, cache, _) = test_cache(
            tmp.path(),
            &ChunkCacheOptions {
                write_policy: WritePolicy::WriteBack,
                write_interval: Duration::from_secs(60),
                capacity: None,
            },
        );
        let cache = Arc::new(cache);
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.read_chunk(&[1]).unwrap())
            })
            .collect();
        for thread in threads {
            assert_eq!(thread.join().unwrap().data, vec![0, 0, 0]);
        }
        // However the threads interleaved, exactly one container read was
        // issued.
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 7);
    }

    #[test]
    fn chunk_cache_write_back_durability() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("durability.gcf");
        let metadata = ArrayMetadata::new(vec![7], nz(&[3]), DataType::UInt8, None);
        {
            let file = ContainerFile::open(&path, OpenMode::CreateTruncate).unwrap();
            let dataset = file
                .create_dataset("/d", metadata.dtype, &metadata.shape, &metadata.chunk_shape, None)
                .unwrap();
            let mut cache = ChunkCache::new(
                Arc::new(dataset),
                &metadata,
                &ChunkCacheOptions {
                    write_policy: WritePolicy::WriteBack,
                    write_interval: Duration::from_secs(3600),
                    capacity: None,
                },
            );
            cache.write_chunk(&[0], chunk(vec![1, 2, 3])).unwrap();
            cache.write_chunk(&[1], chunk(vec![4, 5, 6])).unwrap();
            cache.write_chunk(&[2], chunk(vec![7])).unwrap();
            cache.stop();
        }
        let file = ContainerFile::open(&path, OpenMode::ReadOnly).unwrap();
        let (dataset, _) = file.open_dataset("/d").unwrap();
        let mut out = vec![0u8; 7];
        dataset
            .read_hyperslab(&[0], &[7], DataType::UInt8, &mut out)
            .unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn chunk_cache_background_writer() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (_file, cache, _) = test_cache(
            tmp.path(),
            &ChunkCacheOptions {
                write_policy: WritePolicy::WriteBack,
                write_interval: Duration::from_millis(20),
                capacity: None,
            },
        );
        cache.write_chunk(&[0], chunk(vec![1, 2, 3])).unwrap();
        // The background writer clears the dirty bit within a few cycles.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.stats().dirty_count != 0 {
            assert!(std::time::Instant::now() < deadline, "writer did not flush");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn chunk_cache_capacity() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (_file, cache, _) = test_cache(
            tmp.path(),
            &ChunkCacheOptions {
                write_policy: WritePolicy::WriteBack,
                write_interval: Duration::from_secs(60),
                capacity: Some(3),
            },
        );
        cache.write_chunk(&[0], chunk(vec![1, 2, 3])).unwrap();
        cache.write_chunk(&[1], chunk(vec![4, 5, 6])).unwrap();
        assert!(cache.stats().total_bytes <= 3);
    }
}
