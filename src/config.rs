//! Global configuration options.

use std::{
    sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::chunk_cache::WritePolicy;

/// Global configuration options for the `gridfile` crate.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with
/// [`global_config_mut`].
///
/// ## Write Policy
/// > default: [`WritePolicy::WriteBack`]
///
/// The default chunk cache write policy for newly opened drivers.
///
/// ## Write Interval
/// > default: 1 second
///
/// The default interval between background write-back cycles.
///
/// ## Chunk Cache Capacity
/// > default: [`None`] (unbounded)
///
/// The default chunk cache capacity in bytes. When set, the cache evicts
/// least-recently-accessed entries to stay at or below the capacity.
#[derive(Debug)]
pub struct Config {
    write_policy: WritePolicy,
    write_interval: Duration,
    chunk_cache_capacity: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            write_policy: WritePolicy::WriteBack,
            write_interval: Duration::from_secs(1),
            chunk_cache_capacity: None,
        }
    }
}

impl Config {
    /// Get the [write policy](#write-policy) configuration.
    #[must_use]
    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    /// Set the [write policy](#write-policy) configuration.
    pub fn set_write_policy(&mut self, write_policy: WritePolicy) {
        self.write_policy = write_policy;
    }

    /// Get the [write interval](#write-interval) configuration.
    #[must_use]
    pub fn write_interval(&self) -> Duration {
        self.write_interval
    }

    /// Set the [write interval](#write-interval) configuration.
    pub fn set_write_interval(&mut self, write_interval: Duration) {
        self.write_interval = write_interval;
    }

    /// Get the [chunk cache capacity](#chunk-cache-capacity) configuration.
    #[must_use]
    pub fn chunk_cache_capacity(&self) -> Option<usize> {
        self.chunk_cache_capacity
    }

    /// Set the [chunk cache capacity](#chunk-cache-capacity) configuration.
    pub fn set_chunk_cache_capacity(&mut self, chunk_cache_capacity: Option<usize>) {
        self.chunk_cache_capacity = chunk_cache_capacity;
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global `gridfile` configuration.
///
/// # Panics
/// Panics if the underlying lock has been poisoned.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .read()
        .unwrap()
}

/// Returns a mutable reference to the global `gridfile` configuration.
///
/// # Panics
/// Panics if the underlying lock has been poisoned.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .write()
        .unwrap()
}
