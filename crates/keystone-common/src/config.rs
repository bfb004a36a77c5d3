//! Configuration structures for the Keystone core.

use serde::{Deserialize, Serialize};

/// Buffer pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// B+-tree index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Maximum number of entries a leaf node holds before it splits.
    pub leaf_max_size: usize,
    /// Maximum number of child pointers an internal node holds before it splits.
    pub internal_max_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            leaf_max_size: 32,
            internal_max_size: 32,
        }
    }
}

/// Extendible hash table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashConfig {
    /// Fixed capacity of each bucket.
    pub bucket_size: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self { bucket_size: 64 }
    }
}

/// Lock manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// When true, locks may only be released once the transaction has
    /// committed or aborted.
    pub strict_two_phase: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            strict_two_phase: true,
        }
    }
}

/// Aggregate configuration for the storage core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Buffer pool settings.
    pub buffer: BufferPoolConfig,
    /// B+-tree settings.
    pub index: IndexConfig,
    /// Extendible hash settings.
    pub hash: HashConfig,
    /// Lock manager settings.
    pub lock: LockConfig,
}
