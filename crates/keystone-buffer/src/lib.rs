//! Buffer layer for Keystone.
//!
//! This crate provides the in-memory side of the storage core:
//! - LRU victim selection for page eviction
//! - Extendible hashing for the page directory and as a general map
//! - A typed page pool with pin counting and dirty tracking

mod extendible;
mod frame;
mod pool;
mod replacer;

pub use extendible::{ExtendibleHashTable, HashKey};
pub use frame::{Frame, FrameId};
pub use pool::{PageHandle, PagePool};
pub use replacer::{LruReplacer, Replacer};
