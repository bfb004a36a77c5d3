//! B+-tree secondary index for Keystone.
//!
//! This crate provides the ordered key-to-value index of the storage core:
//! - Typed leaf and internal node views over pool pages
//! - The B+-tree itself, with split, merge, and redistribute rebalancing
//! - An ordered iterator over the leaf chain
//! - The header page recording each index's root

mod header;
mod iterator;
mod key;
mod node;
mod tree;

pub use header::HeaderPage;
pub use iterator::IndexIterator;
pub use key::{
    compare_key_bytes, IndexKey, IndexKeyComparator, KeyComparator, KeyFromInteger, OrdComparator,
};
pub use node::{InternalNode, LeafNode, Node};
pub use tree::BPlusTree;
