//! Range iteration over the leaf chain.

use crate::node::Node;
use keystone_buffer::{PageHandle, PagePool};
use keystone_common::error::{KeystoneError, Result};
use keystone_common::page::PageId;
use std::sync::Arc;

/// Ordered scan over the tree's leaves.
///
/// The iterator pins at most one leaf at a time, moving its pin along the
/// chain as it advances and releasing it when dropped. Position is kept
/// normalized: either the in-leaf index points at a live entry, or the
/// iterator sits past the last entry of the last leaf.
pub struct IndexIterator<K, V> {
    pool: Arc<PagePool<Node<K, V>>>,
    position: Option<(PageId, PageHandle<Node<K, V>>)>,
    index: usize,
}

impl<K: Clone, V: Clone> IndexIterator<K, V> {
    /// Builds an iterator over the leaf in `handle` starting at `index`,
    /// normalizing past-the-end positions onto the next leaf.
    pub(crate) fn new(
        pool: Arc<PagePool<Node<K, V>>>,
        leaf_id: PageId,
        handle: PageHandle<Node<K, V>>,
        index: usize,
    ) -> Result<Self> {
        let mut iterator = Self {
            pool,
            position: Some((leaf_id, handle)),
            index,
        };
        iterator.normalize()?;
        Ok(iterator)
    }

    fn leaf_shape(&self) -> Option<(usize, PageId)> {
        let (_, handle) = self.position.as_ref()?;
        let node = handle.read();
        let leaf = node.as_leaf()?;
        Some((leaf.size(), leaf.next_page_id()))
    }

    /// Hops to the next leaf while the index sits past the current leaf's
    /// entries. On a failed fetch the held leaf is released and the
    /// iterator becomes exhausted before the error surfaces.
    fn normalize(&mut self) -> Result<()> {
        loop {
            let Some((size, next_page_id)) = self.leaf_shape() else {
                return Ok(());
            };
            if self.index < size || !next_page_id.is_valid() {
                return Ok(());
            }
            self.release();
            let next_handle = match self.pool.fetch(next_page_id) {
                Some(handle) => handle,
                None => return Err(KeystoneError::BufferPoolExhausted),
            };
            self.position = Some((next_page_id, next_handle));
            self.index = 0;
        }
    }

    /// True once the iterator has moved past the last entry of the last
    /// leaf.
    pub fn is_end(&self) -> bool {
        match self.leaf_shape() {
            Some((size, _)) => self.index >= size,
            None => true,
        }
    }

    /// Returns the entry at the current position.
    pub fn current(&self) -> Result<(K, V)> {
        let Some((_, handle)) = self.position.as_ref() else {
            return Err(KeystoneError::IteratorOutOfRange);
        };
        let node = handle.read();
        let Some(leaf) = node.as_leaf() else {
            return Err(KeystoneError::IteratorOutOfRange);
        };
        if self.index >= leaf.size() {
            return Err(KeystoneError::IteratorOutOfRange);
        }
        let (key, value) = leaf.item_at(self.index);
        Ok((key.clone(), value.clone()))
    }

    /// Steps to the next entry, following the leaf chain as needed.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            return Err(KeystoneError::IteratorOutOfRange);
        }
        self.index += 1;
        self.normalize()
    }
}

impl<K, V> IndexIterator<K, V> {
    /// Builds an exhausted iterator (empty tree).
    pub(crate) fn end(pool: Arc<PagePool<Node<K, V>>>) -> Self {
        Self {
            pool,
            position: None,
            index: 0,
        }
    }

    fn release(&mut self) {
        if let Some((leaf_id, handle)) = self.position.take() {
            drop(handle);
            self.pool.unpin(leaf_id, false);
        }
    }
}

impl<K: Clone, V: Clone> Iterator for IndexIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let item = self.current().ok()?;
        // A failed advance exhausts the iterator; the item read out is
        // still valid.
        let _ = self.advance();
        Some(item)
    }
}

impl<K, V> Drop for IndexIterator<K, V> {
    fn drop(&mut self) {
        self.release();
    }
}
