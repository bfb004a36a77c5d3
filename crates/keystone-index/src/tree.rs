//! Paged B+-tree index.
//!
//! The tree is a client of the page pool: every node lives on one page,
//! fetched and pinned for the duration of a visit and unpinned on every
//! exit path. Callers serialize structurally conflicting operations; the
//! pool provides page-level safety underneath.

use crate::header::HeaderPage;
use crate::iterator::IndexIterator;
use crate::key::{KeyComparator, KeyFromInteger};
use crate::node::{InternalNode, LeafNode, Node};
use keystone_buffer::{PageHandle, PagePool};
use keystone_common::config::IndexConfig;
use keystone_common::error::{KeystoneError, Result};
use keystone_common::page::PageId;
use keystone_concurrency::Transaction;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

fn corrupt(context: &str) -> KeystoneError {
    KeystoneError::CorruptNode(context.to_string())
}

/// B+-tree index over a typed page pool.
///
/// Polymorphic over key, value, and comparator; keys are globally unique.
pub struct BPlusTree<K, V, C> {
    index_name: String,
    root_page_id: AtomicI32,
    pool: Arc<PagePool<Node<K, V>>>,
    header: Arc<HeaderPage>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: Clone,
    V: Clone,
    C: KeyComparator<K>,
{
    /// Creates an empty index named `index_name`.
    pub fn new(
        index_name: impl Into<String>,
        pool: Arc<PagePool<Node<K, V>>>,
        header: Arc<HeaderPage>,
        comparator: C,
        config: &IndexConfig,
    ) -> Self {
        assert!(config.leaf_max_size >= 2, "leaf nodes need room to split");
        assert!(
            config.internal_max_size >= 3,
            "internal nodes need room to split"
        );
        Self {
            index_name: index_name.into(),
            root_page_id: AtomicI32::new(PageId::INVALID.0),
            pool,
            header,
            comparator,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
        }
    }

    /// Returns the current root page id.
    pub fn root_page_id(&self) -> PageId {
        PageId(self.root_page_id.load(Ordering::Acquire))
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    /// Records a root change in the header page: the record is created on
    /// the first installation and updated on every later change.
    fn set_root_page_id(&self, root: PageId, first_installation: bool) {
        self.root_page_id.store(root.0, Ordering::Release);
        if !first_installation || !self.header.insert_record(&self.index_name, root) {
            self.header.update_record(&self.index_name, root);
        }
    }

    /// Descends to the leaf covering `key`, or the leftmost leaf when
    /// `key` is None. Internal pages along the way are unpinned clean; the
    /// returned leaf stays pinned.
    fn find_leaf(&self, key: Option<&K>) -> Result<(PageId, PageHandle<Node<K, V>>)> {
        let mut page_id = self.root_page_id();
        let mut handle = self
            .pool
            .fetch(page_id)
            .ok_or(KeystoneError::BufferPoolExhausted)?;
        loop {
            let next = {
                let node = handle.read();
                match &*node {
                    Node::Leaf(_) => break,
                    Node::Internal(internal) => match key {
                        Some(key) => internal.lookup(key, &self.comparator),
                        None => internal.value_at(0),
                    },
                }
            };
            self.pool.unpin(page_id, false);
            page_id = next;
            handle = self
                .pool
                .fetch(page_id)
                .ok_or(KeystoneError::BufferPoolExhausted)?;
        }
        Ok((page_id, handle))
    }

    /// Point lookup: appends the value stored under `key` to `result`.
    /// Returns false when the tree is empty or the key is absent.
    pub fn get_value(&self, key: &K, result: &mut Vec<V>) -> bool {
        if self.is_empty() {
            return false;
        }
        let Ok((leaf_id, handle)) = self.find_leaf(Some(key)) else {
            return false;
        };
        let found = {
            let node = handle.read();
            node.as_leaf()
                .and_then(|leaf| leaf.lookup(key, &self.comparator).cloned())
        };
        self.pool.unpin(leaf_id, false);
        match found {
            Some(value) => {
                result.push(value);
                true
            }
            None => false,
        }
    }

    /// Inserts a key/value pair. Keys are unique: inserting an existing
    /// key changes nothing and returns Ok(false).
    pub fn insert(&self, key: K, value: V, _txn: &Transaction) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, value)
    }

    /// Builds the first leaf, which doubles as the root.
    fn start_new_tree(&self, key: K, value: V) -> Result<()> {
        let leaf_max_size = self.leaf_max_size;
        let (root_id, handle) = self
            .pool
            .new_page(|pid| Node::Leaf(LeafNode::new(pid, PageId::INVALID, leaf_max_size)))
            .ok_or(KeystoneError::BufferPoolExhausted)?;
        {
            let mut node = handle.write();
            if let Some(leaf) = node.as_leaf_mut() {
                leaf.insert(key, value, &self.comparator);
            }
        }
        self.set_root_page_id(root_id, true);
        self.pool.unpin(root_id, true);
        Ok(())
    }

    fn insert_into_leaf(&self, key: K, value: V) -> Result<bool> {
        let (leaf_id, handle) = self.find_leaf(Some(&key))?;

        let (duplicate, full, parent_id) = {
            let node = handle.read();
            let Some(leaf) = node.as_leaf() else {
                self.pool.unpin(leaf_id, false);
                return Err(corrupt("descent ended on a non-leaf page"));
            };
            (
                leaf.lookup(&key, &self.comparator).is_some(),
                leaf.size() >= leaf.max_size(),
                node.parent_page_id(),
            )
        };
        if duplicate {
            self.pool.unpin(leaf_id, false);
            return Ok(false);
        }
        if !full {
            {
                let mut node = handle.write();
                if let Some(leaf) = node.as_leaf_mut() {
                    leaf.insert(key, value, &self.comparator);
                }
            }
            self.pool.unpin(leaf_id, true);
            return Ok(true);
        }

        // Full leaf: allocate the sibling before anything moves, so an
        // allocation failure leaves the tree untouched.
        let leaf_max_size = self.leaf_max_size;
        let Some((sibling_id, sibling_handle)) = self
            .pool
            .new_page(|pid| Node::Leaf(LeafNode::new(pid, parent_id, leaf_max_size)))
        else {
            self.pool.unpin(leaf_id, false);
            return Err(KeystoneError::BufferPoolExhausted);
        };

        let separator = {
            let mut node = handle.write();
            let mut sibling_node = sibling_handle.write();
            match (node.as_leaf_mut(), sibling_node.as_leaf_mut()) {
                (Some(leaf), Some(sibling)) => {
                    leaf.insert(key, value, &self.comparator);
                    leaf.move_half_to(sibling);
                    sibling.key_at(0).clone()
                }
                _ => {
                    self.pool.unpin(leaf_id, false);
                    self.pool.unpin(sibling_id, false);
                    return Err(corrupt("leaf split touched a non-leaf page"));
                }
            }
        };

        self.insert_into_parent(leaf_id, &handle, separator, sibling_id, &sibling_handle)?;
        Ok(true)
    }

    /// Hooks `new_id` (split off `old_id`) into their parent, splitting
    /// upward as needed. Unpins both pages on every path.
    fn insert_into_parent(
        &self,
        old_id: PageId,
        old_handle: &PageHandle<Node<K, V>>,
        key: K,
        new_id: PageId,
        new_handle: &PageHandle<Node<K, V>>,
    ) -> Result<()> {
        let parent_id = { old_handle.read().parent_page_id() };

        if !parent_id.is_valid() {
            // The split node was the root: grow a new root above the pair.
            let internal_max_size = self.internal_max_size;
            let Some((root_id, root_handle)) = self.pool.new_page(|pid| {
                Node::Internal(InternalNode::new(pid, PageId::INVALID, internal_max_size))
            }) else {
                self.pool.unpin(old_id, true);
                self.pool.unpin(new_id, true);
                return Err(KeystoneError::BufferPoolExhausted);
            };
            {
                let mut root = root_handle.write();
                if let Some(internal) = root.as_internal_mut() {
                    internal.populate_new_root(old_id, key, new_id);
                }
            }
            old_handle.write().set_parent_page_id(root_id);
            new_handle.write().set_parent_page_id(root_id);
            self.set_root_page_id(root_id, false);
            self.pool.unpin(old_id, true);
            self.pool.unpin(new_id, true);
            self.pool.unpin(root_id, true);
            return Ok(());
        }

        let Some(parent_handle) = self.pool.fetch(parent_id) else {
            self.pool.unpin(old_id, true);
            self.pool.unpin(new_id, true);
            return Err(KeystoneError::BufferPoolExhausted);
        };

        let parent_full = { parent_handle.read().size() >= self.internal_max_size };
        if !parent_full {
            {
                let mut parent = parent_handle.write();
                if let Some(internal) = parent.as_internal_mut() {
                    internal.insert_node_after(old_id, key, new_id);
                }
            }
            new_handle.write().set_parent_page_id(parent_id);
            self.pool.unpin(old_id, true);
            self.pool.unpin(new_id, true);
            self.pool.unpin(parent_id, true);
            return Ok(());
        }

        // The parent is full too: allocate its sibling up front, then split
        // and recurse.
        let grandparent_id = { parent_handle.read().parent_page_id() };
        let internal_max_size = self.internal_max_size;
        let Some((psib_id, psib_handle)) = self.pool.new_page(|pid| {
            Node::Internal(InternalNode::new(pid, grandparent_id, internal_max_size))
        }) else {
            self.pool.unpin(old_id, true);
            self.pool.unpin(new_id, true);
            self.pool.unpin(parent_id, false);
            return Err(KeystoneError::BufferPoolExhausted);
        };

        let (separator, moved_children) = {
            let mut parent = parent_handle.write();
            let mut psib = psib_handle.write();
            match (parent.as_internal_mut(), psib.as_internal_mut()) {
                (Some(parent_internal), Some(sibling_internal)) => {
                    parent_internal.insert_node_after(old_id, key, new_id);
                    let separator = parent_internal.move_half_to(sibling_internal);
                    (separator, sibling_internal.children().to_vec())
                }
                _ => {
                    self.pool.unpin(old_id, true);
                    self.pool.unpin(new_id, true);
                    self.pool.unpin(parent_id, false);
                    self.pool.unpin(psib_id, false);
                    return Err(corrupt("internal split touched a non-internal page"));
                }
            }
        };

        // Children that migrated need their parent link rewritten; the two
        // pages already in hand are updated through their handles.
        for &child_id in &moved_children {
            if child_id == old_id {
                old_handle.write().set_parent_page_id(psib_id);
            } else if child_id == new_id {
                new_handle.write().set_parent_page_id(psib_id);
            } else {
                self.reparent(child_id, psib_id)?;
            }
        }
        if !moved_children.contains(&new_id) {
            new_handle.write().set_parent_page_id(parent_id);
        }
        self.pool.unpin(old_id, true);
        self.pool.unpin(new_id, true);

        self.insert_into_parent(parent_id, &parent_handle, separator, psib_id, &psib_handle)
    }

    /// Removes `key`. Absent keys are a no-op.
    pub fn remove(&self, key: &K, _txn: &Transaction) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let (leaf_id, handle) = self.find_leaf(Some(key))?;
        let removed = {
            let mut node = handle.write();
            match node.as_leaf_mut() {
                Some(leaf) => leaf.remove_and_delete_record(key, &self.comparator),
                None => {
                    self.pool.unpin(leaf_id, false);
                    return Err(corrupt("descent ended on a non-leaf page"));
                }
            }
        };
        if !removed {
            self.pool.unpin(leaf_id, false);
            return Ok(());
        }

        let delete_node = self.coalesce_or_redistribute(leaf_id, &handle)?;
        self.pool.unpin(leaf_id, true);
        if delete_node {
            self.pool.delete_page(leaf_id);
        }
        Ok(())
    }

    /// Restores the occupancy invariant around `page_id` after a removal.
    /// Returns true if the caller should delete the page: merging always
    /// folds the right-hand node of the pair into the left-hand one, so
    /// the node itself is deleted exactly when it was the right-hand side.
    fn coalesce_or_redistribute(
        &self,
        page_id: PageId,
        handle: &PageHandle<Node<K, V>>,
    ) -> Result<bool> {
        let (is_root, size, min_size, max_size, parent_id) = {
            let node = handle.read();
            (
                node.is_root(),
                node.size(),
                node.min_size(),
                node.max_size(),
                node.parent_page_id(),
            )
        };
        if is_root {
            return self.adjust_root(handle);
        }
        if size >= min_size {
            return Ok(false);
        }

        let parent_handle = self
            .pool
            .fetch(parent_id)
            .ok_or(KeystoneError::BufferPoolExhausted)?;
        let (node_index, sibling_id) = {
            let parent = parent_handle.read();
            let lookup = parent.as_internal().and_then(|internal| {
                internal
                    .value_index(page_id)
                    .map(|node_index| {
                        // Prefer the predecessor; the leftmost child falls
                        // back to its successor.
                        let sibling_index = if node_index == 0 { 1 } else { node_index - 1 };
                        (node_index, internal.value_at(sibling_index))
                    })
            });
            match lookup {
                Some(found) => found,
                None => {
                    self.pool.unpin(parent_id, false);
                    return Err(corrupt("node missing from its parent"));
                }
            }
        };
        let Some(sibling_handle) = self.pool.fetch(sibling_id) else {
            self.pool.unpin(parent_id, false);
            return Err(KeystoneError::BufferPoolExhausted);
        };
        let sibling_size = { sibling_handle.read().size() };

        if sibling_size + size > max_size {
            // Enough entries between the two: borrow one across the edge.
            if let Err(error) =
                self.redistribute(page_id, handle, &sibling_handle, &parent_handle, node_index)
            {
                self.pool.unpin(sibling_id, false);
                self.pool.unpin(parent_id, false);
                return Err(error);
            }
            self.pool.unpin(sibling_id, true);
            self.pool.unpin(parent_id, true);
            return Ok(false);
        }

        // Merge the right-hand node of the pair into the left-hand one.
        let node_is_right = node_index != 0;
        let merge_result = if node_is_right {
            self.merge_into_left(&sibling_handle, handle, &parent_handle, node_index)
        } else {
            self.merge_into_left(handle, &sibling_handle, &parent_handle, 1)
        };
        if let Err(error) = merge_result {
            self.pool.unpin(sibling_id, false);
            self.pool.unpin(parent_id, false);
            return Err(error);
        }

        // The parent lost an entry; rebalance it before letting go.
        let delete_parent = match self.coalesce_or_redistribute(parent_id, &parent_handle) {
            Ok(delete_parent) => delete_parent,
            Err(error) => {
                self.pool.unpin(sibling_id, true);
                self.pool.unpin(parent_id, true);
                return Err(error);
            }
        };
        self.pool.unpin(parent_id, true);
        if delete_parent {
            self.pool.delete_page(parent_id);
        }

        self.pool.unpin(sibling_id, true);
        if node_is_right {
            Ok(true)
        } else {
            self.pool.delete_page(sibling_id);
            Ok(false)
        }
    }

    /// Folds the right-hand node into the left-hand one and drops the
    /// separator entry from the parent.
    fn merge_into_left(
        &self,
        left_handle: &PageHandle<Node<K, V>>,
        right_handle: &PageHandle<Node<K, V>>,
        parent_handle: &PageHandle<Node<K, V>>,
        right_index: usize,
    ) -> Result<()> {
        let moved_children = {
            let mut parent = parent_handle.write();
            let Some(parent_internal) = parent.as_internal_mut() else {
                return Err(corrupt("parent is not an internal page"));
            };
            let mut left = left_handle.write();
            let mut right = right_handle.write();
            let moved_children = match (&mut *left, &mut *right) {
                (Node::Leaf(left_leaf), Node::Leaf(right_leaf)) => {
                    right_leaf.move_all_to(left_leaf);
                    Vec::new()
                }
                (Node::Internal(left_internal), Node::Internal(right_internal)) => {
                    let separator = parent_internal.key_at(right_index).clone();
                    let moved = right_internal.children().to_vec();
                    right_internal.move_all_to(left_internal, separator);
                    moved
                }
                _ => return Err(corrupt("merge across mismatched node kinds")),
            };
            parent_internal.remove(right_index);
            moved_children
        };

        let left_id = left_handle.page_id();
        for child_id in moved_children {
            self.reparent(child_id, left_id)?;
        }
        Ok(())
    }

    /// Moves one entry across the boundary between `page_id` and its
    /// sibling, rotating the separator key through the parent.
    fn redistribute(
        &self,
        page_id: PageId,
        node_handle: &PageHandle<Node<K, V>>,
        sibling_handle: &PageHandle<Node<K, V>>,
        parent_handle: &PageHandle<Node<K, V>>,
        node_index: usize,
    ) -> Result<()> {
        let moved_child = {
            let mut parent = parent_handle.write();
            let Some(parent_internal) = parent.as_internal_mut() else {
                return Err(corrupt("parent is not an internal page"));
            };
            let mut node = node_handle.write();
            let mut sibling = sibling_handle.write();
            match (&mut *node, &mut *sibling) {
                (Node::Leaf(node_leaf), Node::Leaf(sibling_leaf)) => {
                    if node_index == 0 {
                        // Successor lends its first entry.
                        if !sibling_leaf.move_first_to_end_of(node_leaf) {
                            return Err(corrupt("redistribution from an empty sibling"));
                        }
                        parent_internal.set_key_at(1, sibling_leaf.key_at(0).clone());
                    } else {
                        // Predecessor lends its last entry.
                        if !sibling_leaf.move_last_to_front_of(node_leaf) {
                            return Err(corrupt("redistribution from an empty sibling"));
                        }
                        parent_internal.set_key_at(node_index, node_leaf.key_at(0).clone());
                    }
                    None
                }
                (Node::Internal(node_internal), Node::Internal(sibling_internal)) => {
                    if node_index == 0 {
                        let separator = parent_internal.key_at(1).clone();
                        let Some((promoted, child)) =
                            sibling_internal.move_first_to_end_of(node_internal, separator)
                        else {
                            return Err(corrupt("redistribution from an empty sibling"));
                        };
                        parent_internal.set_key_at(1, promoted);
                        Some(child)
                    } else {
                        let separator = parent_internal.key_at(node_index).clone();
                        let Some((promoted, child)) =
                            sibling_internal.move_last_to_front_of(node_internal, separator)
                        else {
                            return Err(corrupt("redistribution from an empty sibling"));
                        };
                        parent_internal.set_key_at(node_index, promoted);
                        Some(child)
                    }
                }
                _ => return Err(corrupt("redistribution across mismatched node kinds")),
            }
        };

        if let Some(child_id) = moved_child {
            self.reparent(child_id, page_id)?;
        }
        Ok(())
    }

    /// Shrinks the root after a removal: an empty leaf root empties the
    /// tree, and an internal root left with a single child hands the root
    /// to that child. Returns true if the old root page should be deleted.
    fn adjust_root(&self, handle: &PageHandle<Node<K, V>>) -> Result<bool> {
        enum RootChange {
            BecameEmpty,
            Promote(PageId),
            Keep,
        }

        let change = {
            let node = handle.read();
            match &*node {
                Node::Leaf(leaf) => {
                    if leaf.size() == 0 {
                        RootChange::BecameEmpty
                    } else {
                        RootChange::Keep
                    }
                }
                Node::Internal(internal) => {
                    if internal.size() == 1 {
                        RootChange::Promote(internal.value_at(0))
                    } else {
                        RootChange::Keep
                    }
                }
            }
        };

        match change {
            RootChange::Keep => Ok(false),
            RootChange::BecameEmpty => {
                self.set_root_page_id(PageId::INVALID, false);
                Ok(true)
            }
            RootChange::Promote(child_id) => {
                self.reparent(child_id, PageId::INVALID)?;
                self.set_root_page_id(child_id, false);
                Ok(true)
            }
        }
    }

    /// Rewrites the parent link of `child_id`.
    fn reparent(&self, child_id: PageId, parent_id: PageId) -> Result<()> {
        let handle = self
            .pool
            .fetch(child_id)
            .ok_or(KeystoneError::BufferPoolExhausted)?;
        handle.write().set_parent_page_id(parent_id);
        self.pool.unpin(child_id, true);
        Ok(())
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator<K, V>> {
        if self.is_empty() {
            return Ok(IndexIterator::end(Arc::clone(&self.pool)));
        }
        let (leaf_id, handle) = self.find_leaf(None)?;
        IndexIterator::new(Arc::clone(&self.pool), leaf_id, handle, 0)
    }

    /// Iterator positioned at the first entry whose key is >= `key`.
    pub fn begin_from(&self, key: &K) -> Result<IndexIterator<K, V>> {
        if self.is_empty() {
            return Ok(IndexIterator::end(Arc::clone(&self.pool)));
        }
        let (leaf_id, handle) = self.find_leaf(Some(key))?;
        let index = {
            let node = handle.read();
            match node.as_leaf() {
                Some(leaf) => leaf.key_index(key, &self.comparator),
                None => 0,
            }
        };
        IndexIterator::new(Arc::clone(&self.pool), leaf_id, handle, index)
    }
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: Clone + KeyFromInteger,
    V: Clone + From<i64>,
    C: KeyComparator<K>,
{
    /// Reads one integer key per line and inserts each, with the value
    /// packed from the key. Returns how many keys were newly inserted.
    pub fn insert_from_file(&self, path: impl AsRef<Path>, txn: &Transaction) -> Result<usize> {
        let contents = std::fs::read_to_string(path)?;
        let mut inserted = 0;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let key: i64 = line
                .parse()
                .map_err(|_| KeystoneError::InvalidInput(format!("bad key line: {line}")))?;
            if self.insert(K::from_integer(key), V::from(key), txn)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Reads one integer key per line and removes each.
    pub fn remove_from_file(&self, path: impl AsRef<Path>, txn: &Transaction) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let key: i64 = line
                .parse()
                .map_err(|_| KeystoneError::InvalidInput(format!("bad key line: {line}")))?;
            self.remove(&K::from_integer(key), txn)?;
        }
        Ok(())
    }
}
