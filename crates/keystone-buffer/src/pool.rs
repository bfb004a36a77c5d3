//! Typed in-memory page pool.
//!
//! The pool hands out pinned handles to typed pages. Internally it routes
//! page ids to frames through the extendible hash directory and picks
//! eviction victims with the LRU replacer; evicted pages move node-intact
//! into a backing store and return on the next fetch, so eviction is
//! lossless without any disk underneath.

use crate::extendible::ExtendibleHashTable;
use crate::frame::{Frame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use keystone_common::config::BufferPoolConfig;
use keystone_common::page::{PageId, PAGE_SIZE};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;

/// Bucket capacity of the page-id directory.
const PAGE_TABLE_BUCKET_SIZE: usize = 64;

/// A pinned reference to a typed page.
///
/// The handle stays valid until the matching `unpin`; dropping it does not
/// release the pin.
pub struct PageHandle<N> {
    frame: Arc<Frame<N>>,
}

impl<N> PageHandle<N> {
    /// Returns the id of the page this handle refers to.
    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    /// Read access to the node.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, N> {
        self.frame
            .try_read()
            .expect("pinned page cannot be evicted")
    }

    /// Write access to the node.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, N> {
        self.frame
            .try_write()
            .expect("pinned page cannot be evicted")
    }
}

struct PoolInner<N> {
    /// Resident frames by frame id.
    frames: HashMap<FrameId, Arc<Frame<N>>>,
    /// Frame ids returned by deleted pages.
    free_frame_ids: Vec<FrameId>,
    /// Next frame id to mint while under capacity.
    next_frame_id: u32,
    /// Next page id to allocate. Page id 0 is reserved for the header page.
    next_page_id: i32,
    /// Pages currently evicted from the frame set.
    store: HashMap<PageId, N>,
}

/// Buffer pool over typed pages.
///
/// Pages are owned by the pool; borrowers pin on `fetch`/`new_page` and must
/// release every pin with `unpin`. A pinned page is never evicted.
pub struct PagePool<N> {
    config: BufferPoolConfig,
    /// Page id to frame id directory.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Victim queue over unpinned frames.
    replacer: LruReplacer<FrameId>,
    inner: Mutex<PoolInner<N>>,
}

impl<N> PagePool<N> {
    /// Creates a pool with the given configuration.
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            config,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruReplacer::new(),
            inner: Mutex::new(PoolInner {
                frames: HashMap::new(),
                free_frame_ids: Vec::new(),
                next_frame_id: 0,
                next_page_id: 1,
                store: HashMap::new(),
            }),
        }
    }

    /// Creates a pool sized to 25% of available system RAM, assuming the
    /// nominal page size. Minimum 1,000 frames so small machines still get
    /// useful caching.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let num_frames = (available_bytes / 4 / PAGE_SIZE).max(1_000);

        Self::new(BufferPoolConfig { num_frames })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of pages currently resident in frames.
    pub fn resident_page_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Returns the number of resident pages with a non-zero pin count.
    pub fn pinned_page_count(&self) -> usize {
        self.inner
            .lock()
            .frames
            .values()
            .filter(|frame| frame.is_pinned())
            .count()
    }

    /// Returns true if the page exists, resident or evicted.
    pub fn contains(&self, page_id: PageId) -> bool {
        let inner = self.inner.lock();
        self.page_table.find(&page_id).is_some() || inner.store.contains_key(&page_id)
    }

    /// Fetches a page, pinning it. Returns None if the page does not exist
    /// or no frame can be freed for it.
    pub fn fetch(&self, page_id: PageId) -> Option<PageHandle<N>> {
        let mut inner = self.inner.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            if let Some(frame) = inner.frames.get(&frame_id) {
                frame.pin();
                self.replacer.erase(frame_id);
                return Some(PageHandle {
                    frame: Arc::clone(frame),
                });
            }
        }

        if !inner.store.contains_key(&page_id) {
            return None;
        }
        let frame_id = self.grab_frame_id(&mut inner)?;
        let node = inner.store.remove(&page_id)?;
        let frame = Arc::new(Frame::new(frame_id, page_id, node));
        frame.pin();
        inner.frames.insert(frame_id, Arc::clone(&frame));
        self.page_table.insert(page_id, frame_id);
        Some(PageHandle { frame })
    }

    /// Allocates a new page, initialized by `init` with its assigned id, and
    /// returns it pinned. Returns None when no frame can be freed.
    pub fn new_page<F>(&self, init: F) -> Option<(PageId, PageHandle<N>)>
    where
        F: FnOnce(PageId) -> N,
    {
        let mut inner = self.inner.lock();

        let frame_id = self.grab_frame_id(&mut inner)?;
        let page_id = PageId(inner.next_page_id);
        inner.next_page_id += 1;

        let frame = Arc::new(Frame::new(frame_id, page_id, init(page_id)));
        frame.pin();
        inner.frames.insert(frame_id, Arc::clone(&frame));
        self.page_table.insert(page_id, frame_id);
        Some((page_id, PageHandle { frame }))
    }

    /// Releases one pin on `page_id`, marking it dirty if requested.
    /// Returns false if the page is not resident.
    pub fn unpin(&self, page_id: PageId, dirty: bool) -> bool {
        let inner = self.inner.lock();

        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };
        let Some(frame) = inner.frames.get(&frame_id) else {
            return false;
        };
        if dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.insert(frame_id);
        }
        true
    }

    /// Deletes a page. Returns false if the page is pinned or unknown.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let Some(frame) = inner.frames.get(&frame_id) else {
                return false;
            };
            if frame.is_pinned() {
                return false;
            }
            inner.frames.remove(&frame_id);
            self.page_table.remove(&page_id);
            self.replacer.erase(frame_id);
            inner.free_frame_ids.push(frame_id);
            true
        } else {
            inner.store.remove(&page_id).is_some()
        }
    }

    /// Produces a frame id for a new resident page: a recycled id, a fresh
    /// id while under capacity, or the frame of an evicted victim.
    fn grab_frame_id(&self, inner: &mut PoolInner<N>) -> Option<FrameId> {
        if let Some(frame_id) = inner.free_frame_ids.pop() {
            return Some(frame_id);
        }
        if (inner.next_frame_id as usize) < self.config.num_frames {
            let frame_id = FrameId(inner.next_frame_id);
            inner.next_frame_id += 1;
            return Some(frame_id);
        }

        let victim = self.replacer.victim()?;
        let frame = inner.frames.remove(&victim)?;
        let page_id = frame.page_id();
        self.page_table.remove(&page_id);
        if let Some(node) = frame.take_node() {
            inner.store.insert(page_id, node);
        }
        Some(victim)
    }
}
