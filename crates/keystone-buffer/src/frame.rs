//! Typed buffer frames.

use keystone_common::page::PageId;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Position of a frame within the pool's frame set.
///
/// Frame ids are minted sequentially while the pool grows and recycled
/// through the free list once their page is deleted; a frame id always
/// names a live slot, so there is no "no frame" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

/// A frame holding a single typed page.
///
/// Frames carry the pin count and dirty flag for the page they hold; the
/// node payload sits behind a reader-writer lock so borrowers of different
/// frames never contend.
pub struct Frame<N> {
    frame_id: FrameId,
    page_id: PageId,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    node: RwLock<Option<N>>,
}

impl<N> Frame<N> {
    /// Creates a frame holding `node` for `page_id`, initially unpinned.
    pub fn new(frame_id: FrameId, page_id: PageId, node: N) -> Self {
        Self {
            frame_id,
            page_id,
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            node: RwLock::new(Some(node)),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID currently stored in this frame.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and returns the previous value.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrements the pin count and returns the new value. A frame already
    /// at zero stays at zero.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // Underflow protection: restore to 0.
            self.pin_count.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if this frame's page has been modified.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Marks this frame dirty or clean.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Read access to the node, or None if the page was taken for eviction.
    pub fn try_read(&self) -> Option<MappedRwLockReadGuard<'_, N>> {
        RwLockReadGuard::try_map(self.node.read(), |slot| slot.as_ref()).ok()
    }

    /// Write access to the node, or None if the page was taken for eviction.
    pub fn try_write(&self) -> Option<MappedRwLockWriteGuard<'_, N>> {
        RwLockWriteGuard::try_map(self.node.write(), |slot| slot.as_mut()).ok()
    }

    /// Takes the node out of the frame. Used when evicting.
    pub(crate) fn take_node(&self) -> Option<N> {
        self.node.write().take()
    }
}
