//! Page identifiers for Keystone storage.

use serde::{Deserialize, Serialize};

/// Nominal page size in bytes (16 KB). Buffer sizing is based on it.
pub const PAGE_SIZE: usize = 16 * 1024;

/// Page id of the header page holding index-name to root-page-id records.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Unique identifier for a page managed by the buffer pool.
///
/// Page ids are signed so that `-1` can serve as the "no page" sentinel;
/// B+-tree nodes use it for a missing parent or next-leaf link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    /// Sentinel for "no page".
    pub const INVALID: PageId = PageId(-1);

    /// Returns true if this is a valid page id.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}
