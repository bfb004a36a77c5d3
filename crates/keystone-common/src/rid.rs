//! Record identifiers.

use crate::page::PageId;
use serde::{Deserialize, Serialize};

/// Identifier of a single record: the page it lives on plus its slot number.
///
/// Equality and hashing are opaque; nothing outside this module should care
/// about the bit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Page the record lives on.
    pub page_id: PageId,
    /// Slot number within the page (0-indexed).
    pub slot: u32,
}

impl Rid {
    /// Creates a new Rid.
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Returns the Rid as a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        (((self.page_id.0 as u32) as u64) << 32) | (self.slot as u64)
    }
}

/// Builds a Rid from a packed integer: the high word is the page id, the low
/// word the slot. Used by the file-driven index loaders, which key records
/// by the integers they read.
impl From<i64> for Rid {
    fn from(value: i64) -> Self {
        Self {
            page_id: PageId((value >> 32) as i32),
            slot: value as u32,
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id.0, self.slot)
    }
}
