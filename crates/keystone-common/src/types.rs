//! Transaction identifiers.

use serde::{Deserialize, Serialize};

/// Unique identifier of a transaction.
///
/// Ids are handed out monotonically, so a smaller id always denotes an older
/// transaction. Deadlock prevention in the lock manager relies on this
/// ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}
