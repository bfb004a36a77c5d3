//! Transaction state tracked by the lock manager.

use keystone_common::rid::Rid;
use keystone_common::types::TxnId;
use std::collections::HashSet;

/// Phase of a transaction under two-phase locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Acquiring locks only.
    Growing,
    /// Releasing locks only.
    Shrinking,
    Committed,
    Aborted,
}

/// A transaction as seen by the lock manager: an id, a phase, and the sets
/// of record ids it holds shared and exclusive locks on.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    state: TransactionState,
    shared_rids: HashSet<Rid>,
    exclusive_rids: HashSet<Rid>,
}

impl Transaction {
    /// Creates a transaction in the growing phase.
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: TransactionState::Growing,
            shared_rids: HashSet::new(),
            exclusive_rids: HashSet::new(),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the current phase.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Sets the phase.
    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Record ids this transaction holds shared locks on.
    pub fn shared_rids(&self) -> &HashSet<Rid> {
        &self.shared_rids
    }

    /// Record ids this transaction holds exclusive locks on.
    pub fn exclusive_rids(&self) -> &HashSet<Rid> {
        &self.exclusive_rids
    }

    /// Marks the transaction committed.
    pub fn commit(&mut self) {
        self.state = TransactionState::Committed;
    }

    /// Marks the transaction aborted.
    pub fn abort(&mut self) {
        self.state = TransactionState::Aborted;
    }

    pub(crate) fn add_shared(&mut self, rid: Rid) {
        self.shared_rids.insert(rid);
    }

    pub(crate) fn add_exclusive(&mut self, rid: Rid) {
        self.exclusive_rids.insert(rid);
    }

    pub(crate) fn remove_shared(&mut self, rid: &Rid) -> bool {
        self.shared_rids.remove(rid)
    }

    pub(crate) fn remove_exclusive(&mut self, rid: &Rid) -> bool {
        self.exclusive_rids.remove(rid)
    }
}
