//! Record-level two-phase locking with wait-die deadlock prevention.
//!
//! Each record id gets a FIFO queue of lock requests. A single mutex guards
//! every queue and a single condition variable parks every waiter; waiters
//! re-check their own grant predicate after each wakeup, so spurious
//! wakeups are harmless. Deadlocks are prevented rather than detected: a
//! transaction younger than the oldest waiter aborts itself instead of
//! queueing behind a conflicting request.

use crate::transaction::{Transaction, TransactionState};
use keystone_common::rid::Rid;
use keystone_common::types::TxnId;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};

/// Lock compatibility mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct Request {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Debug)]
struct LockQueue {
    /// Requests in arrival order.
    requests: VecDeque<Request>,
    /// Smallest transaction id currently in the queue.
    oldest: TxnId,
    /// Pending or granted exclusive requests.
    exclusive_count: usize,
}

impl LockQueue {
    fn new(first: TxnId) -> Self {
        Self {
            requests: VecDeque::new(),
            oldest: first,
            exclusive_count: 0,
        }
    }
}

/// Lock manager implementing wait-die two-phase locking over record ids.
pub struct LockManager {
    strict_two_phase: bool,
    tables: Mutex<HashMap<Rid, LockQueue>>,
    waiters: Condvar,
}

impl LockManager {
    /// Creates a lock manager. With `strict_two_phase` set, unlocking is
    /// only legal once the transaction has committed or aborted.
    pub fn new(strict_two_phase: bool) -> Self {
        Self {
            strict_two_phase,
            tables: Mutex::new(HashMap::new()),
            waiters: Condvar::new(),
        }
    }

    /// Returns true if strict two-phase locking is enforced.
    pub fn is_strict(&self) -> bool {
        self.strict_two_phase
    }

    /// Acquires a shared lock on `rid`, blocking until every request ahead
    /// in the queue is a granted shared request. Returns false if the
    /// transaction is aborted on arrival or dies under wait-die.
    pub fn lock_shared(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        assert_eq!(
            txn.state(),
            TransactionState::Growing,
            "locks may only be acquired in the growing phase"
        );
        let txn_id = txn.id();

        let mut tables = self.tables.lock();
        let queue = tables.entry(rid).or_insert_with(|| LockQueue::new(txn_id));

        // Wait-die: a younger arrival conflicting with a queued exclusive
        // request dies instead of waiting.
        if !queue.requests.is_empty() && txn_id > queue.oldest && queue.exclusive_count > 0 {
            txn.abort();
            return false;
        }
        queue.oldest = queue.oldest.min(txn_id);
        queue.requests.push_back(Request {
            txn_id,
            mode: LockMode::Shared,
            granted: false,
        });

        loop {
            let Some(queue) = tables.get(&rid) else {
                return false;
            };
            let Some(pos) = queue.requests.iter().position(|r| r.txn_id == txn_id) else {
                return false;
            };
            let ready = queue
                .requests
                .iter()
                .take(pos)
                .all(|r| r.granted && r.mode == LockMode::Shared);
            if ready {
                break;
            }
            self.waiters.wait(&mut tables);
        }

        if let Some(queue) = tables.get_mut(&rid) {
            if let Some(request) = queue.requests.iter_mut().find(|r| r.txn_id == txn_id) {
                request.granted = true;
            }
        }
        txn.add_shared(rid);
        self.waiters.notify_all();
        true
    }

    /// Acquires an exclusive lock on `rid`, blocking until the request
    /// reaches the head of the queue. Returns false if the transaction is
    /// aborted on arrival or dies under wait-die.
    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        assert_eq!(
            txn.state(),
            TransactionState::Growing,
            "locks may only be acquired in the growing phase"
        );
        let txn_id = txn.id();

        let mut tables = self.tables.lock();
        let queue = tables.entry(rid).or_insert_with(|| LockQueue::new(txn_id));

        // An exclusive request conflicts with anything already queued, so a
        // younger arrival always dies here.
        if !queue.requests.is_empty() && txn_id > queue.oldest {
            txn.abort();
            return false;
        }
        // Having survived the die test the arrival is the oldest in queue.
        queue.oldest = txn_id;
        queue.exclusive_count += 1;
        queue.requests.push_back(Request {
            txn_id,
            mode: LockMode::Exclusive,
            granted: false,
        });

        loop {
            let Some(queue) = tables.get(&rid) else {
                return false;
            };
            let head_is_us = queue
                .requests
                .front()
                .map_or(false, |r| r.txn_id == txn_id);
            if head_is_us {
                break;
            }
            self.waiters.wait(&mut tables);
        }

        if let Some(queue) = tables.get_mut(&rid) {
            if let Some(request) = queue.requests.front_mut() {
                request.granted = true;
            }
        }
        txn.add_exclusive(rid);
        true
    }

    /// Upgrades a held shared lock to exclusive. The caller must already
    /// hold a granted shared lock on `rid`; the upgrade completes once the
    /// request is at the head of the queue and no other request is granted.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: Rid) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        assert_eq!(
            txn.state(),
            TransactionState::Growing,
            "locks may only be acquired in the growing phase"
        );
        let txn_id = txn.id();

        let mut tables = self.tables.lock();
        {
            let Some(queue) = tables.get(&rid) else {
                return false;
            };
            let Some(request) = queue.requests.iter().find(|r| r.txn_id == txn_id) else {
                return false;
            };
            if request.mode != LockMode::Shared || !request.granted {
                return false;
            }
        }

        loop {
            let Some(queue) = tables.get(&rid) else {
                return false;
            };
            let head_is_us = queue
                .requests
                .front()
                .map_or(false, |r| r.txn_id == txn_id);
            let others_granted = queue
                .requests
                .iter()
                .any(|r| r.txn_id != txn_id && r.granted);
            if head_is_us && !others_granted {
                break;
            }
            self.waiters.wait(&mut tables);
        }

        if let Some(queue) = tables.get_mut(&rid) {
            if let Some(request) = queue.requests.front_mut() {
                request.mode = LockMode::Exclusive;
            }
            queue.exclusive_count += 1;
        }
        txn.remove_shared(&rid);
        txn.add_exclusive(rid);
        true
    }

    /// Releases the caller's lock on `rid`.
    ///
    /// Under strict two-phase locking an unlock before commit or abort
    /// marks the transaction aborted and fails; otherwise the first unlock
    /// moves a growing transaction into its shrinking phase.
    pub fn unlock(&self, txn: &mut Transaction, rid: Rid) -> bool {
        let mut tables = self.tables.lock();

        if self.strict_two_phase
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            txn.abort();
            return false;
        }

        let (mode, now_empty) = {
            let Some(queue) = tables.get_mut(&rid) else {
                return false;
            };
            let Some(pos) = queue.requests.iter().position(|r| r.txn_id == txn.id()) else {
                return false;
            };
            let Some(request) = queue.requests.remove(pos) else {
                return false;
            };
            if request.mode == LockMode::Exclusive {
                queue.exclusive_count = queue.exclusive_count.saturating_sub(1);
            }
            if let Some(min_id) = queue.requests.iter().map(|r| r.txn_id).min() {
                queue.oldest = min_id;
            }
            (request.mode, queue.requests.is_empty())
        };
        if now_empty {
            tables.remove(&rid);
        }

        match mode {
            LockMode::Shared => txn.remove_shared(&rid),
            LockMode::Exclusive => txn.remove_exclusive(&rid),
        };
        if !self.strict_two_phase && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        // Any release can unblock someone: a head departure admits the next
        // request, a shared departure may clear the way for an upgrade.
        // Waiters re-check their own predicates, so waking broadly is safe.
        self.waiters.notify_all();
        true
    }
}
