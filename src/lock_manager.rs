//! Page-granularity shared/exclusive locking with sole-holder upgrade and
//! waits-for deadlock detection.
//!
//! All state lives behind one mutex; every method observes and mutates a
//! consistent snapshot of the lock table and the wait registry.

use std::collections::{HashMap, HashSet};

use log::trace;
use parking_lot::Mutex;

use crate::transaction::{Permission, TransactionId};
use crate::PageId;

/// One granted lock: the owning transaction and its mode. An upgraded
/// holder appears twice on a page, once `ReadOnly` and once `ReadWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LockState {
    tid: TransactionId,
    perm: Permission,
}

#[derive(Debug, Default)]
struct LockTables {
    locks_on_page: HashMap<PageId, Vec<LockState>>,
    /// At most one outstanding wait per transaction: a transaction is
    /// suspended inside exactly one `get_page` call at a time.
    waiting_for: HashMap<TransactionId, PageId>,
}

enum Decision {
    Grant,
    AlreadyHeld,
    Wait,
}

impl LockTables {
    fn entries(&self, pid: PageId) -> &[LockState] {
        self.locks_on_page.get(&pid).map_or(&[], |v| v.as_slice())
    }

    fn grant(&mut self, tid: TransactionId, pid: PageId, perm: Permission) -> bool {
        self.locks_on_page
            .entry(pid)
            .or_default()
            .push(LockState { tid, perm });
        self.waiting_for.remove(&tid);
        true
    }

    fn refuse(&mut self, tid: TransactionId, pid: PageId) -> bool {
        trace!("{tid:?} waiting for {pid:?}");
        self.waiting_for.insert(tid, pid);
        false
    }

    fn acquire_shared(&mut self, tid: TransactionId, pid: PageId) -> bool {
        let decision = match self.entries(pid) {
            [] => Decision::Grant,
            [only] => {
                if only.tid == tid && only.perm == Permission::ReadOnly {
                    Decision::AlreadyHeld
                } else if only.tid == tid || only.perm == Permission::ReadOnly {
                    // Own ReadWrite entry or another reader: compatible.
                    Decision::Grant
                } else {
                    Decision::Wait
                }
            }
            many => {
                if many
                    .iter()
                    .any(|s| s.tid != tid && s.perm == Permission::ReadWrite)
                {
                    Decision::Wait
                } else if many.iter().any(|s| s.tid == tid) {
                    Decision::AlreadyHeld
                } else {
                    Decision::Grant
                }
            }
        };
        self.apply(decision, tid, pid, Permission::ReadOnly)
    }

    fn acquire_exclusive(&mut self, tid: TransactionId, pid: PageId) -> bool {
        let decision = match self.entries(pid) {
            [] => Decision::Grant,
            [only] if only.tid == tid => {
                if only.perm == Permission::ReadWrite {
                    Decision::AlreadyHeld
                } else {
                    // Sole holder of a ReadOnly entry: upgrade.
                    Decision::Grant
                }
            }
            [_] => Decision::Wait,
            many => {
                if many
                    .iter()
                    .any(|s| s.tid == tid && s.perm == Permission::ReadWrite)
                {
                    Decision::AlreadyHeld
                } else {
                    Decision::Wait
                }
            }
        };
        self.apply(decision, tid, pid, Permission::ReadWrite)
    }

    fn apply(
        &mut self,
        decision: Decision,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> bool {
        match decision {
            Decision::Grant => self.grant(tid, pid, perm),
            Decision::AlreadyHeld => {
                self.waiting_for.remove(&tid);
                true
            }
            Decision::Wait => self.refuse(tid, pid),
        }
    }

    fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        self.entries(pid).iter().any(|s| s.tid == tid)
    }

    fn pages_locked_by(&self, tid: TransactionId) -> Vec<PageId> {
        self.locks_on_page
            .iter()
            .filter(|(_, states)| states.iter().any(|s| s.tid == tid))
            .map(|(pid, _)| *pid)
            .collect()
    }

    fn unlock(&mut self, tid: TransactionId, pid: PageId) -> bool {
        let Some(states) = self.locks_on_page.get_mut(&pid) else {
            return false;
        };
        let before = states.len();
        states.retain(|s| s.tid != tid);
        let removed = states.len() < before;
        if states.is_empty() {
            self.locks_on_page.remove(&pid);
        }
        removed
    }

    /// Does some holder of `pid` other than `origin` transitively wait for
    /// a page `origin` holds? Traversal follows
    /// `holders(pid) -> waiting_for[holder] -> holders(..) -> ...`; the
    /// visited set terminates cycles that do not involve `origin`.
    fn wait_reaches(
        &self,
        pid: PageId,
        origin: TransactionId,
        visited: &mut HashSet<TransactionId>,
    ) -> bool {
        for state in self.entries(pid) {
            if state.tid == origin || !visited.insert(state.tid) {
                continue;
            }
            if let Some(&waited) = self.waiting_for.get(&state.tid) {
                if self.holds(origin, waited) || self.wait_reaches(waited, origin, visited) {
                    return true;
                }
            }
        }
        false
    }
}

/// The lock manager owned by the buffer pool. `acquire` never blocks; a
/// refusal registers the wait and the caller polls.
#[derive(Debug, Default)]
pub struct LockManager {
    tables: Mutex<LockTables>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to take `perm` on `pid` for `tid`. Returns `false` and
    /// registers the wait if the request is incompatible with the current
    /// holders.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, perm: Permission) -> bool {
        let mut tables = self.tables.lock();
        match perm {
            Permission::ReadOnly => tables.acquire_shared(tid, pid),
            Permission::ReadWrite => tables.acquire_exclusive(tid, pid),
        }
    }

    /// Removes every lock `tid` holds on `pid`. Returns whether at least
    /// one entry was removed.
    pub fn unlock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.tables.lock().unlock(tid, pid)
    }

    /// Releases every lock held by `tid` and clears its wait registration.
    pub fn release_all(&self, tid: TransactionId) {
        let mut tables = self.tables.lock();
        for pid in tables.pages_locked_by(tid) {
            tables.unlock(tid, pid);
        }
        tables.waiting_for.remove(&tid);
    }

    pub fn holds(&self, tid: TransactionId, pid: PageId) -> bool {
        self.tables.lock().holds(tid, pid)
    }

    /// Is `tid`, waiting on `pid`, part of a waits-for cycle? Conservative:
    /// true as soon as any holder of `pid` transitively waits for a page
    /// `tid` holds. The caller is the victim.
    pub fn has_deadlock(&self, tid: TransactionId, pid: PageId) -> bool {
        let tables = self.tables.lock();
        let mut visited = HashSet::new();
        tables.wait_reaches(pid, tid, &mut visited)
    }
}
