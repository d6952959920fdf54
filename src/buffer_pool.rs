//! The buffer pool: a fixed-capacity cache of heap pages with clock
//! (second-chance) eviction, page locking, and the transaction
//! commit/abort paths.
//!
//! NO-STEAL / FORCE: the eviction path never writes a dirty page, and a
//! committing transaction's dirty pages are all flushed before the commit
//! record is appended.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::catalog::Catalog;
use crate::errors::{Error, Result};
use crate::heap_page::HeapPage;
use crate::lock_manager::LockManager;
use crate::transaction::{Permission, TransactionId};
use crate::tuple::Tuple;
use crate::wal::WalManager;
use crate::PageId;

/// Default number of pages a pool caches.
pub const DEFAULT_POOL_PAGES: usize = 50;

/// How long a refused lock request sleeps before re-polling.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A cached page, shared between the pool and its callers. Content may
/// only be mutated by a transaction holding `ReadWrite` on the page.
pub type SharedPage = Arc<RwLock<HeapPage>>;

struct Frame {
    pid: PageId,
    page: SharedPage,
}

struct PoolState {
    slots: Vec<Option<Frame>>,
    /// Clock reference bits, parallel to `slots`.
    referenced: Vec<bool>,
    hand: usize,
}

/// The buffer pool. All slot-array and clock-hand mutation happens under
/// one mutex; lock waits sleep outside it.
pub struct BufferPool {
    state: Mutex<PoolState>,
    lock_manager: LockManager,
    catalog: Arc<Catalog>,
    wal: Arc<WalManager>,
}

impl BufferPool {
    pub fn new(capacity: usize, catalog: Arc<Catalog>, wal: Arc<WalManager>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                slots: (0..capacity).map(|_| None).collect(),
                referenced: vec![false; capacity],
                hand: 0,
            }),
            lock_manager: LockManager::new(),
            catalog,
            wal,
        }
    }

    /// Retrieves a page with the requested permission, taking the page
    /// lock first. Polls while the lock is held incompatibly elsewhere;
    /// aborts the caller with [`Error::TransactionAborted`] when the wait
    /// is part of a deadlock cycle. On a cache miss the page is read from
    /// its table file, evicting a clean page if the pool is full.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permission,
    ) -> Result<SharedPage> {
        while !self.lock_manager.acquire(tid, pid, perm) {
            if self.lock_manager.has_deadlock(tid, pid) {
                debug!("deadlock: aborting {tid:?} waiting on {pid:?}");
                return Err(Error::TransactionAborted(tid));
            }
            thread::sleep(POLL_INTERVAL);
        }

        let mut state = self.state.lock();
        loop {
            let mut empty = None;
            let mut hit = None;
            for i in 0..state.slots.len() {
                match &state.slots[i] {
                    Some(frame) => {
                        if frame.pid == pid {
                            hit = Some((i, frame.page.clone()));
                            break;
                        }
                    }
                    None => {
                        if empty.is_none() {
                            empty = Some(i);
                        }
                    }
                }
            }
            if let Some((i, page)) = hit {
                state.referenced[i] = true;
                return Ok(page);
            }
            match empty {
                Some(idx) => {
                    let table = self.catalog.table(pid.table_id)?;
                    let page: SharedPage = Arc::new(RwLock::new(table.read_page(pid)?));
                    state.slots[idx] = Some(Frame {
                        pid,
                        page: page.clone(),
                    });
                    state.referenced[idx] = true;
                    return Ok(page);
                }
                None => self.evict_page(&mut state)?,
            }
        }
    }

    /// Clock sweep. Never selects a dirty slot; fails up front when every
    /// occupied slot is dirty, which also guarantees the sweep terminates.
    fn evict_page(&self, state: &mut PoolState) -> Result<()> {
        let dirty = state
            .slots
            .iter()
            .flatten()
            .filter(|f| f.page.read().dirtier().is_some())
            .count();
        if dirty == state.slots.len() {
            warn!("eviction failed: all {dirty} pages are dirty");
            return Err(Error::AllPagesDirty);
        }

        let n = state.slots.len();
        let mut k = state.hand;
        loop {
            if state.referenced[k] {
                state.referenced[k] = false;
            } else {
                let clean = match &state.slots[k] {
                    None => true,
                    Some(frame) => frame.page.read().dirtier().is_none(),
                };
                if clean {
                    if let Some(frame) = &state.slots[k] {
                        debug!("evicting page {:?}", frame.pid);
                        self.flush_frame(frame)?;
                    }
                    state.slots[k] = None;
                    state.hand = k;
                    return Ok(());
                }
            }
            k = (k + 1) % n;
        }
    }

    /// WAL-then-data flush of one frame. Clean frames are still written
    /// through, which covers pages dirtied and cleaned since the last
    /// eviction.
    fn flush_frame(&self, frame: &Frame) -> Result<()> {
        let mut page = frame.page.write();
        if let Some(tid) = page.dirtier() {
            let after = page.page_data();
            self.wal
                .log_write(tid, frame.pid, page.before_image(), &after)?;
            self.wal.force()?;
            page.mark_dirty(None);
        }
        let table = self.catalog.table(frame.pid.table_id)?;
        table.write_page(&page)
    }

    /// Inserts `tuple` into some page of `table_id` with free space (or a
    /// freshly appended page) and marks every page the operation touched
    /// dirty by `tid`.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: u32, tuple: Tuple) -> Result<()> {
        let table = self.catalog.table(table_id)?;
        let pages = table.insert_tuple(self, tid, tuple)?;
        for page in pages {
            page.write().mark_dirty(Some(tid));
        }
        Ok(())
    }

    /// Deletes `tuple` from the page its record id names and marks the
    /// page dirty by `tid`.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple.rid().ok_or(Error::MissingRecordId)?;
        let table = self.catalog.table(rid.pid.table_id)?;
        let pages = table.delete_tuple(self, tid, tuple)?;
        for page in pages {
            page.write().mark_dirty(Some(tid));
        }
        Ok(())
    }

    /// Commits or aborts `tid`, always releasing all of its locks.
    ///
    /// Commit flushes each page dirtied by `tid` (update record, force,
    /// data write) and refreshes its before-image, then appends a commit
    /// record. Abort reverts each such page in place from disk, then
    /// appends an abort record.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        self.lock_manager.release_all(tid);
        let state = self.state.lock();
        if commit {
            for frame in state.slots.iter().flatten() {
                let mut page = frame.page.write();
                if page.dirtier() != Some(tid) {
                    continue;
                }
                let after = page.page_data();
                self.wal
                    .log_write(tid, frame.pid, page.before_image(), &after)?;
                self.wal.force()?;
                page.mark_dirty(None);
                let table = self.catalog.table(frame.pid.table_id)?;
                table.write_page(&page)?;
                page.set_before_image();
            }
            self.wal.log_commit(tid)?;
        } else {
            for frame in state.slots.iter().flatten() {
                let dirty = frame.page.read().dirtier() == Some(tid);
                if dirty {
                    let table = self.catalog.table(frame.pid.table_id)?;
                    *frame.page.write() = table.read_page(frame.pid)?;
                    debug!("reverted page {:?}", frame.pid);
                }
            }
            self.wal.log_abort(tid)?;
        }
        self.wal.force()?;
        debug!("transaction {tid:?} complete, commit={commit}");
        Ok(())
    }

    /// Writes every dirty page to disk. Used for checkpointing; under
    /// NO-STEAL this persists uncommitted changes, so callers must know
    /// what they are doing.
    pub fn flush_all_pages(&self) -> Result<()> {
        let state = self.state.lock();
        for frame in state.slots.iter().flatten() {
            if frame.page.read().dirtier().is_some() {
                self.flush_frame(frame)?;
            }
        }
        Ok(())
    }

    /// Flushes the named page if it is cached.
    pub fn flush_page(&self, pid: PageId) -> Result<()> {
        let state = self.state.lock();
        let frame = state
            .slots
            .iter()
            .flatten()
            .find(|f| f.pid == pid)
            .ok_or(Error::PageNotCached(pid))?;
        self.flush_frame(frame)
    }

    /// Drops the page from the pool without flushing. Needed by recovery
    /// machinery so a rolled-back page is not served from cache.
    pub fn discard_page(&self, pid: PageId) {
        let mut state = self.state.lock();
        for i in 0..state.slots.len() {
            if state.slots[i].as_ref().is_some_and(|f| f.pid == pid) {
                state.slots[i] = None;
                state.referenced[i] = false;
                break;
            }
        }
    }

    /// Releases `tid`'s lock on one page. Releasing before commit/abort
    /// forfeits two-phase locking, and with it serializability; only
    /// callers that can tolerate that may use this.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) -> Result<()> {
        if !self.lock_manager.unlock(tid, pid) {
            return Err(Error::LockNotHeld(tid, pid));
        }
        Ok(())
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds(tid, pid)
    }

    /// Whether the page is currently cached. Diagnostic; eviction tests
    /// observe the cache through this.
    pub fn contains_page(&self, pid: PageId) -> bool {
        self.state
            .lock()
            .slots
            .iter()
            .flatten()
            .any(|f| f.pid == pid)
    }
}
