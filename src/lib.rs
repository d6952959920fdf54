//! # Keel Storage Engine
//! A transactional page-level storage engine: heap-structured table files,
//! a fixed-capacity buffer pool with clock eviction, and strict two-phase
//! page locking with deadlock detection.

/// The buffer pool: page cache, eviction and the commit/abort paths.
pub mod buffer_pool;
/// The table registry and catalog-file loader.
pub mod catalog;
/// Crate-wide error type.
pub mod errors;
/// Heap table files: page-addressed I/O and tuple insert/delete/scan.
pub mod heap_file;
/// The slotted heap page layout.
pub mod heap_page;
/// The page lock manager for concurrency control.
pub mod lock_manager;
/// Transaction identity and permission modes.
pub mod transaction;
/// Tuples, fields and schemas.
pub mod tuple;
/// The Write-Ahead Log.
pub mod wal;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The default size of a single page in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// The current process-global page size in bytes.
pub fn page_size() -> usize {
    PAGE_SIZE.load(Ordering::Relaxed)
}

/// Overrides the process-global page size. Only intended for tests; pages
/// written under one size are unreadable under another.
pub fn set_page_size(bytes: usize) {
    PAGE_SIZE.store(bytes, Ordering::Relaxed);
}

/// Restores the default page size.
pub fn reset_page_size() {
    PAGE_SIZE.store(DEFAULT_PAGE_SIZE, Ordering::Relaxed);
}

/// A unique identifier for a page: the owning table and the page's
/// position within the table file. Page 0 is the first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    pub table_id: u32,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: u32, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

pub use buffer_pool::{BufferPool, SharedPage, DEFAULT_POOL_PAGES};
pub use errors::{Error, Result};
pub use heap_file::HeapFile;
pub use heap_page::HeapPage;
pub use transaction::{Permission, TransactionId};

use catalog::Catalog;
use wal::WalManager;

/// Wires a catalog, a WAL and a buffer pool into one engine instance.
pub struct Database {
    catalog: Arc<Catalog>,
    wal: Arc<WalManager>,
    buffer_pool: Arc<BufferPool>,
}

impl Database {
    /// Opens the WAL at `wal_path` and creates a buffer pool with room for
    /// `pool_pages` pages. Tables are registered afterwards through the
    /// [`Catalog`].
    pub fn new<P: AsRef<Path>>(wal_path: P, pool_pages: usize) -> Result<Self> {
        let catalog = Arc::new(Catalog::new());
        let wal = Arc::new(WalManager::open(wal_path)?);
        let buffer_pool = Arc::new(BufferPool::new(pool_pages, catalog.clone(), wal.clone()));
        Ok(Self {
            catalog,
            wal,
            buffer_pool,
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }
}
