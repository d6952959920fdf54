use thiserror::Error;

use crate::transaction::TransactionId;
use crate::tuple::RecordId;
use crate::PageId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The transaction was chosen as a deadlock victim. The caller must
    /// treat it as rolled back and complete it with `commit = false`.
    #[error("transaction {0:?} aborted: deadlock detected")]
    TransactionAborted(TransactionId),

    /// Eviction found no clean page to reclaim (NO-STEAL).
    #[error("all pages in the buffer pool are dirty")]
    AllPagesDirty,

    #[error("no such page: table {} page {}", .0.table_id, .0.page_no)]
    NoSuchPage(PageId),

    #[error("page {0:?} is not cached in the buffer pool")]
    PageNotCached(PageId),

    #[error("no such tuple: {0:?}")]
    NoSuchTuple(RecordId),

    #[error("tuple has no record id")]
    MissingRecordId,

    #[error("no such table: id {0}")]
    NoSuchTable(u32),

    #[error("page {0:?} has no free slots")]
    PageFull(PageId),

    #[error("transaction {0:?} holds no lock on {1:?}")]
    LockNotHeld(TransactionId, PageId),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wal codec error: {0}")]
    WalCodec(#[from] bincode::Error),
}
