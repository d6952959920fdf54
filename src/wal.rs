//! The Write-Ahead Log.
//!
//! Append-only record stream: `[total_len: u32 LE][crc: u32 LE][bincode
//! body]`. An update record for a page is appended and forced before the
//! page's data-file write; the buffer pool's flush path enforces the
//! order.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::transaction::TransactionId;
use crate::PageId;

/// A Log Sequence Number: the record's byte offset in the log file.
pub type Lsn = u64;

const RECORD_HEADER_LEN: usize = 8;

/// A single record in the WAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalRecord {
    /// A page changed: before- and after-images for undo/redo.
    Update {
        tid: TransactionId,
        pid: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    Commit { tid: TransactionId },
    Abort { tid: TransactionId },
}

/// The WAL manager. Appends are serialized by the file mutex; `force`
/// makes everything appended so far durable.
pub struct WalManager {
    file: Mutex<File>,
    next_lsn: AtomicU64,
}

impl WalManager {
    /// Opens (or creates) the log file and positions the next LSN at its
    /// end.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let next_lsn = AtomicU64::new(file.metadata()?.len());
        Ok(Self {
            file: Mutex::new(file),
            next_lsn,
        })
    }

    fn append(&self, record: &WalRecord) -> Result<Lsn> {
        let body = bincode::serialize(record)?;
        let total_len = (RECORD_HEADER_LEN + body.len()) as u32;
        let crc = crc32fast::hash(&body);

        let mut file = self.file.lock();
        let lsn = self.next_lsn.fetch_add(total_len as u64, Ordering::SeqCst);
        file.seek(SeekFrom::Start(lsn))?;
        file.write_all(&total_len.to_le_bytes())?;
        file.write_all(&crc.to_le_bytes())?;
        file.write_all(&body)?;
        trace!("wal append at lsn {lsn}: {record:?}");
        Ok(lsn)
    }

    /// Logs an update record carrying the page's before- and after-image.
    pub fn log_write(
        &self,
        tid: TransactionId,
        pid: PageId,
        before: &[u8],
        after: &[u8],
    ) -> Result<Lsn> {
        self.append(&WalRecord::Update {
            tid,
            pid,
            before: before.to_vec(),
            after: after.to_vec(),
        })
    }

    pub fn log_commit(&self, tid: TransactionId) -> Result<Lsn> {
        self.append(&WalRecord::Commit { tid })
    }

    pub fn log_abort(&self, tid: TransactionId) -> Result<Lsn> {
        self.append(&WalRecord::Abort { tid })
    }

    /// Makes every appended record durable.
    pub fn force(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    /// Scans the log from the start, validating each record's checksum.
    pub fn records(&self) -> Result<Vec<(Lsn, WalRecord)>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos + RECORD_HEADER_LEN <= buf.len() {
            let total_len = u32::from_le_bytes(
                buf[pos..pos + 4]
                    .try_into()
                    .map_err(|_| truncated_record(pos))?,
            ) as usize;
            let crc = u32::from_le_bytes(
                buf[pos + 4..pos + 8]
                    .try_into()
                    .map_err(|_| truncated_record(pos))?,
            );
            let end = pos + total_len;
            if total_len < RECORD_HEADER_LEN || end > buf.len() {
                return Err(truncated_record(pos).into());
            }
            let body = &buf[pos + RECORD_HEADER_LEN..end];
            if crc32fast::hash(body) != crc {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("wal record checksum mismatch at lsn {pos}"),
                )
                .into());
            }
            records.push((pos as Lsn, bincode::deserialize(body)?));
            pos = end;
        }
        Ok(records)
    }
}

fn truncated_record(pos: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("truncated wal record at lsn {pos}"),
    )
}
