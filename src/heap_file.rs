//! Heap-structured table files: a flat sequence of fixed-size pages with
//! tuples in no particular order. Page `k` lives at byte offset
//! `k * page_size()`.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::buffer_pool::{BufferPool, SharedPage};
use crate::errors::{Error, Result};
use crate::heap_page::HeapPage;
use crate::transaction::{Permission, TransactionId};
use crate::tuple::{Schema, Tuple};
use crate::{page_size, PageId};

/// A table file. All page access from operators goes through the buffer
/// pool; only the pool (and recovery tooling) calls `read_page` /
/// `write_page` directly.
pub struct HeapFile {
    id: u32,
    path: PathBuf,
    file: Mutex<File>,
    schema: Arc<Schema>,
}

impl HeapFile {
    /// Opens (or creates) the backing file. The table id is a stable hash
    /// of the absolute path, so reopening the same file yields the same
    /// id.
    pub fn open<P: AsRef<Path>>(path: P, schema: Arc<Schema>) -> Result<Self> {
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
        let path = path.canonicalize()?;
        let id = crc32fast::hash(path.to_string_lossy().as_bytes());
        Ok(Self {
            id,
            path,
            file: Mutex::new(file),
            schema,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages currently in the file.
    pub fn num_pages(&self) -> Result<u32> {
        let len = self.file.lock().metadata()?.len();
        Ok((len / page_size() as u64) as u32)
    }

    /// Reads one page. The id must name this table and an existing page.
    pub fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        if pid.table_id != self.id || pid.page_no >= self.num_pages()? {
            return Err(Error::NoSuchPage(pid));
        }
        let mut data = vec![0; page_size()];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(pid.page_no as u64 * page_size() as u64))?;
            file.read_exact(&mut data)?;
        }
        debug!("read page {pid:?} from {:?}", self.path);
        HeapPage::parse(pid, self.schema.clone(), &data)
    }

    /// Writes one page at its offset, extending the file if the page is
    /// new, and syncs.
    pub fn write_page(&self, page: &HeapPage) -> Result<()> {
        let pid = page.id();
        if pid.table_id != self.id {
            return Err(Error::NoSuchPage(pid));
        }
        let data = page.page_data();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pid.page_no as u64 * page_size() as u64))?;
        file.write_all(&data)?;
        file.sync_all()?;
        Ok(())
    }

    /// Appends a fresh empty page to the end of the file and returns its
    /// page number.
    fn append_empty_page(&self) -> Result<u32> {
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        let page_no = (len / page_size() as u64) as u32;
        file.seek(SeekFrom::Start(len))?;
        file.write_all(&HeapPage::empty_page_data())?;
        file.sync_all()?;
        debug!("appended page {page_no} to table {}", self.id);
        Ok(page_no)
    }

    /// Inserts into the first page with a free slot, probing every page
    /// through the pool with `ReadWrite`; appends a new page when the
    /// table is full. Returns the dirtied page for the pool to mark.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<Vec<SharedPage>> {
        let mut target = None;
        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.id, page_no);
            let page = pool.get_page(tid, pid, Permission::ReadWrite)?;
            let has_room = page.read().num_free_slots() > 0;
            if has_room {
                target = Some(page);
                break;
            }
        }
        let page = match target {
            Some(page) => page,
            None => {
                let page_no = self.append_empty_page()?;
                pool.get_page(tid, PageId::new(self.id, page_no), Permission::ReadWrite)?
            }
        };
        page.write().insert_tuple(tuple)?;
        Ok(vec![page])
    }

    /// Deletes the tuple from the page its record id names.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<SharedPage>> {
        let rid = tuple.rid().ok_or(Error::MissingRecordId)?;
        if rid.pid.table_id != self.id || rid.pid.page_no >= self.num_pages()? {
            return Err(Error::NoSuchTuple(rid));
        }
        let page = pool.get_page(tid, rid.pid, Permission::ReadWrite)?;
        page.write().delete_tuple(tuple)?;
        Ok(vec![page])
    }

    /// A lazy scan over the whole table, walking pages in order with
    /// `ReadOnly` acquisitions through the pool.
    pub fn iter<'a>(&'a self, pool: &'a BufferPool, tid: TransactionId) -> HeapFileIter<'a> {
        HeapFileIter {
            file: self,
            pool,
            tid,
            next_page: 0,
            current: Vec::new().into_iter(),
        }
    }
}

/// Cursor over a heap file's tuples. Restartable via [`HeapFileIter::rewind`].
pub struct HeapFileIter<'a> {
    file: &'a HeapFile,
    pool: &'a BufferPool,
    tid: TransactionId,
    next_page: u32,
    current: std::vec::IntoIter<Tuple>,
}

impl HeapFileIter<'_> {
    /// Restarts the scan from page 0.
    pub fn rewind(&mut self) {
        self.next_page = 0;
        self.current = Vec::new().into_iter();
    }
}

impl Iterator for HeapFileIter<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.current.next() {
                return Some(Ok(tuple));
            }
            let num_pages = match self.file.num_pages() {
                Ok(n) => n,
                Err(e) => return Some(Err(e)),
            };
            if self.next_page >= num_pages {
                return None;
            }
            let pid = PageId::new(self.file.id(), self.next_page);
            self.next_page += 1;
            match self.pool.get_page(self.tid, pid, Permission::ReadOnly) {
                Ok(page) => {
                    let tuples: Vec<Tuple> = page.read().iter().cloned().collect();
                    self.current = tuples.into_iter();
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Column, Field, FieldType};
    use tempfile::tempdir;

    fn two_int_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Column::new("a", FieldType::Int),
            Column::new("b", FieldType::Int),
        ]))
    }

    #[test]
    fn table_id_is_stable_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.dat");
        let schema = two_int_schema();
        let first = HeapFile::open(&path, schema.clone()).unwrap();
        let second = HeapFile::open(&path, schema).unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn pages_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let schema = two_int_schema();
        let table = HeapFile::open(dir.path().join("t.dat"), schema.clone()).unwrap();
        assert_eq!(table.num_pages().unwrap(), 0);

        let pid = PageId::new(table.id(), 0);
        let mut page = HeapPage::parse(pid, schema.clone(), &HeapPage::empty_page_data()).unwrap();
        page.insert_tuple(
            Tuple::new(schema.clone(), vec![Field::Int(1), Field::Int(2)]).unwrap(),
        )
        .unwrap();
        table.write_page(&page).unwrap();
        assert_eq!(table.num_pages().unwrap(), 1);

        let back = table.read_page(pid).unwrap();
        assert_eq!(back.num_free_slots(), page.num_free_slots());
        let first = back.iter().next().unwrap();
        assert_eq!(first.field(0), &Field::Int(1));
        assert_eq!(first.field(1), &Field::Int(2));
    }

    #[test]
    fn read_page_validates_table_and_range() {
        let dir = tempdir().unwrap();
        let schema = two_int_schema();
        let table = HeapFile::open(dir.path().join("t.dat"), schema.clone()).unwrap();

        let foreign = PageId::new(table.id().wrapping_add(1), 0);
        assert!(matches!(
            table.read_page(foreign),
            Err(Error::NoSuchPage(_))
        ));
        let beyond = PageId::new(table.id(), 0);
        assert!(matches!(table.read_page(beyond), Err(Error::NoSuchPage(_))));
    }
}
