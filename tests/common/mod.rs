#![allow(dead_code)]

use std::sync::Arc;

use keel::heap_file::HeapFile;
use keel::heap_page::HeapPage;
use keel::tuple::{Column, Field, FieldType, Schema, Tuple};
use keel::{Database, PageId, TransactionId};
use tempfile::TempDir;

/// A scratch database in a temp directory. Dropping it removes every
/// table file and the WAL.
pub struct Fixture {
    pub dir: TempDir,
    pub db: Database,
}

pub fn open_db(pool_pages: usize) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("test.wal"), pool_pages).unwrap();
    Fixture { dir, db }
}

pub fn two_int_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Column::new("a", FieldType::Int),
        Column::new("b", FieldType::Int),
    ]))
}

pub fn pair(schema: &Arc<Schema>, a: i32, b: i32) -> Tuple {
    Tuple::new(schema.clone(), vec![Field::Int(a), Field::Int(b)]).unwrap()
}

impl Fixture {
    /// Registers an empty `(a int, b int)` table.
    pub fn create_table(&self, name: &str) -> u32 {
        let schema = two_int_schema();
        let table = Arc::new(
            HeapFile::open(self.dir.path().join(format!("{name}.dat")), schema).unwrap(),
        );
        let id = table.id();
        self.db.catalog().add_table(table, name, "a");
        id
    }

    /// Registers an `(a int, b int)` table whose page 0 already holds one
    /// row, written straight to disk so the pool starts cold.
    pub fn create_seeded_table(&self, name: &str, a: i32, b: i32) -> PageId {
        let schema = two_int_schema();
        let table = Arc::new(
            HeapFile::open(self.dir.path().join(format!("{name}.dat")), schema.clone()).unwrap(),
        );
        let pid = PageId::new(table.id(), 0);
        let mut page = HeapPage::parse(pid, schema.clone(), &HeapPage::empty_page_data()).unwrap();
        page.insert_tuple(pair(&schema, a, b)).unwrap();
        table.write_page(&page).unwrap();
        self.db.catalog().add_table(table, name, "a");
        pid
    }

    /// Scans the table as `tid`, returning the rows as `(a, b)` pairs in
    /// storage order.
    pub fn scan(&self, table_id: u32, tid: TransactionId) -> Vec<(i32, i32)> {
        let table = self.db.catalog().table(table_id).unwrap();
        table
            .iter(self.db.buffer_pool(), tid)
            .map(|r| {
                let t = r.unwrap();
                match (t.field(0), t.field(1)) {
                    (Field::Int(a), Field::Int(b)) => (*a, *b),
                    other => panic!("unexpected fields: {other:?}"),
                }
            })
            .collect()
    }
}
