//! Buffer pool boundary behavior: NO-STEAL eviction refusal and clock
//! reuse of clean slots.

use keel::{Error, Permission, TransactionId};

mod common;

#[test]
fn full_pool_of_dirty_pages_refuses_a_fourth() {
    let fx = common::open_db(3);
    let schema = common::two_int_schema();
    let pids: Vec<_> = (0..4)
        .map(|i| fx.create_seeded_table(&format!("t{i}"), i, i))
        .collect();
    let pool = fx.db.buffer_pool();

    // Dirty all three slots under one transaction.
    let t1 = TransactionId::new();
    for pid in &pids[..3] {
        pool.insert_tuple(t1, pid.table_id, common::pair(&schema, 100, 100))
            .unwrap();
    }

    assert!(matches!(
        pool.get_page(t1, pids[3], Permission::ReadOnly),
        Err(Error::AllPagesDirty)
    ));

    // Committing flushes the dirty pages; the request then succeeds.
    pool.transaction_complete(t1, true).unwrap();
    let t2 = TransactionId::new();
    pool.get_page(t2, pids[3], Permission::ReadOnly).unwrap();
    pool.transaction_complete(t2, true).unwrap();
}

#[test]
fn clock_reclaims_the_oldest_clean_slot_and_rereads_from_disk() {
    let fx = common::open_db(3);
    let pids: Vec<_> = (0..4)
        .map(|i| fx.create_seeded_table(&format!("t{i}"), i, i))
        .collect();
    let pool = fx.db.buffer_pool();

    let t1 = TransactionId::new();
    for pid in &pids[..3] {
        pool.get_page(t1, *pid, Permission::ReadOnly).unwrap();
    }
    pool.transaction_complete(t1, true).unwrap();

    // A fourth page forces the sweep: every reference bit is cleared on
    // the first pass and slot 0 is reclaimed on the second.
    let t2 = TransactionId::new();
    pool.get_page(t2, pids[3], Permission::ReadOnly).unwrap();
    assert!(!pool.contains_page(pids[0]));
    assert!(pool.contains_page(pids[1]));
    assert!(pool.contains_page(pids[2]));
    assert!(pool.contains_page(pids[3]));

    // The evicted page comes back from disk intact.
    let page = pool.get_page(t2, pids[0], Permission::ReadOnly).unwrap();
    {
        let page = page.read();
        let row = page.iter().next().expect("seeded row survives eviction");
        assert_eq!(
            (row.field(0), row.field(1)),
            (
                &keel::tuple::Field::Int(0),
                &keel::tuple::Field::Int(0)
            )
        );
    }
    assert!(pool.contains_page(pids[0]));
    pool.transaction_complete(t2, true).unwrap();
}

#[test]
fn flush_all_pages_checkpoints_dirty_pages_to_disk() {
    let fx = common::open_db(3);
    let schema = common::two_int_schema();
    let p0 = fx.create_seeded_table("t0", 1, 1);
    let pool = fx.db.buffer_pool();

    let t1 = TransactionId::new();
    pool.insert_tuple(t1, p0.table_id, common::pair(&schema, 2, 2))
        .unwrap();
    pool.flush_all_pages().unwrap();

    // The uncommitted row is on disk (the documented NO-STEAL caveat of
    // checkpointing), readable through the table file directly.
    let table = fx.db.catalog().table(p0.table_id).unwrap();
    let on_disk = table.read_page(p0).unwrap();
    let rows: Vec<_> = on_disk.iter().collect();
    assert_eq!(rows.len(), 2);

    pool.transaction_complete(t1, true).unwrap();
}
