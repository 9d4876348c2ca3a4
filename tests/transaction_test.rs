mod test_utils;

use std::sync::{Arc, RwLock};

use oak_db::{
    btree::page::{BTreePage, PageCategory},
    storage::tuple::Cell,
    transaction::Transaction,
    utils::HandyRwLock,
    BTreeTable, BTreeTableIterator, Database, OakError,
};

use crate::test_utils::{
    delete_tuples, get_leaf_page, leaf_records_cap, new_int_tuples, new_sequential_btree_table,
    setup, TreeLayout,
};

fn scan_values(tx: &Transaction, table: &BTreeTable) -> Vec<i32> {
    BTreeTableIterator::new(tx, table)
        .map(|t| match t.get_cell(0) {
            Cell::Int(v) => v,
            cell => panic!("unexpected cell: {:?}", cell),
        })
        .collect()
}

#[test]
fn test_abort_restores_prior_image() {
    setup();

    // a single-leaf tree holding the keys 0..5
    let table_rc = new_sequential_btree_table(2, 5, 0, TreeLayout::Naturally);
    let table = table_rc.rl();

    let leaf_pid = {
        let leaf_pod = get_leaf_page(&table, 0, 0);
        let leaf = leaf_pod.rl();
        leaf.get_pid()
    };
    let disk_image_before = table.read_page_bytes(&leaf_pid).unwrap();

    // transaction A inserts five more keys, sees its own writes, and
    // aborts
    let tx_a = Transaction::new();
    for i in 5..10 {
        table.insert_tuple(&tx_a, &new_int_tuples(i, 2)).unwrap();
    }
    assert_eq!(scan_values(&tx_a, &table), (0..10).collect::<Vec<i32>>());

    // NO-STEAL: nothing was written to disk while A is in flight
    let disk_image_mid = table.read_page_bytes(&leaf_pid).unwrap();
    assert_eq!(hex::encode(&disk_image_before), hex::encode(&disk_image_mid));

    tx_a.abort().unwrap();

    // a subsequent transaction observes exactly the pre-A content
    let tx_b = Transaction::new();
    assert_eq!(scan_values(&tx_b, &table), (0..5).collect::<Vec<i32>>());
    tx_b.commit().unwrap();

    let disk_image_after = table.read_page_bytes(&leaf_pid).unwrap();
    assert_eq!(
        hex::encode(&disk_image_before),
        hex::encode(&disk_image_after)
    );
}

#[test]
fn test_abort_rolls_back_split() {
    setup();

    // one full root leaf
    let rows = leaf_records_cap();
    let table_rc = new_sequential_btree_table(2, rows, 0, TreeLayout::EvenlyDistributed);
    let table = table_rc.rl();
    assert_eq!(table.pages_count(), 1);

    // the insert splits the root leaf and installs an internal root;
    // the abort takes all of it back
    let tx_a = Transaction::new();
    table
        .insert_tuple(&tx_a, &new_int_tuples(rows as i32, 2))
        .unwrap();
    {
        // not visible to others: the writer holds the page locks, so a
        // reader times out instead of observing in-flight state
        let tx = Transaction::new();
        let result = table.get_root_ptr_page(&tx, oak_db::concurrent_status::Permission::ReadOnly);
        assert!(result.is_err());
        tx.abort().unwrap();
    }
    tx_a.abort().unwrap();

    let tx = Transaction::new();
    let root_pid = table.get_root_pid(&tx).unwrap();
    assert_eq!(root_pid.category, PageCategory::Leaf);
    assert_eq!(scan_values(&tx, &table), (0..rows as i32).collect::<Vec<i32>>());
    tx.commit().unwrap();

    table.check_integrity(false);
}

#[test]
fn test_commit_survives_cache_loss() {
    setup();

    let table_rc = new_sequential_btree_table(2, 20, 0, TreeLayout::Naturally);
    let path = {
        let table = table_rc.rl();
        delete_tuples(&table, 3);
        table.get_file_path()
    };

    // reopen the same file as a brand-new table object: every page is
    // decoded from disk again
    let schema = oak_db::small_int_schema(2, "");
    let reopened_rc = Arc::new(RwLock::new(BTreeTable::new(&path, 0, &schema)));
    Database::mut_catalog().add_table(reopened_rc.clone());

    let reopened = reopened_rc.rl();
    let tx = Transaction::new();
    assert_eq!(scan_values(&tx, &reopened), (3..20).collect::<Vec<i32>>());
    tx.commit().unwrap();
}

#[test]
fn test_read_past_eof_aborts() {
    setup();

    let table_rc = new_sequential_btree_table(2, 5, 0, TreeLayout::Naturally);
    let table = table_rc.rl();

    let tx = Transaction::new();
    let bogus = oak_db::btree::page::BTreePageID::new(
        PageCategory::Leaf,
        table.get_id(),
        99,
    );
    let err = Database::page_cache()
        .get_leaf_page(&tx, oak_db::concurrent_status::Permission::ReadOnly, &bogus)
        .unwrap_err();
    assert_eq!(err, OakError::Aborted);
    tx.abort().unwrap();
}
