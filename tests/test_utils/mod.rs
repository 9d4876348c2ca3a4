#![allow(dead_code)]

use std::sync::{Arc, RwLock};

use log::debug;
use rand::prelude::*;

use oak_db::{
    btree::page::{
        BTreeInternalPage, BTreeInternalPageIterator, BTreeLeafPage, BTreeLeafPageIteratorRc,
        BTreePage, BTreePageID, Entry, PageCategory,
    },
    concurrent_status::Permission,
    small_int_schema,
    storage::tuple::Tuple,
    transaction::Transaction,
    types::Pod,
    utils::{self, HandyRwLock},
    BTreeTable, BTreeTableIterator, Database, Schema,
};

/// # Conduct the initialization
///
/// - Setting up log configurations.
pub fn setup() {
    utils::init_log();
}

/// A private database file for one test. The directory is kept for the
/// life of the process so reopening and byte-level comparisons work.
pub fn new_temp_db_path() -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("btree.db").to_str().unwrap().to_string();
    std::mem::forget(dir);
    path
}

#[derive(Clone, Copy, Debug)]
pub enum TreeLayout {
    Naturally,
    EvenlyDistributed,
    LastTwoEvenlyDistributed,
}

pub fn leaf_records_cap() -> usize {
    BTreeLeafPage::calculate_slots_count(&small_int_schema(2, ""))
}

pub fn internal_entries_cap() -> usize {
    BTreeInternalPage::get_entries_cap(4)
}

pub fn internal_children_cap() -> usize {
    internal_entries_cap() + 1
}

pub fn new_int_tuples(value: i32, width: usize) -> Tuple {
    Tuple::new_int_tuples(value, width)
}

pub fn new_empty_btree_table(columns: usize, key_field: usize) -> Pod<BTreeTable> {
    let row_scheme = small_int_schema(columns, "");
    let path = new_temp_db_path();
    let table_rc = Arc::new(RwLock::new(BTreeTable::new(&path, key_field, &row_scheme)));
    Database::mut_catalog().add_table(Arc::clone(&table_rc));
    table_rc
}

/// Create a table with a given number of rows and columns.
///
/// The rows are filled with random data and are sorted by the key
/// field/column before being inserted into the table.
///
/// # Arguments:
///
/// - int_tuples: This is a reference used to return all inserted data.
///   Only works when it's not None.
pub fn new_random_btree_table(
    columns: usize,
    rows: usize,
    int_tuples: Option<&mut Vec<Vec<i32>>>,
    key_field: usize,
    tree_layout: TreeLayout,
) -> Pod<BTreeTable> {
    let row_scheme = small_int_schema(columns, "");
    let path = new_temp_db_path();
    let table_rc = Arc::new(RwLock::new(BTreeTable::new(&path, key_field, &row_scheme)));
    Database::mut_catalog().add_table(Arc::clone(&table_rc));

    let mut tuples: Vec<Tuple> = Vec::new();
    let mut rng = rand::thread_rng();
    for _ in 0..rows {
        let insert_value = rng.gen_range(i32::MIN, i32::MAX);
        tuples.push(new_int_tuples(insert_value, columns));
    }

    tuples.sort_by(|a, b| a.get_cell(key_field).cmp(&b.get_cell(key_field)));

    if let Some(int_tuples) = int_tuples {
        for t in tuples.iter() {
            let mut row = Vec::new();
            for i in 0..columns {
                match t.get_cell(i) {
                    oak_db::storage::tuple::Cell::Int(v) => row.push(v),
                    cell => panic!("unexpected cell: {:?}", cell),
                }
            }
            int_tuples.push(row);
        }
    }

    let write_tx = Transaction::new();

    // borrow of table_rc start here
    {
        let table = table_rc.rl();
        match tree_layout {
            TreeLayout::Naturally => {
                for t in tuples.iter() {
                    table.insert_tuple(&write_tx, t).unwrap();
                }
            }
            TreeLayout::EvenlyDistributed | TreeLayout::LastTwoEvenlyDistributed => {
                let page_index = sequential_insert_into_table(
                    &write_tx,
                    &table,
                    &tuples,
                    &row_scheme,
                    tree_layout,
                );
                table.set_page_index(page_index);
            }
        }
    }
    // borrow of table_rc ends here

    write_tx.commit().unwrap();
    debug!("table construction finished, insert {} rows in total", rows);

    table_rc
}

/// Like `new_random_btree_table`, but with the deterministic key
/// sequence `0..rows`. Handy when a test needs to reason about which
/// leaf a key lands on.
pub fn new_sequential_btree_table(
    columns: usize,
    rows: usize,
    key_field: usize,
    tree_layout: TreeLayout,
) -> Pod<BTreeTable> {
    let row_scheme = small_int_schema(columns, "");
    let path = new_temp_db_path();
    let table_rc = Arc::new(RwLock::new(BTreeTable::new(&path, key_field, &row_scheme)));
    Database::mut_catalog().add_table(Arc::clone(&table_rc));

    let tuples: Vec<Tuple> = (0..rows).map(|i| new_int_tuples(i as i32, columns)).collect();

    let write_tx = Transaction::new();

    // borrow of table_rc start here
    {
        let table = table_rc.rl();
        match tree_layout {
            TreeLayout::Naturally => {
                for t in tuples.iter() {
                    table.insert_tuple(&write_tx, t).unwrap();
                }
            }
            TreeLayout::EvenlyDistributed | TreeLayout::LastTwoEvenlyDistributed => {
                let page_index = sequential_insert_into_table(
                    &write_tx,
                    &table,
                    &tuples,
                    &row_scheme,
                    tree_layout,
                );
                table.set_page_index(page_index);
            }
        }
    }
    // borrow of table_rc ends here

    write_tx.commit().unwrap();
    table_rc
}

/// Build the tree bottom-up with a chosen leaf occupancy layout: all
/// leaves full for `EvenlyDistributed` is not generally possible, so
/// the slack is spread over every leaf, or packed into the last two.
fn sequential_insert_into_table(
    tx: &Transaction,
    table: &BTreeTable,
    tuples: &[Tuple],
    tuple_scheme: &Schema,
    tree_layout: TreeLayout,
) -> u32 {
    // stage 1: write leaf pages
    let mut leaves = Vec::new();

    let leaf_buckets = get_buckets(
        tuples.len(),
        BTreeLeafPage::calculate_slots_count(tuple_scheme),
        tree_layout,
    );

    let mut page_index: u32 = 0;
    let mut tuple_index = 0;
    for tuple_count in &leaf_buckets {
        page_index += 1;
        let pid = BTreePageID::new(PageCategory::Leaf, table.get_id(), page_index);
        table.write_empty_page_to_disk(&pid).unwrap();

        let leaf_rc = Database::page_cache()
            .get_leaf_page(tx, Permission::ReadWrite, &pid)
            .unwrap();
        leaves.push(leaf_rc.clone());

        // borrow of leaf_rc start here
        {
            let mut leaf = leaf_rc.wl();

            for _ in 0..*tuple_count {
                if let Some(t) = tuples.get(tuple_index) {
                    leaf.insert_tuple(t).unwrap();
                }
                tuple_index += 1;
            }

            // page indexes run in [1, leaf_page_count]; thread the
            // sibling pointers
            if page_index < leaf_buckets.len() as u32 {
                let right_pid =
                    BTreePageID::new(PageCategory::Leaf, table.get_id(), page_index + 1);
                leaf.set_right_pid(Some(right_pid));
            }
            if page_index > 1 {
                let left_pid =
                    BTreePageID::new(PageCategory::Leaf, table.get_id(), page_index - 1);
                leaf.set_left_pid(Some(left_pid));
            }
        }
        // borrow of leaf_rc ends here
    }

    match leaves.len() {
        0 => {
            return page_index;
        }
        1 => {
            let leaf = leaves[0].rl();
            table.set_root_pid(tx, &leaf.get_pid()).unwrap();
            return page_index;
        }
        _ => {}
    }

    // stage 2: write internal pages
    let internal_buckets = get_buckets(leaf_buckets.len(), internal_children_cap(), tree_layout);

    // leaf index in the leaves vector
    let mut leaf_index = 0;

    let mut internals = Vec::new();
    for children_count in internal_buckets {
        page_index += 1;
        let pid = BTreePageID::new(PageCategory::Internal, table.get_id(), page_index);
        table.write_empty_page_to_disk(&pid).unwrap();

        let internal_rc = Database::page_cache()
            .get_internal_page(tx, Permission::ReadWrite, &pid)
            .unwrap();
        internals.push(internal_rc.clone());

        let entries_count = children_count - 1;
        for j in 0..entries_count {
            // borrow of internal_rc start here
            {
                let left_rc = leaves[leaf_index].clone();
                let right_rc = leaves[leaf_index + 1].clone();
                let mut it = BTreeLeafPageIteratorRc::new(right_rc.clone());
                let key = it.next().unwrap().get_cell(table.key_field);

                let mut internal = internal_rc.wl();
                let e = Entry::new(key, &left_rc.rl().get_pid(), &right_rc.rl().get_pid());
                internal.insert_entry(&e).unwrap();

                leaf_index += 1;

                // set parent for all left children
                left_rc.wl().set_parent_pid(&pid);
                // set parent for the last right child
                if j == entries_count - 1 {
                    right_rc.wl().set_parent_pid(&pid);
                }
            }
            // borrow of internal_rc ends here
        }

        // increase for the last right child
        leaf_index += 1;
    }

    write_internal_pages(tx, table, internals, &mut page_index)
}

fn write_internal_pages(
    tx: &Transaction,
    table: &BTreeTable,
    internals: Vec<Pod<BTreeInternalPage>>,
    page_index: &mut u32,
) -> u32 {
    if internals.len() <= 1 {
        let internal = internals[0].rl();
        table.set_root_pid(tx, &internal.get_pid()).unwrap();
        return *page_index;
    } else if internals.len() <= internal_children_cap() {
        // write a new internal page (the root page)
        *page_index += 1;
        let pid = BTreePageID::new(PageCategory::Internal, table.get_id(), *page_index);
        table.write_empty_page_to_disk(&pid).unwrap();

        let root_rc = Database::page_cache()
            .get_internal_page(tx, Permission::ReadWrite, &pid)
            .unwrap();

        // insert entries
        let entries_count = internals.len() - 1;
        for i in 0..entries_count {
            // borrow of root_rc start here
            {
                let left_rc = internals[i].clone();
                let right_rc = internals[i + 1].clone();

                let key = table
                    .get_last_tuple(tx, &left_rc.rl().get_pid())
                    .unwrap()
                    .unwrap()
                    .get_cell(table.key_field);

                let mut root = root_rc.wl();
                let e = Entry::new(key, &left_rc.rl().get_pid(), &right_rc.rl().get_pid());
                root.insert_entry(&e).unwrap();

                // set parent for all left children
                left_rc.wl().set_parent_pid(&pid);
                // set parent for the last right child
                if i == entries_count - 1 {
                    right_rc.wl().set_parent_pid(&pid);
                }
            }
            // borrow of root_rc ends here
        }

        // update root pointer
        table.set_root_pid(tx, &pid).unwrap();
        *page_index
    } else {
        unimplemented!("three levels of internal pages")
    }
}

fn get_buckets(elem_count: usize, max_capacity: usize, layout: TreeLayout) -> Vec<usize> {
    if elem_count <= max_capacity {
        return vec![elem_count];
    }

    let mut bucket_count = elem_count / max_capacity;
    if elem_count % max_capacity > 0 {
        bucket_count += 1;
    }

    let mut table = Vec::new();
    match layout {
        TreeLayout::Naturally | TreeLayout::EvenlyDistributed => {
            let bucket_size = elem_count / bucket_count;
            let lacked = elem_count % bucket_count;
            for _ in 0..lacked {
                table.push(bucket_size + 1);
            }
            for _ in lacked..bucket_count {
                table.push(bucket_size);
            }
        }
        TreeLayout::LastTwoEvenlyDistributed => {
            let lacked = max_capacity * bucket_count - elem_count;
            for _ in 0..(bucket_count.checked_sub(2).unwrap_or_default()) {
                table.push(max_capacity);
            }

            table.push(max_capacity - lacked / 2);
            if lacked % 2 == 0 {
                table.push(max_capacity - lacked / 2);
            } else {
                table.push(max_capacity - lacked / 2 - 1);
            }
        }
    }

    table
}

/// Insert `count` sequential tuples (values past `start`) in one
/// transaction.
pub fn insert_tuples_from(table: &BTreeTable, start: i32, count: usize) {
    let tx = Transaction::new();
    for i in 0..count {
        let tuple = new_int_tuples(start + i as i32, 2);
        table.insert_tuple(&tx, &tuple).unwrap();
    }
    tx.commit().unwrap();
}

/// Delete the first `count` tuples, in key order. Every delete works
/// on a fresh scan so record ids stay valid across the rebalancing the
/// previous delete may have caused.
pub fn delete_tuples(table: &BTreeTable, count: usize) {
    let tx = Transaction::new();
    for _ in 0..count {
        let victim = BTreeTableIterator::new(&tx, table).next().unwrap();
        table.delete_tuple(&tx, &victim).unwrap();
    }
    tx.commit().unwrap();
}

/// Delete the last `count` tuples, in reverse key order.
pub fn delete_tuples_from_end(table: &BTreeTable, count: usize) {
    let tx = Transaction::new();
    for _ in 0..count {
        let victim = BTreeTableIterator::new(&tx, table).next_back().unwrap();
        table.delete_tuple(&tx, &victim).unwrap();
    }
    tx.commit().unwrap();
}

/// Walk down the tree to the internal page at `level` (0 = root),
/// taking the `index`-th child at each step.
pub fn get_internal_page(
    table: &BTreeTable,
    level: usize,
    index: usize,
) -> Pod<BTreeInternalPage> {
    let tx = Transaction::new();
    let root_pid = table.get_root_pid(&tx).unwrap();
    let root_pod = Database::page_cache()
        .get_internal_page(&tx, Permission::ReadOnly, &root_pid)
        .unwrap();

    let result = match level {
        0 => root_pod,
        1 => {
            let child_pid = {
                let root = root_pod.rl();
                let mut it = BTreeInternalPageIterator::new(&root);
                match index {
                    0 => it.next().unwrap().get_left_child(),
                    _ => it.nth(index - 1).unwrap().get_right_child(),
                }
            };
            Database::page_cache()
                .get_internal_page(&tx, Permission::ReadOnly, &child_pid)
                .unwrap()
        }
        _ => unimplemented!(),
    };

    tx.commit().unwrap();
    result
}

/// The `index`-th leaf page at `level` levels below the root.
pub fn get_leaf_page(table: &BTreeTable, level: usize, index: usize) -> Pod<BTreeLeafPage> {
    let tx = Transaction::new();

    let result = match level {
        0 => {
            let root_pid = table.get_root_pid(&tx).unwrap();
            Database::page_cache()
                .get_leaf_page(&tx, Permission::ReadOnly, &root_pid)
                .unwrap()
        }
        _ => {
            let parent_pod = if level == 1 {
                get_internal_page(table, 0, 0)
            } else {
                get_internal_page(table, level - 1, index)
            };

            let child_pid = {
                let parent = parent_pod.rl();
                let mut it = BTreeInternalPageIterator::new(&parent);
                match index {
                    0 => it.next().unwrap().get_left_child(),
                    _ => it.nth(index - 1).unwrap().get_right_child(),
                }
            };
            Database::page_cache()
                .get_leaf_page(&tx, Permission::ReadOnly, &child_pid)
                .unwrap()
        }
    };

    tx.commit().unwrap();
    result
}

pub fn assert_true(predicate: bool, table: &BTreeTable) {
    if !predicate {
        table.draw_tree(-1);
        panic!("assertion failed, tree drawn to the debug log");
    }
}
