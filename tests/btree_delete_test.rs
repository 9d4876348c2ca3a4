mod test_utils;

use oak_db::{
    btree::page::{BTreeLeafPageIterator, BTreePage, PageCategory},
    storage::tuple::WrappedTuple,
    transaction::Transaction,
    utils::{floor_div, HandyRwLock},
    BTreeTableIterator,
};

use crate::test_utils::{
    assert_true, delete_tuples, delete_tuples_from_end, get_internal_page, get_leaf_page,
    insert_tuples_from, internal_children_cap, leaf_records_cap, new_int_tuples,
    new_random_btree_table, new_sequential_btree_table, setup, TreeLayout,
};

#[test]
fn test_redistribute_leaf_pages() {
    setup();

    // Create a B+ tree with two full leaf pages.
    let table_rc = new_random_btree_table(
        2,
        leaf_records_cap() * 2,
        None,
        0,
        TreeLayout::EvenlyDistributed,
    );
    let table = table_rc.rl();

    let left_pod = get_leaf_page(&table, 1, 0);
    let right_pod = get_leaf_page(&table, 1, 1);

    // Delete some tuples from the first page until it gets to minimum
    // occupancy.
    let delete_count = floor_div(leaf_records_cap(), 2);
    delete_tuples(&table, delete_count);
    assert_true(left_pod.rl().empty_slots_count() == delete_count, &table);

    // Deleting a tuple now should bring the page below minimum
    // occupancy and cause the tuples to be redistributed.
    delete_tuples(&table, 1);
    assert_true(left_pod.rl().empty_slots_count() < delete_count, &table);

    // Assert some tuples of the right page were stolen, and that both
    // pages hold an equal share.
    assert_true(right_pod.rl().empty_slots_count() > 0, &table);
    let diff = left_pod.rl().tuples_count() as i64 - right_pod.rl().tuples_count() as i64;
    assert_true(diff.abs() <= 1, &table);

    // The parent separator must equal the first key of the right page
    // after the rotation.
    let root_pod = get_internal_page(&table, 0, 0);
    let separator = root_pod.rl().get_entry(1).unwrap().get_key();
    let right_first_key = {
        let right = right_pod.rl();
        let mut it = BTreeLeafPageIterator::new(&right);
        it.next().unwrap().get_cell(table.key_field)
    };
    assert_true(separator == right_first_key, &table);

    table.check_integrity(true);
}

#[test]
fn test_merge_leaf_pages() {
    setup();

    // This should create a B+ tree with one full page and two
    // half-full leaf pages
    let table_rc = new_random_btree_table(
        2,
        leaf_records_cap() * 2 + 1,
        None,
        0,
        TreeLayout::LastTwoEvenlyDistributed,
    );
    let table = table_rc.rl();

    // there should be one internal page and 3 leaf pages
    assert_true(table.pages_count() == 4, &table);

    // delete the last two tuples; the first delete brings the rightmost
    // leaf below minimum occupancy and merges it into its sibling
    delete_tuples_from_end(&table, 2);

    // confirm that the last two pages have merged successfully
    let root_pod = get_internal_page(&table, 0, 0);
    assert_true(root_pod.rl().children_count() == 2, &table);

    table.check_integrity(true);
}

#[test]
fn test_delete_root_page() {
    setup();

    // this should create a B+ tree with two full leaf pages
    let table_rc = new_random_btree_table(
        2,
        leaf_records_cap() * 2,
        None,
        0,
        TreeLayout::EvenlyDistributed,
    );
    let table = table_rc.rl();
    table.check_integrity(true);

    // there should be one internal page and 2 leaf pages
    assert_true(table.pages_count() == 3, &table);

    // deleting half the tuples merges the two leaves; the merged leaf
    // becomes the new root and the root pointer records a leaf root
    delete_tuples(&table, leaf_records_cap() + 20);

    let tx = Transaction::new();
    let root_pid = table.get_root_pid(&tx).unwrap();
    tx.commit().unwrap();
    assert_true(root_pid.category == PageCategory::Leaf, &table);

    let root_pod = get_leaf_page(&table, 0, 0);
    assert_true(
        root_pod.rl().tuples_count() == leaf_records_cap() - 20,
        &table,
    );

    table.check_integrity(true);
}

#[test]
fn test_reuse_deleted_pages() {
    setup();

    // This should create a B+ tree with 3 leaf pages holding the keys
    // 0..1005.
    let row_count = leaf_records_cap() * 2 + 1;
    let table_rc =
        new_sequential_btree_table(2, row_count, 0, TreeLayout::LastTwoEvenlyDistributed);
    let table = table_rc.rl();

    // 3 leaf pages + 1 internal page
    assert_true(table.pages_count() == 4, &table);

    // Delete half the keys from the left end: one leaf merge happens on
    // the way, its page goes to a freshly created header page, and both
    // surviving leaves end up at minimum occupancy.
    delete_tuples(&table, leaf_records_cap() + 1);

    // 2 leaf pages + 1 internal page + 1 header page + 1 freed slot
    assert_true(table.pages_count() == 5, &table);

    // now insert enough tuples to force exactly one split: the freed
    // slot is reused instead of extending the file
    insert_tuples_from(&table, row_count as i32 + 1000, leaf_records_cap());
    assert_true(table.pages_count() == 5, &table);

    table.check_integrity(true);
}

#[test]
fn test_merge_internal_pages() {
    setup();

    // Build a tree with two internal pages under the root.
    let leaves = internal_children_cap() + 1;
    let row_count = leaf_records_cap() * leaves;
    let table_rc = new_random_btree_table(
        2,
        row_count,
        None,
        0,
        TreeLayout::LastTwoEvenlyDistributed,
    );
    let table = table_rc.rl();

    let root_pod = get_internal_page(&table, 0, 0);
    assert_true(root_pod.rl().entries_count() == 1, &table);
    table.check_integrity(true);

    // Deleting from the left end shrinks the left internal page one
    // leaf merge at a time, until the two internal pages merge and the
    // surviving page becomes the new root.
    delete_tuples(&table, leaf_records_cap() * 2 + 200);

    let root_pod = get_internal_page(&table, 0, 0);
    let root = root_pod.rl();
    assert_true(
        root.get_child_category() == PageCategory::Leaf,
        &table,
    );
    drop(root);

    table.check_integrity(true);
}

#[test]
fn test_delete_missing_tuple() {
    setup();

    let table_rc = new_sequential_btree_table(2, 10, 0, TreeLayout::Naturally);
    let table = table_rc.rl();

    let tx = Transaction::new();
    let leaf_pod = get_leaf_page(&table, 0, 0);
    let pid = leaf_pod.rl().get_pid();

    // a tuple that was never inserted: the delete must be rejected
    let phantom = WrappedTuple::new(new_int_tuples(9999, 2), 3, pid);
    let result = table.delete_tuple(&tx, &phantom);
    assert!(result.is_err());
    tx.commit().unwrap();

    // the table is untouched
    let tx = Transaction::new();
    assert_eq!(BTreeTableIterator::new(&tx, &table).count(), 10);
    tx.commit().unwrap();
}
