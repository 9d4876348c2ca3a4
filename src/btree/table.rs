use core::fmt;
use std::{
    collections::hash_map::DefaultHasher,
    env,
    fs::{File, OpenOptions},
    hash::{Hash, Hasher},
    io::{Read, Seek, SeekFrom, Write},
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex, MutexGuard,
    },
    time::SystemTime,
};

use log::debug;

use crate::{
    concurrent_status::{Lock, Permission},
    error::OakError,
    io::ByteWriter,
    predicate::{Op, Predicate},
    storage::{
        schema::Schema,
        tuple::{Cell, Tuple, WrappedTuple},
    },
    transaction::Transaction,
    types::{OakResult, Pod, ResultPod},
    utils::{lock_state, HandyRwLock},
    Database,
};

use super::{
    page::{
        BTreeHeaderPage, BTreeInternalPage, BTreeInternalPageIterator, BTreeLeafPage,
        BTreeLeafPageIterator, BTreeLeafPageIteratorRc, BTreePage, BTreePageID,
        BTreeRootPointerPage, Entry, PageCategory,
    },
    page_cache::PageCache,
};

enum SearchFor {
    Key(Cell),
    LeftMost,
    RightMost,
}

/// B+ Tree
pub struct BTreeTable {
    // path of the on-disk backing store for this B+ tree
    file_path: String,

    // the field which index is keyed on
    pub key_field: usize,

    // the tuple descriptor of tuples in the file
    pub tuple_scheme: Schema,

    file: Mutex<File>,

    table_id: u32,

    /// the page index of the last page in the file
    ///
    /// Page indexes start from 0 and increase monotonically by 1; the
    /// index of the root pointer page is always 0.
    page_index: AtomicU32,
}

impl fmt::Display for BTreeTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<BTreeTable, file: {}, id: {}>", self.file_path, self.table_id)
    }
}

impl BTreeTable {
    pub fn new(file_path: &str, key_field: usize, row_scheme: &Schema) -> Self {
        let f = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(file_path)
            .expect("io error");

        let mut hasher = DefaultHasher::new();
        file_path.hash(&mut hasher);
        SystemTime::now().hash(&mut hasher);
        let table_id = hasher.finish() as u32;

        let table = Self {
            file_path: file_path.to_string(),
            key_field,
            tuple_scheme: row_scheme.clone(),
            file: Mutex::new(f),
            table_id,
            page_index: AtomicU32::new(1),
        };

        table.file_init().expect("io error");
        table
            .page_index
            .store(table.pages_count() as u32, Ordering::Relaxed);

        table
    }

    pub fn get_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_file_path(&self) -> String {
        self.file_path.clone()
    }

    pub fn get_tuple_scheme(&self) -> Schema {
        self.tuple_scheme.clone()
    }

    pub fn insert_tuple_auto_tx(&self, tuple: &Tuple) -> OakResult {
        let tx = Transaction::new();
        if let Err(e) = self.insert_tuple(&tx, tuple) {
            tx.abort()?;
            return Err(e);
        }
        tx.commit()
    }

    /// Insert a tuple into this table, keeping the tuples in sorted
    /// order. May cause pages to split if the page where the tuple
    /// belongs is full.
    pub fn insert_tuple(&self, tx: &Transaction, tuple: &Tuple) -> OakResult {
        // a read lock on the root pointer page is enough to locate the
        // root page
        let mut root_pid = self.get_root_pid(tx)?;

        // an empty tree gets a fresh leaf as its root first
        if root_pid.category == PageCategory::RootPointer {
            let root_rc = self.get_empty_leaf_page(tx)?;
            root_pid = root_rc.rl().get_pid();
            self.set_root_pid(tx, &root_pid)?;
        }

        // find and write-lock the left-most leaf page corresponding to
        // the key field, and split the leaf page if there are no more
        // slots available
        let field = tuple.get_cell(self.key_field);
        let mut leaf_rc =
            self.find_leaf_page(tx, Permission::ReadWrite, root_pid, &SearchFor::Key(field.clone()))?;

        if leaf_rc.rl().empty_slots_count() == 0 {
            leaf_rc = self.split_leaf_page(tx, leaf_rc, &field)?;
        }
        let result = leaf_rc.wl().insert_tuple(tuple);
        result
    }

    /// Split a leaf page to make room for new tuples and recursively
    /// split the parent node as needed to accommodate a new entry. The
    /// new entry has a key matching the key field of the first tuple in
    /// the right-hand page (the key is "copied up"), and child pointers
    /// pointing to the two leaf pages resulting from the split. Sibling
    /// pointers and parent pointers are updated as needed.
    ///
    /// Returns the leaf page into which a new tuple with key `field`
    /// should be inserted.
    fn split_leaf_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeLeafPage>,
        field: &Cell,
    ) -> ResultPod<BTreeLeafPage> {
        let new_sibling_rc = self.get_empty_leaf_page(tx)?;
        let parent_pid: BTreePageID;
        let sep_key: Cell;

        // borrow of new_sibling_rc and page_rc start here
        {
            let mut new_sibling = new_sibling_rc.wl();
            let mut page = page_rc.wl();

            // 1. add a new page on the right of the existing page and
            // move half of the tuples there
            let tuple_count = page.tuples_count();
            let move_tuple_count = tuple_count / 2;

            let mut delete_indexes: Vec<usize> = Vec::new();
            let it = BTreeLeafPageIterator::new(&page);
            for tuple in it.rev().take(move_tuple_count) {
                delete_indexes.push(tuple.get_slot_number());
                new_sibling.insert_tuple(&tuple)?;
            }
            for i in delete_indexes {
                page.delete_tuple(i);
            }

            // the separator is the key of the first tuple of the new
            // right page (it is "copied up" into the parent)
            let mut it = BTreeLeafPageIterator::new(&new_sibling);
            sep_key = it.next().unwrap().get_cell(self.key_field);

            parent_pid = page.get_parent_pid();
        }
        // borrow of new_sibling_rc and page_rc end here

        // 2. copy the separator key up into the parent page, and
        // recursively split the parent as needed to accommodate the new
        // entry.
        //
        // This stays outside all borrow blocks: once the parent page
        // splits, a lot of children are borrowed (possibly including
        // the current leaf page).
        let parent_rc = self.get_parent_with_empty_slots(tx, parent_pid, field)?;

        // borrow of parent_rc, page_rc and new_sibling_rc start here
        {
            let mut parent = parent_rc.wl();
            let mut page = page_rc.wl();
            let mut new_sibling = new_sibling_rc.wl();
            let entry = Entry::new(sep_key.clone(), &page.get_pid(), &new_sibling.get_pid());

            debug!(
                "split leaf: page: {}, lock: {}, new sibling: {}, lock: {}, parent: {}, lock: {}",
                page.get_pid(),
                lock_state(&*page_rc),
                new_sibling.get_pid(),
                lock_state(&*new_sibling_rc),
                parent.get_pid(),
                lock_state(&*parent_rc),
            );

            parent.insert_entry(&entry)?;

            // splice the new page into the sibling list
            if let Some(old_right_pid) = page.get_right_pid() {
                let old_right_rc = Database::page_cache().get_leaf_page(
                    tx,
                    Permission::ReadWrite,
                    &old_right_pid,
                )?;
                old_right_rc.wl().set_left_pid(Some(new_sibling.get_pid()));
            }
            new_sibling.set_right_pid(page.get_right_pid());
            new_sibling.set_left_pid(Some(page.get_pid()));
            page.set_right_pid(Some(new_sibling.get_pid()));

            // set parent id
            page.set_parent_pid(&parent.get_pid());
            new_sibling.set_parent_pid(&parent.get_pid());
        }
        // borrow of parent_rc, page_rc and new_sibling_rc end here

        if *field < sep_key {
            Ok(page_rc)
        } else {
            Ok(new_sibling_rc)
        }
    }

    /// Method to encapsulate the process of getting a parent page ready
    /// to accept new entries.
    ///
    /// This may mean creating a page to become the new root of the
    /// tree, splitting the existing parent page if there are no empty
    /// slots, or simply locking and returning the existing parent page.
    fn get_parent_with_empty_slots(
        &self,
        tx: &Transaction,
        parent_id: BTreePageID,
        field: &Cell,
    ) -> ResultPod<BTreeInternalPage> {
        match parent_id.category {
            PageCategory::RootPointer => {
                // create a parent node; this will be the new root of
                // the tree
                let new_parent_rc = self.get_empty_internal_page(tx)?;

                self.set_root_pid(tx, &new_parent_rc.rl().get_pid())?;

                Ok(new_parent_rc)
            }
            PageCategory::Internal => {
                let parent_rc = Database::page_cache().get_internal_page(
                    tx,
                    Permission::ReadWrite,
                    &parent_id,
                )?;

                let empty_slots_count = parent_rc.rl().empty_slots_count();
                if empty_slots_count > 0 {
                    Ok(parent_rc)
                } else {
                    // split the upper parent
                    self.split_internal_page(tx, parent_rc, field)
                }
            }
            category => Err(OakError::invalid(&format!(
                "{} cannot be the parent of a tree page",
                category,
            ))),
        }
    }

    /// Split an internal page to make room for new entries and
    /// recursively split its parent page as needed to accommodate a new
    /// entry. The entry in the middle of the page is "pushed up" to the
    /// parent: its left child stays as the rightmost child of the
    /// original page, its right child becomes the leftmost child of the
    /// new sibling. Parent pointers of every moved child are rewritten.
    ///
    /// Returns the internal page into which an entry with key `field`
    /// should be inserted.
    fn split_internal_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeInternalPage>,
        field: &Cell,
    ) -> ResultPod<BTreeInternalPage> {
        let sibling_rc = self.get_empty_internal_page(tx)?;
        let promoted_key: Cell;
        let mut parent_pid: BTreePageID;
        let new_entry: Entry;

        // borrow of sibling_rc and page_rc start here
        {
            let mut sibling = sibling_rc.wl();
            let mut page = page_rc.wl();

            parent_pid = page.get_parent_pid();

            if parent_pid.category == PageCategory::RootPointer {
                // the page being split is the root: create a new parent
                // page and install it as root first
                let parent_rc = self.get_empty_internal_page(tx)?;
                parent_pid = parent_rc.rl().get_pid();
                self.set_root_pid(tx, &parent_pid)?;
            }

            let entries_count = page.entries_count();
            let move_entries_count = entries_count / 2;

            let mut delete_indexes: Vec<usize> = Vec::new();
            let mut it = BTreeInternalPageIterator::new(&page);
            for e in it.by_ref().rev().take(move_entries_count) {
                delete_indexes.push(e.get_record_id());
                sibling.insert_entry(&e)?;

                // the right child of every moved entry changes parent
                Self::set_parent(tx, &e.get_right_child(), &sibling.get_pid())?;
            }

            // the middle entry is promoted upward: delete it from the
            // original page too, and hand its right child over to the
            // new sibling as leftmost child
            let middle_entry = it.next_back().unwrap();
            delete_indexes.push(middle_entry.get_record_id());
            for i in delete_indexes {
                page.delete_key_and_right_child(i);
            }

            Self::set_parent(tx, &middle_entry.get_right_child(), &sibling.get_pid())?;

            promoted_key = middle_entry.get_key();
            new_entry = Entry::new(promoted_key.clone(), &page.get_pid(), &sibling.get_pid());
        }
        // borrow of sibling_rc and page_rc end here

        let parent_rc = self.get_parent_with_empty_slots(tx, parent_pid, field)?;
        parent_pid = parent_rc.rl().get_pid();
        page_rc.wl().set_parent_pid(&parent_pid);
        sibling_rc.wl().set_parent_pid(&parent_pid);

        parent_rc.wl().insert_entry(&new_entry)?;

        if *field < promoted_key {
            Ok(page_rc)
        } else {
            Ok(sibling_rc)
        }
    }
}

/// delete implementation
impl BTreeTable {
    pub fn delete_tuple_auto_tx(&self, tuple: &WrappedTuple) -> OakResult {
        let tx = Transaction::new();
        if let Err(e) = self.delete_tuple(&tx, tuple) {
            tx.abort()?;
            return Err(e);
        }
        tx.commit()
    }

    /// Delete a tuple from this table.
    ///
    /// May cause pages to merge or redistribute entries/tuples if the
    /// pages drop below half full.
    pub fn delete_tuple(&self, tx: &Transaction, tuple: &WrappedTuple) -> OakResult {
        let pid = tuple.get_pid();
        let leaf_rc = Database::page_cache().get_leaf_page(tx, Permission::ReadWrite, &pid)?;

        // hold the leaf page
        {
            let mut leaf = leaf_rc.wl();
            match leaf.get_tuple(tuple.get_slot_number()) {
                Some(stored) if stored == **tuple => {
                    leaf.delete_tuple(tuple.get_slot_number());
                }
                _ => {
                    return Err(OakError::invalid(&format!(
                        "tuple {} is not on page {}",
                        tuple, pid,
                    )));
                }
            }
        }
        // release the leaf page

        if leaf_rc.rl().stable() {
            Ok(())
        } else {
            self.handle_unstable_leaf_page(tx, leaf_rc)
        }
    }

    /// Handle the case when a leaf page drops below half full due to
    /// deletions.
    ///
    /// If one of its siblings has extra tuples, redistribute those
    /// tuples. Otherwise merge with one of the siblings. Only pages
    /// under the same parent qualify as siblings; when both exist the
    /// left one wins.
    fn handle_unstable_leaf_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeLeafPage>,
    ) -> OakResult {
        let parent_pid = page_rc.rl().get_parent_pid();
        if parent_pid.category == PageCategory::RootPointer {
            // the root may be underfilled
            return Ok(());
        }

        let parent_rc =
            Database::page_cache().get_internal_page(tx, Permission::ReadWrite, &parent_pid)?;

        let pid = page_rc.rl().get_pid();
        let left_entry = parent_rc.rl().get_entry_by_right_child(&pid);
        let right_entry = parent_rc.rl().get_entry_by_left_child(&pid);

        if let Some(entry) = left_entry {
            let left_rc = Database::page_cache().get_leaf_page(
                tx,
                Permission::ReadWrite,
                &entry.get_left_child(),
            )?;
            self.balancing_two_leaf_pages(tx, left_rc, page_rc, parent_rc, entry)
        } else if let Some(entry) = right_entry {
            let right_rc = Database::page_cache().get_leaf_page(
                tx,
                Permission::ReadWrite,
                &entry.get_right_child(),
            )?;
            self.balancing_two_leaf_pages(tx, page_rc, right_rc, parent_rc, entry)
        } else {
            Err(OakError::invalid(&format!(
                "page {} has no sibling under parent {}",
                pid, parent_pid,
            )))
        }
    }

    /// Handle the case when an internal page drops below half full due
    /// to deletions; mirrors the leaf variant.
    fn handle_unstable_internal_page(
        &self,
        tx: &Transaction,
        page_rc: Pod<BTreeInternalPage>,
    ) -> OakResult {
        let parent_pid = page_rc.rl().get_parent_pid();
        if parent_pid.category == PageCategory::RootPointer {
            return Ok(());
        }

        let parent_rc =
            Database::page_cache().get_internal_page(tx, Permission::ReadWrite, &parent_pid)?;

        let pid = page_rc.rl().get_pid();
        let left_entry = parent_rc.rl().get_entry_by_right_child(&pid);
        let right_entry = parent_rc.rl().get_entry_by_left_child(&pid);

        if let Some(entry) = left_entry {
            let left_rc = Database::page_cache().get_internal_page(
                tx,
                Permission::ReadWrite,
                &entry.get_left_child(),
            )?;
            self.balancing_two_internal_pages(tx, left_rc, page_rc, parent_rc, entry)
        } else if let Some(entry) = right_entry {
            let right_rc = Database::page_cache().get_internal_page(
                tx,
                Permission::ReadWrite,
                &entry.get_right_child(),
            )?;
            self.balancing_two_internal_pages(tx, page_rc, right_rc, parent_rc, entry)
        } else {
            Err(OakError::invalid(&format!(
                "page {} has no sibling under parent {}",
                pid, parent_pid,
            )))
        }
    }

    /// Balance two leaf siblings after a deletion left the unstable one
    /// under minimum occupancy:
    ///
    /// 1. Merge them when all tuples fit into a single page.
    ///
    /// 2. Otherwise steal tuples from the richer sibling until both
    /// sides hold `floor((left + right) / 2)` tuples, then re-derive
    /// the parent separator as the new first key of the right page.
    fn balancing_two_leaf_pages(
        &self,
        tx: &Transaction,
        left_rc: Pod<BTreeLeafPage>,
        right_rc: Pod<BTreeLeafPage>,
        parent_rc: Pod<BTreeInternalPage>,
        mut entry: Entry,
    ) -> OakResult {
        let left_tuples = left_rc.rl().tuples_count();
        let right_tuples = right_rc.rl().tuples_count();

        if left_tuples + right_tuples <= left_rc.rl().get_slots_count() {
            return self.merge_leaf_page(tx, left_rc, right_rc, parent_rc, &entry);
        }

        let move_count =
            (left_tuples + right_tuples) / 2 - std::cmp::min(left_tuples, right_tuples);
        if move_count == 0 {
            return Ok(());
        }

        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            if left_tuples < right_tuples {
                let iter = BTreeLeafPageIterator::new(&right);
                let mut deleted_indexes = Vec::new();
                for tuple in iter.take(move_count) {
                    left.insert_tuple(&tuple)?;
                    deleted_indexes.push(tuple.get_slot_number());
                }
                for i in deleted_indexes {
                    right.delete_tuple(i);
                }
            } else {
                let iter = BTreeLeafPageIterator::new(&left);
                let mut deleted_indexes = Vec::new();
                for tuple in iter.rev().take(move_count) {
                    right.insert_tuple(&tuple)?;
                    deleted_indexes.push(tuple.get_slot_number());
                }
                for i in deleted_indexes {
                    left.delete_tuple(i);
                }
            }

            // the separator between the two pages changed: write the
            // new first key of the right page into the parent entry
            let mut it = BTreeLeafPageIterator::new(&right);
            let new_key = it.next().unwrap().get_cell(self.key_field);
            entry.set_key(new_key);
            parent_rc.wl().update_entry(&entry);
        }
        // release the left and right page

        Ok(())
    }

    /// Balance two internal siblings: merge when everything (plus the
    /// separator pulled down from the parent) fits into one page,
    /// otherwise rotate entries through the parent separator until both
    /// sides are balanced. Every moved child gets its parent pointer
    /// rewritten.
    fn balancing_two_internal_pages(
        &self,
        tx: &Transaction,
        left_rc: Pod<BTreeInternalPage>,
        right_rc: Pod<BTreeInternalPage>,
        parent_rc: Pod<BTreeInternalPage>,
        mut parent_entry: Entry,
    ) -> OakResult {
        let left_entries = left_rc.rl().entries_count();
        let right_entries = right_rc.rl().entries_count();

        if left_entries + right_entries < left_rc.rl().get_entries_count_cap() {
            return self.merge_internal_page(tx, left_rc, right_rc, parent_rc, &parent_entry);
        }

        let move_count =
            (left_entries + right_entries) / 2 - std::cmp::min(left_entries, right_entries);
        if move_count == 0 {
            return Ok(());
        }

        let mut middle_key = parent_entry.get_key();

        if left_entries < right_entries {
            // rotate entries from the right page into the left page:
            // the separator comes down into the left page and the first
            // key of the right page goes up to replace it
            for _ in 0..move_count {
                let e = {
                    let right = right_rc.rl();
                    BTreeInternalPageIterator::new(&right).next().unwrap()
                };

                let moved_child = e.get_left_child();
                {
                    let mut left = left_rc.wl();
                    let edge_child = left.get_last_child_pid();
                    let new_entry = Entry::new(middle_key.clone(), &edge_child, &moved_child);
                    left.insert_entry(&new_entry)?;
                }
                right_rc.wl().delete_key_and_left_child(e.get_record_id());

                Self::set_parent(tx, &moved_child, &left_rc.rl().get_pid())?;
                middle_key = e.get_key();
            }
        } else {
            // mirror image: rotate entries from the left page into the
            // right page
            for _ in 0..move_count {
                let e = {
                    let left = left_rc.rl();
                    BTreeInternalPageIterator::new(&left).next_back().unwrap()
                };

                let moved_child = e.get_right_child();
                {
                    let mut right = right_rc.wl();
                    let edge_child = right.get_first_child_pid();
                    let new_entry = Entry::new(middle_key.clone(), &moved_child, &edge_child);
                    right.insert_entry(&new_entry)?;
                }
                left_rc.wl().delete_key_and_right_child(e.get_record_id());

                Self::set_parent(tx, &moved_child, &right_rc.rl().get_pid())?;
                middle_key = e.get_key();
            }
        }

        parent_entry.set_key(middle_key);
        parent_rc.wl().update_entry(&parent_entry);
        Ok(())
    }

    /// Merge the right leaf into the left one: move every tuple over,
    /// splice the right page out of the sibling list, free it and
    /// delete the separator entry from the parent.
    fn merge_leaf_page(
        &self,
        tx: &Transaction,
        left_rc: Pod<BTreeLeafPage>,
        right_rc: Pod<BTreeLeafPage>,
        parent_rc: Pod<BTreeInternalPage>,
        entry: &Entry,
    ) -> OakResult {
        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            // stage 1: move the tuples from right to left
            let mut deleted = Vec::new();
            let it = BTreeLeafPageIterator::new(&right);
            for t in it {
                left.insert_tuple(&t)?;
                deleted.push(t.get_slot_number());
            }
            for slot in deleted {
                right.delete_tuple(slot);
            }

            // stage 2: splice the right page out of the sibling list
            left.set_right_pid(right.get_right_pid());
            if let Some(newer_right_pid) = right.get_right_pid() {
                let newer_right_rc = Database::page_cache().get_leaf_page(
                    tx,
                    Permission::ReadWrite,
                    &newer_right_pid,
                )?;
                newer_right_rc.wl().set_left_pid(Some(left.get_pid()));
            }

            // stage 3: release the right page for reuse
            self.set_free_page(tx, &right.get_pid())?;
        }
        // release the left and right page

        // stage 4: remove the separator entry from the parent
        self.delete_parent_entry(tx, left_rc, parent_rc, entry)
    }

    /// Merge the right internal page into the left one. The separator
    /// is pulled down from the parent to bridge the two child runs.
    fn merge_internal_page(
        &self,
        tx: &Transaction,
        left_rc: Pod<BTreeInternalPage>,
        right_rc: Pod<BTreeInternalPage>,
        parent_rc: Pod<BTreeInternalPage>,
        parent_entry: &Entry,
    ) -> OakResult {
        // hold the left and right page
        {
            let mut left = left_rc.wl();
            let mut right = right_rc.wl();

            // stage 1: pull down the separator from the parent to
            // bridge the last child of the left page and the first
            // child of the right page
            let bridge_entry = Entry::new(
                parent_entry.get_key(),
                &left.get_last_child_pid(),
                &right.get_first_child_pid(),
            );
            Self::set_parent(tx, &right.get_first_child_pid(), &left.get_pid())?;
            left.insert_entry(&bridge_entry)?;

            // stage 2: move the entries from the right page to the left
            let moved: Vec<Entry> = BTreeInternalPageIterator::new(&right).collect();
            for e in &moved {
                left.insert_entry(e)?;
                Self::set_parent(tx, &e.get_right_child(), &left.get_pid())?;
            }
            for e in &moved {
                right.delete_key_and_right_child(e.get_record_id());
            }

            // stage 3: release the right page for reuse
            self.set_free_page(tx, &right.get_pid())?;
        }
        // release the left and right page

        // stage 4: remove the separator entry from the parent
        self.delete_parent_entry(tx, left_rc, parent_rc, parent_entry)
    }

    /// Delete an entry (the key and its right child) from a parent
    /// node.
    ///
    /// If the parent becomes empty it was the root: the surviving child
    /// becomes the new root and the old root page is freed. If the
    /// parent merely drops below minimum occupancy, it steals from or
    /// merges with its own siblings.
    fn delete_parent_entry<PAGE: BTreePage>(
        &self,
        tx: &Transaction,
        left_rc: Pod<PAGE>,
        parent_rc: Pod<BTreeInternalPage>,
        entry: &Entry,
    ) -> OakResult {
        // hold the parent and left page
        {
            let mut parent = parent_rc.wl();
            let mut left = left_rc.wl();

            // stage 1: delete the corresponding entry in the parent
            parent.delete_key_and_right_child(entry.get_record_id());

            // case 1: the parent is empty, so the left child becomes
            // the new root
            if parent.entries_count() == 0 {
                let root_ptr_rc = self.get_root_ptr_page(tx, Permission::ReadWrite)?;

                // hold the root pointer page
                {
                    let mut root_ptr = root_ptr_rc.wl();
                    left.set_parent_pid(&root_ptr.get_pid());
                    root_ptr.set_root_pid(&left.get_pid());
                }
                // release the root pointer page

                // release the former root page for reuse
                let parent_pid = parent.get_pid();
                drop(parent);
                self.set_free_page(tx, &parent_pid)?;
                return Ok(());
            }

            // case 2: the parent is stable, nothing more to do
            if parent.stable() {
                return Ok(());
            }
        }
        // release the parent and left page

        // case 3: the parent dropped below minimum occupancy
        self.handle_unstable_internal_page(tx, parent_rc)
    }

    /// Rewrite the parent pointer of the page `child_pid` names.
    fn set_parent(
        tx: &Transaction,
        child_pid: &BTreePageID,
        parent_pid: &BTreePageID,
    ) -> OakResult {
        match child_pid.category {
            PageCategory::Leaf => {
                let child_rc =
                    Database::page_cache().get_leaf_page(tx, Permission::ReadWrite, child_pid)?;
                child_rc.wl().set_parent_pid(parent_pid);
                Ok(())
            }
            PageCategory::Internal => {
                let child_rc = Database::page_cache().get_internal_page(
                    tx,
                    Permission::ReadWrite,
                    child_pid,
                )?;
                child_rc.wl().set_parent_pid(parent_pid);
                Ok(())
            }
            category => Err(OakError::invalid(&format!(
                "cannot set parent of a {} page",
                category,
            ))),
        }
    }
}

/// free-list implementation
impl BTreeTable {
    /// Find a free page number to hand out, preferring slots from the
    /// header-page free list. When no free slot exists the file grows
    /// by one (zero-filled) page and the fresh number is returned.
    fn get_empty_page_index(&self, tx: &Transaction) -> Result<u32, OakError> {
        let root_ptr_rc = self.get_root_ptr_page(tx, Permission::ReadOnly)?;
        let mut header_pid = root_ptr_rc.rl().get_header_pid();
        let mut base: u32 = 0;

        while let Some(pid) = header_pid {
            let header_rc =
                Database::page_cache().get_header_page(tx, Permission::ReadOnly, &pid)?;

            let (empty_slot, next_pid, slots) = {
                let header = header_rc.rl();
                (
                    header.get_empty_slot(),
                    header.get_next_pid(),
                    header.get_slots_count() as u32,
                )
            };

            if let Some(slot) = empty_slot {
                let header_rc =
                    Database::page_cache().get_header_page(tx, Permission::ReadWrite, &pid)?;
                header_rc.wl().mark_slot_status(slot, true);
                return Ok(base + slot as u32);
            }

            header_pid = next_pid;
            base += slots;
        }

        // no free slot anywhere: extend the file by one page
        let index = self.page_index.fetch_add(1, Ordering::Relaxed) + 1;
        self.extend_file_to(index)?;
        Ok(index)
    }

    /// Mark a page of this table as free. A page at the very tail of
    /// the file is cut off instead; anything else gets its bit cleared
    /// in the header list (growing the list when the bit does not exist
    /// yet).
    fn set_free_page(&self, tx: &Transaction, pid: &BTreePageID) -> OakResult {
        Database::page_cache().discard_page(pid);

        if pid.page_index as usize == self.pages_count() && pid.page_index > 1 {
            return self.truncate_last_page();
        }

        let root_ptr_rc = self.get_root_ptr_page(tx, Permission::ReadWrite)?;
        let first_header_pid = {
            let root_ptr = root_ptr_rc.rl();
            root_ptr.get_header_pid()
        };

        let mut current = match first_header_pid {
            Some(pid) => pid,
            None => {
                // no header pages yet: create the first one and thread
                // it into the root pointer page
                let header_rc = self.get_empty_header_page(tx)?;
                let header_pid = header_rc.rl().get_pid();
                root_ptr_rc.wl().set_header_pid(Some(header_pid));
                header_pid
            }
        };

        // walk the header list to the page covering the bit, appending
        // header pages until it exists
        let mut base: u32 = 0;
        loop {
            let header_rc =
                Database::page_cache().get_header_page(tx, Permission::ReadWrite, &current)?;
            let slots = header_rc.rl().get_slots_count() as u32;

            if pid.page_index < base + slots {
                header_rc
                    .wl()
                    .mark_slot_status((pid.page_index - base) as usize, false);
                return Ok(());
            }

            let next = header_rc.rl().get_next_pid();
            match next {
                Some(next_pid) => {
                    current = next_pid;
                }
                None => {
                    let new_rc = self.get_empty_header_page(tx)?;
                    let new_pid = new_rc.rl().get_pid();
                    new_rc.wl().set_prev_pid(Some(current));
                    header_rc.wl().set_next_pid(Some(new_pid));
                    current = new_pid;
                }
            }
            base += slots;
        }
    }

    fn get_empty_leaf_page(&self, tx: &Transaction) -> ResultPod<BTreeLeafPage> {
        let page_index = self.get_empty_page_index(tx)?;
        let pid = BTreePageID::new(PageCategory::Leaf, self.table_id, page_index);
        self.write_empty_page_to_disk(&pid)?;

        let page = BTreeLeafPage::new(
            &pid,
            &Self::empty_page_data(),
            &self.tuple_scheme,
            self.key_field,
        );
        let page_rc = std::sync::Arc::new(std::sync::RwLock::new(page));

        self.adopt_fresh_page(tx, &pid)?;
        Database::page_cache().leaf_buffer.insert(pid, page_rc.clone());
        Database::page_cache().mark_dirty(tx, &pid);

        Ok(page_rc)
    }

    fn get_empty_internal_page(&self, tx: &Transaction) -> ResultPod<BTreeInternalPage> {
        let page_index = self.get_empty_page_index(tx)?;
        let pid = BTreePageID::new(PageCategory::Internal, self.table_id, page_index);
        self.write_empty_page_to_disk(&pid)?;

        let page = BTreeInternalPage::new(
            &pid,
            &Self::empty_page_data(),
            &self.tuple_scheme,
            self.key_field,
        );
        let page_rc = std::sync::Arc::new(std::sync::RwLock::new(page));

        self.adopt_fresh_page(tx, &pid)?;
        Database::page_cache()
            .internal_buffer
            .insert(pid, page_rc.clone());
        Database::page_cache().mark_dirty(tx, &pid);

        Ok(page_rc)
    }

    fn get_empty_header_page(&self, tx: &Transaction) -> ResultPod<BTreeHeaderPage> {
        let page_index = self.get_empty_page_index(tx)?;
        let pid = BTreePageID::new(PageCategory::Header, self.table_id, page_index);
        self.write_empty_page_to_disk(&pid)?;

        let page = BTreeHeaderPage::new_empty(&pid);
        let page_rc = std::sync::Arc::new(std::sync::RwLock::new(page));

        self.adopt_fresh_page(tx, &pid)?;
        Database::page_cache()
            .header_buffer
            .insert(pid, page_rc.clone());
        Database::page_cache().mark_dirty(tx, &pid);

        Ok(page_rc)
    }

    // A freshly allocated page is invisible to other transactions, so
    // the exclusive lock is granted immediately; holding it keeps the
    // mutation rules uniform.
    fn adopt_fresh_page(&self, tx: &Transaction, pid: &BTreePageID) -> OakResult {
        Database::concurrent_status().request_lock(tx, &Lock::XLock, pid)
    }
}

/// file store implementation
impl BTreeTable {
    pub fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    /// Format the backing file on first open: write the root pointer
    /// page and an empty leaf page which serves as the first root.
    fn file_init(&self) -> OakResult {
        let mut file = self.get_file();

        if file.metadata()?.len() > 0 {
            return Ok(());
        }

        let page_size = PageCache::get_page_size();

        // the root pointer page: root lives at page 1 and is a leaf
        let mut writer = ByteWriter::new();
        writer.write(&1_u32);
        writer.write(&PageCategory::Leaf.to_byte());
        writer.write(&0_u32);
        file.write_all(&writer.to_padded_bytes(page_size))?;

        // the empty leaf root
        file.write_all(&vec![0; page_size])?;
        file.flush()?;

        Ok(())
    }

    pub fn empty_page_data() -> Vec<u8> {
        vec![0; PageCache::get_page_size()]
    }

    /// Read the raw content of one page. Reading past the end of the
    /// file aborts the requesting transaction: the page was expected to
    /// exist.
    pub fn read_page_bytes(&self, pid: &BTreePageID) -> Result<Vec<u8>, OakError> {
        let page_size = PageCache::get_page_size();
        let start_pos = pid.page_index as usize * page_size;

        let mut file = self.get_file();
        let file_len = file.metadata()?.len() as usize;
        if start_pos + page_size > file_len {
            debug!(
                "read past the end of the file, pid: {}, file len: {}",
                pid, file_len
            );
            return Err(OakError::Aborted);
        }

        file.seek(SeekFrom::Start(start_pos as u64))?;
        let mut buf = vec![0; page_size];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_page_to_disk(&self, pid: &BTreePageID, data: &[u8]) -> OakResult {
        let start_pos = pid.page_index as usize * PageCache::get_page_size();

        let mut file = self.get_file();
        file.seek(SeekFrom::Start(start_pos as u64))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    pub fn write_empty_page_to_disk(&self, pid: &BTreePageID) -> OakResult {
        self.write_page_to_disk(pid, &Self::empty_page_data())
    }

    // Grow the file with zero-filled pages until `page_index` exists.
    fn extend_file_to(&self, page_index: u32) -> OakResult {
        let len = ((page_index as usize + 1) * PageCache::get_page_size()) as u64;
        let file = self.get_file();
        if file.metadata()?.len() < len {
            file.set_len(len)?;
        }
        Ok(())
    }

    /// Cut the last page off the file.
    fn truncate_last_page(&self) -> OakResult {
        let page_size = PageCache::get_page_size() as u64;
        let file = self.get_file();
        let len = file.metadata()?.len();
        file.set_len(len - page_size)?;
        drop(file);

        self.page_index.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    /// The count of pages in this table file, the root pointer page
    /// excluded.
    pub fn pages_count(&self) -> usize {
        let file_len = self.get_file().metadata().unwrap().len() as usize;
        file_len / PageCache::get_page_size() - 1
    }

    pub fn set_page_index(&self, i: u32) {
        self.page_index.store(i, Ordering::Relaxed);
    }
}

/// root management
impl BTreeTable {
    pub fn get_root_ptr_pid(&self) -> BTreePageID {
        BTreePageID::new(PageCategory::RootPointer, self.table_id, 0)
    }

    pub fn get_root_ptr_page(
        &self,
        tx: &Transaction,
        perm: Permission,
    ) -> ResultPod<BTreeRootPointerPage> {
        Database::page_cache().get_root_ptr_page(tx, perm, &self.get_root_ptr_pid())
    }

    /// The pid of the current root page. When the tree is empty, the
    /// returned pid has the root-pointer category.
    pub fn get_root_pid(&self, tx: &Transaction) -> Result<BTreePageID, OakError> {
        let root_ptr_rc = self.get_root_ptr_page(tx, Permission::ReadOnly)?;
        let mut root_pid = root_ptr_rc.rl().get_root_pid();
        root_pid.table_id = self.table_id;
        Ok(root_pid)
    }

    pub fn set_root_pid(&self, tx: &Transaction, root_pid: &BTreePageID) -> OakResult {
        let root_ptr_rc = self.get_root_ptr_page(tx, Permission::ReadWrite)?;
        root_ptr_rc.wl().set_root_pid(root_pid);
        Ok(())
    }
}

/// search implementation
impl BTreeTable {
    /// Find and lock the leaf page corresponding to the left-most page
    /// possibly containing the key `field`. Internal nodes along the
    /// path are locked with read-only permission; the leaf is locked
    /// with permission `perm`.
    ///
    /// On a separator equal to the search key the descent takes the
    /// **left** subtree; callers collect duplicates by walking right
    /// siblings at the leaf level.
    fn find_leaf_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        page_id: BTreePageID,
        search: &SearchFor,
    ) -> ResultPod<BTreeLeafPage> {
        match page_id.category {
            PageCategory::Leaf => {
                // get the page and return directly
                Database::page_cache().get_leaf_page(tx, perm, &page_id)
            }
            PageCategory::Internal => {
                let page_rc = Database::page_cache().get_internal_page(
                    tx,
                    Permission::ReadOnly,
                    &page_id,
                )?;
                let mut child_pid: Option<BTreePageID> = None;

                // borrow of page_rc start here
                {
                    let page = page_rc.rl();
                    let it = BTreeInternalPageIterator::new(&page);
                    let mut last_entry: Option<Entry> = None;
                    for e in it {
                        match search {
                            SearchFor::Key(key) => {
                                if e.get_key() >= *key {
                                    child_pid = Some(e.get_left_child());
                                    break;
                                }
                            }
                            SearchFor::LeftMost => {
                                child_pid = Some(e.get_left_child());
                                break;
                            }
                            SearchFor::RightMost => {
                                // keep going, we need the last entry
                            }
                        }
                        last_entry = Some(e);
                    }

                    if child_pid.is_none() {
                        // every separator was smaller (or we want the
                        // right-most subtree): descend right of the
                        // last entry
                        match last_entry {
                            Some(e) => {
                                child_pid = Some(e.get_right_child());
                            }
                            None => {
                                return Err(OakError::invalid(&format!(
                                    "internal page {} has no entries",
                                    page_id,
                                )));
                            }
                        }
                    }
                }
                // borrow of page_rc end here

                // search the child page recursively
                self.find_leaf_page(tx, perm, child_pid.unwrap(), search)
            }
            category => Err(OakError::invalid(&format!(
                "cannot search a {} page for a leaf",
                category,
            ))),
        }
    }

    /// The left-most leaf page (entry point of full scans).
    pub fn get_first_page(&self, tx: &Transaction, perm: Permission) -> ResultPod<BTreeLeafPage> {
        let root_pid = self.get_root_pid(tx)?;
        self.find_leaf_page(tx, perm, root_pid, &SearchFor::LeftMost)
    }

    /// The right-most leaf page (entry point of reverse scans).
    pub fn get_last_page(&self, tx: &Transaction, perm: Permission) -> ResultPod<BTreeLeafPage> {
        let root_pid = self.get_root_pid(tx)?;
        self.find_leaf_page(tx, perm, root_pid, &SearchFor::RightMost)
    }

    /// The leaf a search for `key` starts on.
    pub fn find_leaf_page_by_key(
        &self,
        tx: &Transaction,
        perm: Permission,
        key: &Cell,
    ) -> ResultPod<BTreeLeafPage> {
        let root_pid = self.get_root_pid(tx)?;
        self.find_leaf_page(tx, perm, root_pid, &SearchFor::Key(key.clone()))
    }

    /// The last tuple under the subtree rooted at `pid`.
    pub fn get_last_tuple(
        &self,
        tx: &Transaction,
        pid: &BTreePageID,
    ) -> Result<Option<WrappedTuple>, OakError> {
        match pid.category {
            PageCategory::Internal => {
                let page_rc =
                    Database::page_cache().get_internal_page(tx, Permission::ReadOnly, pid)?;

                let child_pid = {
                    let page = page_rc.rl();
                    let mut it = BTreeInternalPageIterator::new(&page);
                    match it.next_back() {
                        Some(e) => e.get_right_child(),
                        None => return Ok(None),
                    }
                };
                self.get_last_tuple(tx, &child_pid)
            }
            PageCategory::Leaf => {
                let page_rc =
                    Database::page_cache().get_leaf_page(tx, Permission::ReadOnly, pid)?;
                let page = page_rc.rl();
                let mut it = BTreeLeafPageIterator::new(&page);
                Ok(it.next_back())
            }
            category => Err(OakError::invalid(&format!(
                "cannot read tuples of a {} page",
                category,
            ))),
        }
    }
}

/// debug methods
impl BTreeTable {
    /// Print the tree structure to the debug log.
    ///
    /// `max_level` bounds the depth of the dump: 0 prints the root
    /// only, -1 prints everything.
    pub fn draw_tree(&self, max_level: i32) {
        if env::var("RUST_LOG").unwrap_or_default() != "debug" {
            return;
        }

        let tx = Transaction::new();

        let mut depiction = "\n\n----- PRINT TREE STRUCTURE START -----\n\n".to_string();

        depiction.push_str(&format!("root pointer: {}\n", self.get_root_ptr_pid()));

        if let Ok(root_pid) = self.get_root_pid(&tx) {
            depiction.push_str(&self.draw_subtree(&tx, &root_pid, 0, max_level));
        }

        depiction.push_str("\n\n----- PRINT TREE STRUCTURE END   -----\n\n");

        debug!("{}", depiction);
        tx.commit().unwrap();
    }

    fn draw_subtree(
        &self,
        tx: &Transaction,
        pid: &BTreePageID,
        level: usize,
        max_level: i32,
    ) -> String {
        match pid.category {
            PageCategory::Internal => self.draw_internal_node(tx, pid, level, max_level),
            PageCategory::Leaf => self.draw_leaf_node(tx, pid, level),
            _ => String::new(),
        }
    }

    fn draw_leaf_node(&self, tx: &Transaction, pid: &BTreePageID, level: usize) -> String {
        let mut depiction = String::new();

        let prefix = "   ".repeat(level);
        let page_rc = Database::page_cache()
            .get_leaf_page(tx, Permission::ReadOnly, pid)
            .unwrap();

        let page = page_rc.rl();
        depiction.push_str(&format!(
            "{} leaf: {} ({}/{} tuples) (left: {:?}, right: {:?})\n",
            prefix,
            page.get_pid(),
            page.tuples_count(),
            page.slot_count,
            page.get_left_pid(),
            page.get_right_pid(),
        ));

        let mut it = BTreeLeafPageIterator::new(&page);
        let child_prefix = "   ".repeat(level + 1);
        if let Some(first) = it.next() {
            depiction.push_str(&format!("{} first tuple: {}\n", child_prefix, first));
        }
        if let Some(last) = it.next_back() {
            depiction.push_str(&format!("{} last tuple:  {}\n", child_prefix, last));
        }

        depiction
    }

    fn draw_internal_node(
        &self,
        tx: &Transaction,
        pid: &BTreePageID,
        level: usize,
        max_level: i32,
    ) -> String {
        let mut depiction = String::new();

        let prefix = "   ".repeat(level);
        let page_rc = Database::page_cache()
            .get_internal_page(tx, Permission::ReadOnly, pid)
            .unwrap();

        // borrow of page_rc start here
        {
            let page = page_rc.rl();
            depiction.push_str(&format!(
                "{} internal: {} ({}/{} entries)\n",
                prefix,
                pid,
                page.entries_count(),
                page.get_entries_count_cap(),
            ));
            if max_level != -1 && level as i32 == max_level {
                return depiction;
            }
            let it = BTreeInternalPageIterator::new(&page);
            for (i, entry) in it.enumerate() {
                if i == 0 {
                    depiction.push_str(&self.draw_subtree(
                        tx,
                        &entry.get_left_child(),
                        level + 1,
                        max_level,
                    ));
                }
                depiction.push_str(&format!("{} key: {}\n", "   ".repeat(level + 1), entry.get_key()));
                depiction.push_str(&self.draw_subtree(
                    tx,
                    &entry.get_right_child(),
                    level + 1,
                    max_level,
                ));
            }
        }
        // borrow of page_rc end here

        depiction
    }

    /// Checks the integrity of the tree:
    /// - parent pointers
    /// - sibling pointers
    /// - key range invariants
    /// - occupancy invariants (if enabled)
    ///
    /// Panics on the first violation found.
    pub fn check_integrity(&self, check_occupancy: bool) {
        let tx = Transaction::new();

        let root_ptr_rc = self.get_root_ptr_page(&tx, Permission::ReadOnly).unwrap();
        let root_ptr_pid = root_ptr_rc.rl().get_pid();
        let root_pid = self.get_root_pid(&tx).unwrap();
        if root_pid.category == PageCategory::RootPointer {
            // the tree is empty
            tx.commit().unwrap();
            return;
        }

        let root_summary = self.check_sub_tree(
            &tx,
            &root_pid,
            &root_ptr_pid,
            None,
            None,
            check_occupancy,
            0,
        );
        assert!(
            root_summary.left_ptr.is_none(),
            "left pointer is not none: {:?}",
            root_summary.left_ptr,
        );
        assert!(
            root_summary.right_ptr.is_none(),
            "right pointer is not none: {:?}",
            root_summary.right_ptr,
        );

        tx.commit().unwrap();
    }

    fn check_sub_tree(
        &self,
        tx: &Transaction,
        pid: &BTreePageID,
        parent_pid: &BTreePageID,
        mut lower_bound: Option<Cell>,
        upper_bound: Option<Cell>,
        check_occupancy: bool,
        depth: usize,
    ) -> SubtreeSummary {
        match pid.category {
            PageCategory::Leaf => {
                let page_rc = Database::page_cache()
                    .get_leaf_page(tx, Permission::ReadOnly, pid)
                    .unwrap();
                let page = page_rc.rl();
                page.check_integrity(
                    parent_pid,
                    lower_bound,
                    upper_bound,
                    check_occupancy,
                    depth,
                );

                SubtreeSummary {
                    left_ptr: page.get_left_pid(),
                    right_ptr: page.get_right_pid(),

                    left_most_pid: Some(page.get_pid()),
                    right_most_pid: Some(page.get_pid()),

                    depth,
                }
            }

            PageCategory::Internal => {
                let page_rc = Database::page_cache()
                    .get_internal_page(tx, Permission::ReadOnly, pid)
                    .unwrap();
                let page = page_rc.rl();
                page.check_integrity(
                    parent_pid,
                    lower_bound.clone(),
                    upper_bound.clone(),
                    check_occupancy,
                    depth,
                );

                let mut it = BTreeInternalPageIterator::new(&page);
                let current = it.next().unwrap();
                let mut accumulation = self.check_sub_tree(
                    tx,
                    &current.get_left_child(),
                    pid,
                    lower_bound.clone(),
                    Some(current.get_key()),
                    check_occupancy,
                    depth + 1,
                );

                let mut last_entry = current;
                for entry in it {
                    let current_summary = self.check_sub_tree(
                        tx,
                        &entry.get_left_child(),
                        pid,
                        lower_bound,
                        Some(entry.get_key()),
                        check_occupancy,
                        depth + 1,
                    );
                    accumulation = accumulation.check_and_merge(&current_summary);

                    lower_bound = Some(entry.get_key());
                    last_entry = entry;
                }

                let last_right_summary = self.check_sub_tree(
                    tx,
                    &last_entry.get_right_child(),
                    pid,
                    lower_bound,
                    upper_bound,
                    check_occupancy,
                    depth + 1,
                );
                accumulation.check_and_merge(&last_right_summary)
            }

            // no other page types allowed inside the tree
            _ => panic!("invalid page category: {:?}", pid.category),
        }
    }
}

struct SubtreeSummary {
    /// The distance towards the root.
    depth: usize,

    left_ptr: Option<BTreePageID>,
    left_most_pid: Option<BTreePageID>,
    right_ptr: Option<BTreePageID>,
    right_most_pid: Option<BTreePageID>,
}

impl SubtreeSummary {
    fn check_and_merge(&mut self, right: &SubtreeSummary) -> SubtreeSummary {
        assert_eq!(self.depth, right.depth);
        assert_eq!(
            self.right_ptr, right.left_most_pid,
            "sibling chain broken, depth: {}, right_ptr: {:?}, left_most: {:?}",
            self.depth, self.right_ptr, right.left_most_pid,
        );
        assert_eq!(self.right_most_pid, right.left_ptr);

        SubtreeSummary {
            depth: self.depth,
            left_ptr: self.left_ptr,
            left_most_pid: self.left_most_pid,
            right_ptr: right.right_ptr,
            right_most_pid: right.right_most_pid,
        }
    }
}

/// Ordered full scan over the leaf chain. Double ended: the reverse
/// direction follows left-sibling pointers from the right-most leaf.
pub struct BTreeTableIterator<'t> {
    tx: &'t Transaction,

    page_rc: Pod<BTreeLeafPage>,
    last_page_rc: Pod<BTreeLeafPage>,
    page_it: BTreeLeafPageIteratorRc,
    last_page_it: BTreeLeafPageIteratorRc,
}

impl<'t> BTreeTableIterator<'t> {
    pub fn new(tx: &'t Transaction, table: &BTreeTable) -> Self {
        let page_rc = table.get_first_page(tx, Permission::ReadOnly).unwrap();
        let last_page_rc = table.get_last_page(tx, Permission::ReadOnly).unwrap();

        Self {
            tx,
            page_rc: page_rc.clone(),
            last_page_rc: last_page_rc.clone(),
            page_it: BTreeLeafPageIteratorRc::new(page_rc),
            last_page_it: BTreeLeafPageIteratorRc::new(last_page_rc),
        }
    }

    /// Restart the scan from both ends.
    pub fn rewind(&mut self, table: &BTreeTable) {
        let page_rc = table.get_first_page(self.tx, Permission::ReadOnly).unwrap();
        let last_page_rc = table.get_last_page(self.tx, Permission::ReadOnly).unwrap();

        self.page_rc = page_rc.clone();
        self.last_page_rc = last_page_rc.clone();
        self.page_it = BTreeLeafPageIteratorRc::new(page_rc);
        self.last_page_it = BTreeLeafPageIteratorRc::new(last_page_rc);
    }
}

impl Iterator for BTreeTableIterator<'_> {
    type Item = WrappedTuple;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(v) = self.page_it.next() {
                return Some(v);
            }

            let right = self.page_rc.rl().get_right_pid();
            match right {
                Some(right) => {
                    let sibling_rc = Database::page_cache()
                        .get_leaf_page(self.tx, Permission::ReadOnly, &right)
                        .unwrap();

                    self.page_rc = sibling_rc.clone();
                    self.page_it = BTreeLeafPageIteratorRc::new(sibling_rc);
                }
                None => {
                    return None;
                }
            }
        }
    }
}

impl DoubleEndedIterator for BTreeTableIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(v) = self.last_page_it.next_back() {
                return Some(v);
            }

            let left = self.last_page_rc.rl().get_left_pid();
            match left {
                Some(left) => {
                    let sibling_rc = Database::page_cache()
                        .get_leaf_page(self.tx, Permission::ReadOnly, &left)
                        .unwrap();

                    self.last_page_rc = sibling_rc.clone();
                    self.last_page_it = BTreeLeafPageIteratorRc::new(sibling_rc);
                }
                None => {
                    return None;
                }
            }
        }
    }
}

/// Predicated index scan.
///
/// `Equals` and the `GreaterThan*` operators open on the left-most leaf
/// possibly containing the operand and walk rightward; the `LessThan*`
/// operators open on the left-most leaf of the tree and stop at the
/// first failing tuple (keys are monotone along the chain);
/// `NotEquals` scans everything.
pub struct BTreeTableSearchIterator<'t> {
    tx: &'t Transaction,

    current_page_rc: Pod<BTreeLeafPage>,
    page_it: BTreeLeafPageIteratorRc,
    predicate: Predicate,
    key_field: usize,
}

impl<'t> BTreeTableSearchIterator<'t> {
    pub fn new(tx: &'t Transaction, table: &BTreeTable, index_predicate: &Predicate) -> Self {
        let start_rc = match index_predicate.op {
            Op::Equals | Op::GreaterThan | Op::GreaterThanOrEq => table
                .find_leaf_page_by_key(tx, Permission::ReadOnly, &index_predicate.field)
                .unwrap(),
            Op::LessThan | Op::LessThanOrEq | Op::NotEquals => {
                table.get_first_page(tx, Permission::ReadOnly).unwrap()
            }
        };

        Self {
            tx,
            current_page_rc: start_rc.clone(),
            page_it: BTreeLeafPageIteratorRc::new(start_rc),
            predicate: index_predicate.clone(),
            key_field: table.key_field,
        }
    }
}

impl Iterator for BTreeTableSearchIterator<'_> {
    type Item = WrappedTuple;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let tuple = self.page_it.next();
            match tuple {
                Some(t) => {
                    let key = t.get_cell(self.key_field);
                    match self.predicate.op {
                        Op::Equals => {
                            if key == self.predicate.field {
                                return Some(t);
                            } else if key > self.predicate.field {
                                // keys are sorted: no further match
                                // can exist
                                return None;
                            }
                        }
                        Op::LessThan | Op::LessThanOrEq => {
                            if self.predicate.matches(&key) {
                                return Some(t);
                            }
                            return None;
                        }
                        _ => {
                            if self.predicate.matches(&key) {
                                return Some(t);
                            }
                        }
                    }
                }
                None => {
                    // this page is exhausted, continue on the right
                    // sibling
                    let right = self.current_page_rc.rl().get_right_pid();
                    match right {
                        Some(pid) => {
                            let rc = Database::page_cache()
                                .get_leaf_page(self.tx, Permission::ReadOnly, &pid)
                                .unwrap();
                            self.current_page_rc = rc.clone();
                            self.page_it = BTreeLeafPageIteratorRc::new(rc);
                        }
                        None => {
                            return None;
                        }
                    }
                }
            }
        }
    }
}
