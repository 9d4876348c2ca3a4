use std::{fmt, io::Cursor};

use bit_vec::BitVec;

use crate::{
    btree::{consts::INDEX_SIZE, page_cache::PageCache},
    error::OakError,
    io::{decode_bitmap, encode_bitmap, read_exact, read_into, ByteWriter},
    storage::{
        schema::{get_type_length, Schema, Type},
        tuple::Cell,
    },
    utils::ceil_div,
};

use super::{BTreeBasePage, BTreePage, BTreePageID, PageCategory, EMPTY_PAGE_ID};

/// An internal page: `m` separator keys dividing `m + 1` children.
///
/// Slot 0 is reserved: it carries the leftmost child pointer and no
/// key (a node with `m` keys has `m + 1` child pointers).
///
/// On disk: parent pointer (4B), child kind (1B), slot bitmap, `m`
/// keys (slot 0's key bytes stay zero), `m + 1` child page numbers
/// (4B each), zero padding.
pub struct BTreeInternalPage {
    page: BTreeBasePage,

    keys: Vec<Cell>,

    /// note: the left child of the nth `entry` is not always located in
    /// the n-1 slot, but the nearest left slot which has been marked
    /// as used.
    children: Vec<BTreePageID>,

    /// Category shared by every child of this page. Meaningful only
    /// while at least one child slot is used.
    child_category: PageCategory,

    slot_count: usize,

    // indicate slots' status: true means occupied, false means empty
    header: BitVec<u32>,

    tuple_scheme: Schema,

    key_field: usize,
}

impl std::ops::Deref for BTreeInternalPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl std::ops::DerefMut for BTreeInternalPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl BTreeInternalPage {
    /// Retrieve the maximum number of entries (separator keys) this
    /// page can hold.
    pub fn get_entries_cap(key_size: usize) -> usize {
        let bits_per_entry_including_header = key_size * 8 + INDEX_SIZE * 8 + 1;
        // extra bits are: one parent pointer, 1 byte for the child page
        // category, one extra child pointer (a node with m entries has
        // m+1 child pointers), 1 bit for the extra header slot
        let extra_bits = 2 * INDEX_SIZE * 8 + 8 + 1;
        (PageCache::get_page_size() * 8 - extra_bits) / bits_per_entry_including_header
    }

    fn calculate_header_size(slot_count: usize) -> usize {
        ceil_div(slot_count, 8)
    }

    fn default_key(t: Type) -> Cell {
        match t {
            Type::Int => Cell::Int(0),
            Type::Char(_) => Cell::Chars(String::new()),
        }
    }

    fn key_type(&self) -> Type {
        self.tuple_scheme.get_field_type(self.key_field)
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn get_entries_count_cap(&self) -> usize {
        self.slot_count - 1
    }

    pub fn empty_slots_count(&self) -> usize {
        let mut count = 0;
        // start from 1 because the first key slot is not used
        // since a node with m keys has m+1 pointers
        for i in 1..self.slot_count {
            if !self.is_slot_used(i) {
                count += 1
            }
        }
        count
    }

    pub fn entries_count(&self) -> usize {
        self.slot_count - self.empty_slots_count() - 1
    }

    pub fn children_count(&self) -> usize {
        match self.entries_count() {
            0 => 0,
            n => n + 1,
        }
    }

    /// A page is stable when it satisfies the minimum-occupancy
    /// invariant. The root is exempt.
    ///
    /// The bound allows one entry of slack: splitting a full page of
    /// `m` entries promotes the middle entry, leaving `floor(m/2)` on
    /// one side, which sits one below `ceil(m/2)` when `m` is odd.
    pub fn stable(&self) -> bool {
        if self.get_parent_pid().category == PageCategory::RootPointer {
            return true;
        }

        let entries_cap = self.slot_count - 1;
        self.entries_count() + 1 >= ceil_div(entries_cap, 2)
    }

    /// Returns true if associated slot on this page is filled.
    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    pub fn get_child_category(&self) -> PageCategory {
        self.child_category
    }

    pub fn get_entry(&self, index: usize) -> Option<Entry> {
        if index == 0 || !self.is_slot_used(index) {
            return None;
        }

        // the left child is the nearest used slot on the left
        let mut left = 0;
        for i in (0..index).rev() {
            if self.is_slot_used(i) {
                left = i;
                break;
            }
        }

        let mut e = Entry::new(
            self.keys[index].clone(),
            &self.children[left],
            &self.children[index],
        );
        e.set_record_id(index);
        Some(e)
    }

    /// Find the entry whose children match the given pids. Used to
    /// locate the separator between two sibling pages.
    pub fn get_entry_by_children(
        &self,
        left_pid: &BTreePageID,
        right_pid: &BTreePageID,
    ) -> Option<Entry> {
        let it = BTreeInternalPageIterator::new(self);
        for e in it {
            if e.get_left_child() == *left_pid && e.get_right_child() == *right_pid {
                return Some(e);
            }
        }
        None
    }

    /// The entry whose right child is `pid` (giving `pid`'s left
    /// sibling), if any.
    pub fn get_entry_by_right_child(&self, pid: &BTreePageID) -> Option<Entry> {
        let it = BTreeInternalPageIterator::new(self);
        for e in it {
            if e.get_right_child() == *pid {
                return Some(e);
            }
        }
        None
    }

    /// The entry whose left child is `pid` (giving `pid`'s right
    /// sibling), if any.
    pub fn get_entry_by_left_child(&self, pid: &BTreePageID) -> Option<Entry> {
        let it = BTreeInternalPageIterator::new(self);
        for e in it {
            if e.get_left_child() == *pid {
                return Some(e);
            }
        }
        None
    }

    fn check_entry(&self, e: &Entry) -> Result<(), OakError> {
        let left = e.get_left_child();
        let right = e.get_right_child();

        if left.category != right.category {
            return Err(OakError::invalid(&format!(
                "entry children have mixed categories: {} vs {}",
                left, right,
            )));
        }
        if left.get_table_id() != self.get_pid().get_table_id()
            || right.get_table_id() != self.get_pid().get_table_id()
        {
            return Err(OakError::invalid(&format!(
                "entry children belong to a foreign table: {}",
                e,
            )));
        }
        if self.entries_count() > 0 && left.category != self.child_category {
            return Err(OakError::invalid(&format!(
                "entry child category {} does not match page children ({})",
                left.category, self.child_category,
            )));
        }
        Ok(())
    }

    pub fn insert_entry(&mut self, e: &Entry) -> Result<(), OakError> {
        self.check_entry(e)?;

        if self.empty_slots_count() == 0 {
            return Err(OakError::invalid(&format!(
                "no empty slots on page {}, split it first",
                self.get_pid(),
            )));
        }

        // if this is the first entry, add it and return
        if self.entries_count() == 0 {
            self.children[0] = e.get_left_child();
            self.children[1] = e.get_right_child();
            self.keys[1] = e.get_key();
            self.child_category = e.get_left_child().category;
            self.mark_slot_status(0, true);
            self.mark_slot_status(1, true);
            return Ok(());
        }

        // find the first empty slot, start from 1
        let mut empty_slot = 0;
        for i in 1..self.slot_count {
            if !self.is_slot_used(i) {
                empty_slot = i;
                break;
            }
        }

        // find the child pointer matching the left or right child in
        // this entry
        let mut slot_just_ahead = usize::MAX;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                continue;
            }

            // case 1: the new entry goes just after the current one
            // (their left children match)
            if self.children[i] == e.get_left_child() {
                slot_just_ahead = i;
                break;
            }

            // case 2: the new entry splits the current one open, so the
            // current entry keeps the new entry's left child as its
            // right child
            if self.children[i] == e.get_right_child() {
                slot_just_ahead = i;
                self.children[i] = e.get_left_child();
                break;
            }
        }

        if slot_just_ahead == usize::MAX {
            return Err(OakError::invalid(&format!(
                "no slot found for entry {}, pid: {}, entries count: {}",
                e,
                self.get_pid(),
                self.entries_count(),
            )));
        }

        // shift entries back or forward to fill the empty slot and make
        // room for the new entry while keeping entries sorted
        let good_slot: usize;
        if empty_slot < slot_just_ahead {
            for i in empty_slot..slot_just_ahead {
                self.move_entry(i + 1, i);
            }
            good_slot = slot_just_ahead;
        } else {
            for i in ((slot_just_ahead + 1)..empty_slot).rev() {
                self.move_entry(i, i + 1);
            }
            good_slot = slot_just_ahead + 1;
        }

        self.keys[good_slot] = e.get_key();
        self.children[good_slot] = e.get_right_child();
        self.mark_slot_status(good_slot, true);
        Ok(())
    }

    fn move_entry(&mut self, from: usize, to: usize) {
        if self.is_slot_used(from) && !self.is_slot_used(to) {
            self.keys[to] = self.keys[from].clone();

            // note that we don't need to touch the left child slot: the
            // left child is the nearest *used* slot, which is exactly
            // what the move preserves
            self.children[to] = self.children[from];

            self.mark_slot_status(from, false);
            self.mark_slot_status(to, true);
        }
    }

    /// Delete the entry: its key and its right child pointer. The left
    /// child stays reachable through the preceding slot.
    pub fn delete_key_and_right_child(&mut self, record_id: usize) {
        self.mark_slot_status(record_id, false);
    }

    /// Delete the entry's key and its *left* child pointer; the right
    /// child takes over the nearest used slot on the left.
    pub fn delete_key_and_left_child(&mut self, record_id: usize) {
        for i in (0..record_id).rev() {
            if self.is_slot_used(i) {
                self.children[i] = self.children[record_id];
                self.mark_slot_status(record_id, false);
                return;
            }
        }
    }

    /// Rewrite the key (and children) of an existing entry in place.
    pub fn update_entry(&mut self, entry: &Entry) {
        let record_id = entry.get_record_id();

        // set left child
        for i in (0..record_id).rev() {
            if self.is_slot_used(i) {
                self.children[i] = entry.get_left_child();
                break;
            }
        }

        self.children[record_id] = entry.get_right_child();
        self.keys[record_id] = entry.get_key();
    }

    pub fn get_first_child_pid(&self) -> BTreePageID {
        let mut it = BTreeInternalPageIterator::new(self);
        it.next().unwrap().get_left_child()
    }

    pub fn get_last_child_pid(&self) -> BTreePageID {
        let mut it = BTreeInternalPageIterator::new(self);
        it.next_back().unwrap().get_right_child()
    }

    pub fn check_integrity(
        &self,
        parent_pid: &BTreePageID,
        lower_bound: Option<Cell>,
        upper_bound: Option<Cell>,
        check_occupancy: bool,
        depth: usize,
    ) {
        assert_eq!(self.get_pid().category, PageCategory::Internal);
        assert_eq!(&self.get_parent_pid(), parent_pid);

        let mut previous = lower_bound;
        let it = BTreeInternalPageIterator::new(self);
        for e in it {
            if let Some(previous) = &previous {
                assert!(
                    *previous <= e.get_key(),
                    "entries are not in order, previous: {}, current: {}, pid: {}",
                    previous,
                    e,
                    self.get_pid(),
                );
            }
            previous = Some(e.get_key());
        }

        if let (Some(upper_bound), Some(previous)) = (upper_bound, previous) {
            assert!(
                previous <= upper_bound,
                "the last entry exceeds upper bound, last: {}, upper bound: {}",
                previous,
                upper_bound,
            );
        }

        if check_occupancy && depth > 0 {
            assert!(
                self.entries_count() + 1 >= ceil_div(self.get_entries_count_cap(), 2),
                "internal {} under minimum occupancy: {}/{}",
                self.get_pid(),
                self.entries_count(),
                self.get_entries_count_cap(),
            );
        }
    }
}

impl BTreePage for BTreeInternalPage {
    fn new(pid: &BTreePageID, bytes: &[u8], scheme: &Schema, key_field: usize) -> Self {
        let key_type = scheme.get_field_type(key_field);
        let key_size = get_type_length(key_type);
        let slot_count = Self::get_entries_cap(key_size) + 1;
        let header_size = Self::calculate_header_size(slot_count);

        let mut reader = Cursor::new(bytes);
        let parent_page_index: u32 = read_into(&mut reader);
        let child_kind_code: u8 = read_into(&mut reader);
        let header = decode_bitmap(&read_exact(&mut reader, header_size), slot_count);

        // slot 0 carries no key on disk
        let mut keys = Vec::with_capacity(slot_count);
        keys.push(Self::default_key(key_type));
        for _ in 1..slot_count {
            let block = read_exact(&mut reader, key_size);
            keys.push(Cell::read_from(&mut Cursor::new(block), key_type));
        }

        // an all-zero kind byte appears on freshly formatted pages; the
        // category only matters once children exist
        let child_category = match child_kind_code {
            0 => PageCategory::Leaf,
            code => PageCategory::from_byte(code),
        };

        let mut children = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let index: u32 = read_into(&mut reader);
            children.push(BTreePageID::new(
                child_category,
                pid.get_table_id(),
                index,
            ));
        }

        let mut base = BTreeBasePage::new(pid);
        base.set_parent_page_index(parent_page_index);

        let mut page = Self {
            page: base,
            keys,
            children,
            child_category,
            slot_count,
            header,
            tuple_scheme: scheme.clone(),
            key_field,
        };
        page.set_before_image();
        page
    }

    fn get_pid(&self) -> BTreePageID {
        self.page.get_pid()
    }

    fn get_parent_pid(&self) -> BTreePageID {
        self.page.get_parent_pid()
    }

    fn set_parent_pid(&mut self, pid: &BTreePageID) {
        self.page.set_parent_pid(pid)
    }

    fn get_page_data(&self) -> Vec<u8> {
        let key_type = self.key_type();
        let key_size = get_type_length(key_type);

        let mut writer = ByteWriter::new();
        writer.write(&self.page.get_parent_page_index());

        let child_kind_code = if self.children_count() == 0 {
            0
        } else {
            self.child_category.to_byte()
        };
        writer.write(&child_kind_code);
        writer.write_bytes(&encode_bitmap(&self.header));

        for i in 1..self.slot_count {
            if self.is_slot_used(i) {
                let mut cell_writer = ByteWriter::new();
                self.keys[i].encode_to(&mut cell_writer, key_type);
                writer.write_bytes(&cell_writer.to_bytes());
            } else {
                writer.write_bytes(&vec![0; key_size]);
            }
        }

        for i in 0..self.slot_count {
            if self.is_slot_used(i) {
                writer.write(&self.children[i].page_index);
            } else {
                writer.write(&EMPTY_PAGE_ID);
            }
        }

        writer.to_padded_bytes(PageCache::get_page_size())
    }

    fn set_before_image(&mut self) {
        let data = self.get_page_data();
        self.page.set_old_data(data);
    }

    fn get_before_image(&self) -> Vec<u8> {
        self.page.get_old_data()
    }
}

/// All of the entries or tuples in the left child page should be less
/// than or equal to the key, and all of the entries or tuples in the
/// right child page should be greater than or equal to the key.
#[derive(Clone)]
pub struct Entry {
    key: Cell,
    left: BTreePageID,
    right: BTreePageID,

    // record position in the page
    record_id: usize,
}

impl Entry {
    pub fn new(key: Cell, left: &BTreePageID, right: &BTreePageID) -> Self {
        Self {
            key,
            left: *left,
            right: *right,

            record_id: 0,
        }
    }

    pub fn set_record_id(&mut self, record_id: usize) {
        self.record_id = record_id;
    }

    pub fn get_record_id(&self) -> usize {
        self.record_id
    }

    pub fn get_key(&self) -> Cell {
        self.key.clone()
    }

    pub fn set_key(&mut self, key: Cell) {
        self.key = key;
    }

    pub fn get_left_child(&self) -> BTreePageID {
        self.left
    }

    pub fn get_right_child(&self) -> BTreePageID {
        self.right
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.key, self.left, self.right)
    }
}

pub struct BTreeInternalPageIterator<'page> {
    page: &'page BTreeInternalPage,

    cursor: usize,
    left_child_position: usize,

    reverse_cursor: usize,
    right_child_position: usize,
}

impl<'page> BTreeInternalPageIterator<'page> {
    pub fn new(page: &'page BTreeInternalPage) -> Self {
        // locate the rightmost used slot; 0 when the page is empty
        let mut right_child_position = page.slot_count;
        loop {
            right_child_position -= 1;
            if right_child_position == 0 || page.is_slot_used(right_child_position) {
                break;
            }
        }

        Self {
            page,

            cursor: 0,
            left_child_position: 0,

            reverse_cursor: right_child_position,
            right_child_position,
        }
    }
}

impl Iterator for BTreeInternalPageIterator<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.cursor += 1;
            let cursor = self.cursor;

            if cursor >= self.page.slot_count {
                return None;
            }

            if !self.page.is_slot_used(cursor) {
                continue;
            }
            let mut e = Entry::new(
                self.page.keys[cursor].clone(),
                &self.page.children[self.left_child_position],
                &self.page.children[cursor],
            );
            e.set_record_id(cursor);

            // set left child position for next iteration
            self.left_child_position = cursor;

            return Some(e);
        }
    }
}

impl DoubleEndedIterator for BTreeInternalPageIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(left_index) = self.reverse_cursor.checked_sub(1) {
                self.reverse_cursor = left_index;
                if !self.page.is_slot_used(left_index) {
                    continue;
                }

                let mut e = Entry::new(
                    self.page.keys[self.right_child_position].clone(),
                    &self.page.children[left_index],
                    &self.page.children[self.right_child_position],
                );
                e.set_record_id(self.right_child_position);

                // set right child position for next iteration
                self.right_child_position = left_index;

                return Some(e);
            } else {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::small_int_schema;

    fn empty_internal(scheme: &Schema) -> BTreeInternalPage {
        let pid = BTreePageID::new(PageCategory::Internal, 1, 5);
        let blank = vec![0; PageCache::get_page_size()];
        BTreeInternalPage::new(&pid, &blank, scheme, 0)
    }

    fn leaf_pid(index: u32) -> BTreePageID {
        BTreePageID::new(PageCategory::Leaf, 1, index)
    }

    #[test]
    fn test_capacity() {
        // int keys: 65 bits per entry including its header bit
        assert_eq!(BTreeInternalPage::get_entries_cap(4), 503);
    }

    #[test]
    fn test_insert_and_iterate() {
        let scheme = small_int_schema(2, "");
        let mut page = empty_internal(&scheme);
        assert_eq!(page.entries_count(), 0);

        page.insert_entry(&Entry::new(Cell::Int(10), &leaf_pid(1), &leaf_pid(2)))
            .unwrap();
        page.insert_entry(&Entry::new(Cell::Int(20), &leaf_pid(2), &leaf_pid(3)))
            .unwrap();
        page.insert_entry(&Entry::new(Cell::Int(30), &leaf_pid(3), &leaf_pid(4)))
            .unwrap();

        assert_eq!(page.entries_count(), 3);
        assert_eq!(page.children_count(), 4);

        let entries: Vec<Entry> = BTreeInternalPageIterator::new(&page).collect();
        let keys: Vec<Cell> = entries.iter().map(|e| e.get_key()).collect();
        assert_eq!(keys, vec![Cell::Int(10), Cell::Int(20), Cell::Int(30)]);
        assert_eq!(entries[0].get_left_child(), leaf_pid(1));
        assert_eq!(entries[2].get_right_child(), leaf_pid(4));

        assert_eq!(page.get_first_child_pid(), leaf_pid(1));
        assert_eq!(page.get_last_child_pid(), leaf_pid(4));
    }

    #[test]
    fn test_mixed_child_categories_rejected() {
        let scheme = small_int_schema(2, "");
        let mut page = empty_internal(&scheme);

        let internal_child = BTreePageID::new(PageCategory::Internal, 1, 9);
        let e = Entry::new(Cell::Int(1), &leaf_pid(1), &internal_child);
        assert!(page.insert_entry(&e).is_err());

        page.insert_entry(&Entry::new(Cell::Int(10), &leaf_pid(1), &leaf_pid(2)))
            .unwrap();
        let foreign = Entry::new(
            Cell::Int(20),
            &BTreePageID::new(PageCategory::Internal, 1, 2),
            &BTreePageID::new(PageCategory::Internal, 1, 3),
        );
        assert!(page.insert_entry(&foreign).is_err());
    }

    #[test]
    fn test_round_trip() {
        let scheme = small_int_schema(2, "");
        let mut page = empty_internal(&scheme);

        for i in 1..40u32 {
            page.insert_entry(&Entry::new(
                Cell::Int((i * 10) as i32),
                &leaf_pid(i),
                &leaf_pid(i + 1),
            ))
            .unwrap();
        }
        page.set_parent_pid(&BTreePageID::new(PageCategory::Internal, 1, 77));

        let data = page.get_page_data();
        assert_eq!(data.len(), PageCache::get_page_size());

        let decoded = BTreeInternalPage::new(&page.get_pid(), &data, &scheme, 0);
        assert_eq!(decoded.entries_count(), 39);
        assert_eq!(decoded.get_child_category(), PageCategory::Leaf);
        assert_eq!(decoded.get_parent_pid(), page.get_parent_pid());
        assert_eq!(decoded.get_first_child_pid(), leaf_pid(1));
        assert_eq!(decoded.get_last_child_pid(), leaf_pid(40));
        assert_eq!(decoded.get_page_data(), data);
    }

    #[test]
    fn test_delete_and_reinsert() {
        let scheme = small_int_schema(2, "");
        let mut page = empty_internal(&scheme);

        page.insert_entry(&Entry::new(Cell::Int(10), &leaf_pid(1), &leaf_pid(2)))
            .unwrap();
        page.insert_entry(&Entry::new(Cell::Int(20), &leaf_pid(2), &leaf_pid(3)))
            .unwrap();

        let e = page.get_entry_by_right_child(&leaf_pid(3)).unwrap();
        page.delete_key_and_right_child(e.get_record_id());
        assert_eq!(page.entries_count(), 1);
        assert_eq!(page.get_last_child_pid(), leaf_pid(2));

        page.insert_entry(&Entry::new(Cell::Int(15), &leaf_pid(2), &leaf_pid(5)))
            .unwrap();
        assert_eq!(page.get_last_child_pid(), leaf_pid(5));
    }
}
