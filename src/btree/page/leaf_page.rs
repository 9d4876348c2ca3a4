use std::io::Cursor;

use bit_vec::BitVec;
use log::debug;

use crate::{
    btree::page_cache::PageCache,
    io::{decode_bitmap, encode_bitmap, read_exact, read_into, ByteWriter, Encodeable},
    storage::{
        schema::Schema,
        tuple::{Cell, Tuple, WrappedTuple},
    },
    types::Pod,
    utils::{ceil_div, HandyRwLock},
};

use super::{BTreeBasePage, BTreePage, BTreePageID, PageCategory, EMPTY_PAGE_ID};

/// A leaf page: a sorted run of tuples plus the sibling links that
/// chain all leaves into one ordered, doubly linked list.
///
/// On disk: parent pointer (4B), left sibling (4B), right sibling (4B),
/// slot bitmap, tuples, zero padding.
#[derive(Debug)]
pub struct BTreeLeafPage {
    page: BTreeBasePage,

    pub slot_count: usize,

    // indicate slots' status: true means occupied, false means empty
    header: BitVec<u32>,

    // all tuples (include empty tuples)
    tuples: Vec<Tuple>,

    pub tuple_scheme: Schema,

    // use a bare index instead of Option<BTreePageID> to reduce the
    // memory footprint
    right_sibling_index: u32,
    left_sibling_index: u32,

    key_field: usize,
}

impl std::ops::Deref for BTreeLeafPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl std::ops::DerefMut for BTreeLeafPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.page
    }
}

impl BTreeLeafPage {
    /// Retrieve the maximum number of tuples this page can hold.
    pub fn calculate_slots_count(scheme: &Schema) -> usize {
        let bits_per_tuple_including_header = scheme.get_size() * 8 + 1;
        // extra bytes are: left sibling pointer, right sibling pointer,
        // parent pointer
        let index_size: usize = 4;
        let extra_bits = 3 * index_size * 8;
        (PageCache::get_page_size() * 8 - extra_bits) / bits_per_tuple_including_header
    }

    /// Size of the slot bitmap, in bytes.
    pub fn calculate_header_size(slot_count: usize) -> usize {
        ceil_div(slot_count, 8)
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn empty_slots_count(&self) -> usize {
        let mut count = 0;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                count += 1;
            }
        }
        count
    }

    /// Returns the number of tuples currently stored on this page
    pub fn tuples_count(&self) -> usize {
        self.slot_count - self.empty_slots_count()
    }

    /// A page is stable when it satisfies the minimum-occupancy
    /// invariant. The root is exempt.
    pub fn stable(&self) -> bool {
        if self.get_parent_pid().category == PageCategory::RootPointer {
            return true;
        }

        let max_empty_slots = self.slot_count - ceil_div(self.slot_count, 2);
        self.empty_slots_count() <= max_empty_slots
    }

    pub fn set_right_pid(&mut self, pid: Option<BTreePageID>) {
        match pid {
            Some(pid) => self.right_sibling_index = pid.page_index,
            None => self.right_sibling_index = EMPTY_PAGE_ID,
        }
    }

    pub fn get_right_pid(&self) -> Option<BTreePageID> {
        if self.right_sibling_index == EMPTY_PAGE_ID {
            return None;
        }
        Some(BTreePageID::new(
            PageCategory::Leaf,
            self.get_pid().get_table_id(),
            self.right_sibling_index,
        ))
    }

    pub fn set_left_pid(&mut self, pid: Option<BTreePageID>) {
        match pid {
            Some(pid) => self.left_sibling_index = pid.page_index,
            None => self.left_sibling_index = EMPTY_PAGE_ID,
        }
    }

    pub fn get_left_pid(&self) -> Option<BTreePageID> {
        if self.left_sibling_index == EMPTY_PAGE_ID {
            return None;
        }
        Some(BTreePageID::new(
            PageCategory::Leaf,
            self.get_pid().get_table_id(),
            self.left_sibling_index,
        ))
    }

    /// The key of the tuple in `slot_index`.
    pub fn get_key(&self, slot_index: usize) -> Cell {
        self.tuples[slot_index].get_cell(self.key_field)
    }

    /// Adds the specified tuple to the page such that all records
    /// remain in sorted order on the key field.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Result<(), crate::error::OakError> {
        // find the first empty slot
        let mut first_empty_slot: i64 = -1;
        for i in 0..self.slot_count {
            if !self.is_slot_used(i) {
                first_empty_slot = i as i64;
                break;
            }
        }

        if first_empty_slot == -1 {
            return Err(crate::error::OakError::invalid(&format!(
                "no empty slot on page {}, split it first",
                self.get_pid(),
            )));
        }

        // Find the last key less than the key being inserted.
        //
        // -1 indicates there is no such key, so the tuple should be
        // inserted in slot 0 (-1 + 1).
        let key = tuple.get_cell(self.key_field);
        let mut last_less_slot: i64 = -1;
        for i in 0..self.slot_count {
            if self.is_slot_used(i) {
                if self.get_key(i) < key {
                    last_less_slot = i as i64;
                } else {
                    break;
                }
            }
        }

        // shift records back or forward to fill the empty slot and make
        // room for the new record while keeping records sorted
        let good_slot: usize;
        if first_empty_slot < last_less_slot {
            for i in first_empty_slot..last_less_slot {
                self.move_tuple((i + 1) as usize, i as usize);
            }
            good_slot = last_less_slot as usize;
        } else {
            for i in ((last_less_slot + 1)..first_empty_slot).rev() {
                self.move_tuple(i as usize, (i + 1) as usize);
            }
            good_slot = (last_less_slot + 1) as usize;
        }

        self.tuples[good_slot] = tuple.clone();
        self.mark_slot_status(good_slot, true);

        debug!(
            "tuple inserted into slot {}, first empty: {}, last less: {}",
            good_slot, first_empty_slot, last_less_slot
        );
        Ok(())
    }

    // Move a tuple from one slot to another slot, destination must be
    // empty
    fn move_tuple(&mut self, from: usize, to: usize) {
        if !self.is_slot_used(from) {
            return;
        }

        self.tuples[to] = self.tuples[from].clone();
        self.mark_slot_status(to, true);
        self.mark_slot_status(from, false);
    }

    pub fn get_tuple(&self, slot_index: usize) -> Option<Tuple> {
        if self.is_slot_used(slot_index) {
            return Some(self.tuples[slot_index].clone());
        }
        None
    }

    pub fn delete_tuple(&mut self, slot_index: usize) {
        self.mark_slot_status(slot_index, false);
    }

    /// Returns true if associated slot on this page is filled.
    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    pub fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    pub fn check_integrity(
        &self,
        parent_pid: &BTreePageID,
        lower_bound: Option<Cell>,
        upper_bound: Option<Cell>,
        check_occupancy: bool,
        depth: usize,
    ) {
        assert_eq!(self.get_pid().category, PageCategory::Leaf);
        assert_eq!(&self.get_parent_pid(), parent_pid);

        let mut previous = lower_bound;
        let it = BTreeLeafPageIterator::new(self);
        for tuple in it {
            let key = tuple.get_cell(self.key_field);
            if let Some(previous) = &previous {
                assert!(
                    *previous <= key,
                    "leaf tuples out of order, previous: {}, current: {}, pid: {}",
                    previous,
                    key,
                    self.get_pid(),
                );
            }
            previous = Some(key);
        }

        if let (Some(upper_bound), Some(previous)) = (upper_bound, previous) {
            assert!(
                previous <= upper_bound,
                "the last tuple exceeds upper bound, last: {}, upper bound: {}",
                previous,
                upper_bound,
            );
        }

        if check_occupancy && depth > 0 {
            assert!(
                self.tuples_count() >= ceil_div(self.get_slots_count(), 2),
                "leaf {} under minimum occupancy: {}/{}",
                self.get_pid(),
                self.tuples_count(),
                self.get_slots_count(),
            );
        }
    }
}

impl BTreePage for BTreeLeafPage {
    fn new(pid: &BTreePageID, bytes: &[u8], scheme: &Schema, key_field: usize) -> Self {
        let slot_count = Self::calculate_slots_count(scheme);
        let header_size = Self::calculate_header_size(slot_count);
        let tuple_size = scheme.get_size();

        let mut reader = Cursor::new(bytes);
        let parent_page_index: u32 = read_into(&mut reader);
        let left_sibling_index: u32 = read_into(&mut reader);
        let right_sibling_index: u32 = read_into(&mut reader);
        let header = decode_bitmap(&read_exact(&mut reader, header_size), slot_count);

        let mut tuples = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let block = read_exact(&mut reader, tuple_size);
            tuples.push(Tuple::read_from(scheme, &block));
        }

        let mut base = BTreeBasePage::new(pid);
        base.set_parent_page_index(parent_page_index);

        let mut page = Self {
            page: base,
            slot_count,
            header,
            tuples,
            tuple_scheme: scheme.clone(),
            right_sibling_index,
            left_sibling_index,
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
        let tuple_size = self.tuple_scheme.get_size();

        let mut writer = ByteWriter::new();
        writer.write(&self.page.get_parent_page_index());
        writer.write(&self.left_sibling_index);
        writer.write(&self.right_sibling_index);
        writer.write_bytes(&encode_bitmap(&self.header));

        for i in 0..self.slot_count {
            if self.is_slot_used(i) {
                writer.write_bytes(&self.tuples[i].encode());
            } else {
                // unused slots are zero filled
                writer.write_bytes(&vec![0; tuple_size]);
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

pub struct BTreeLeafPageIterator<'page> {
    page: &'page BTreeLeafPage,
    cursor: i64,
    reverse_cursor: i64,
}

impl<'page> BTreeLeafPageIterator<'page> {
    pub fn new(page: &'page BTreeLeafPage) -> Self {
        Self {
            page,
            cursor: -1,
            reverse_cursor: page.slot_count as i64,
        }
    }
}

impl Iterator for BTreeLeafPageIterator<'_> {
    type Item = WrappedTuple;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.cursor += 1;
            if self.cursor >= self.reverse_cursor {
                return None;
            }

            let cursor = self.cursor as usize;
            if self.page.is_slot_used(cursor) {
                return Some(WrappedTuple::new(
                    self.page.tuples[cursor].clone(),
                    cursor,
                    self.page.get_pid(),
                ));
            }
        }
    }
}

impl DoubleEndedIterator for BTreeLeafPageIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            self.reverse_cursor -= 1;
            if self.reverse_cursor <= self.cursor {
                return None;
            }

            let cursor = self.reverse_cursor as usize;
            if self.page.is_slot_used(cursor) {
                return Some(WrappedTuple::new(
                    self.page.tuples[cursor].clone(),
                    cursor,
                    self.page.get_pid(),
                ));
            }
        }
    }
}

/// Same iteration, but over a shared page pod. Locks the page for the
/// duration of each step only.
pub struct BTreeLeafPageIteratorRc {
    page: Pod<BTreeLeafPage>,
    cursor: i64,
    reverse_cursor: i64,
}

impl BTreeLeafPageIteratorRc {
    pub fn new(page: Pod<BTreeLeafPage>) -> Self {
        let slot_count = page.rl().get_slots_count();
        Self {
            page,
            cursor: -1,
            reverse_cursor: slot_count as i64,
        }
    }
}

impl Iterator for BTreeLeafPageIteratorRc {
    type Item = WrappedTuple;

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.page.rl();
        loop {
            self.cursor += 1;
            if self.cursor >= self.reverse_cursor {
                return None;
            }

            let cursor = self.cursor as usize;
            if page.is_slot_used(cursor) {
                return Some(WrappedTuple::new(
                    page.tuples[cursor].clone(),
                    cursor,
                    page.get_pid(),
                ));
            }
        }
    }
}

impl DoubleEndedIterator for BTreeLeafPageIteratorRc {
    fn next_back(&mut self) -> Option<Self::Item> {
        let page = self.page.rl();
        loop {
            self.reverse_cursor -= 1;
            if self.reverse_cursor <= self.cursor {
                return None;
            }

            let cursor = self.reverse_cursor as usize;
            if page.is_slot_used(cursor) {
                return Some(WrappedTuple::new(
                    page.tuples[cursor].clone(),
                    cursor,
                    page.get_pid(),
                ));
            }
        }
    }
}
