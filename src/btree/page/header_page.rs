use std::io::Cursor;

use bit_vec::BitVec;

use crate::{
    btree::page_cache::PageCache,
    io::{decode_bitmap, encode_bitmap, read_exact, read_into, ByteWriter},
    storage::schema::Schema,
};

use super::{BTreeBasePage, BTreePage, BTreePageID, PageCategory, EMPTY_PAGE_ID};

/// One page of the free list.
///
/// Header pages form a doubly linked list; each bit of the bitmap
/// corresponds one-to-one with a page slot of the file. Bit value 1
/// means "in use", 0 means "free". A header page at list position `j`
/// covers the page numbers `[j * capacity, (j + 1) * capacity)`.
///
/// On disk: previous header (4B), next header (4B), bitmap.
pub struct BTreeHeaderPage {
    base: BTreeBasePage,

    header: BitVec<u32>,

    slot_count: usize,

    prev_page_index: u32,
    next_page_index: u32,
}

impl std::ops::Deref for BTreeHeaderPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl std::ops::DerefMut for BTreeHeaderPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl BTreeHeaderPage {
    /// Number of page slots one header page tracks.
    pub fn calculate_slots_count() -> usize {
        (PageCache::get_page_size() - 2 * 4) * 8
    }

    /// A fresh header page with every slot marked as in-use, so only
    /// pages that are explicitly freed later are ever handed out.
    pub fn new_empty(pid: &BTreePageID) -> Self {
        let slot_count = Self::calculate_slots_count();

        let mut page = Self {
            base: BTreeBasePage::new(pid),
            header: BitVec::from_elem(slot_count, true),
            slot_count,
            prev_page_index: EMPTY_PAGE_ID,
            next_page_index: EMPTY_PAGE_ID,
        };
        page.set_before_image();
        page
    }

    pub fn get_slots_count(&self) -> usize {
        self.slot_count
    }

    pub fn is_slot_used(&self, slot_index: usize) -> bool {
        self.header[slot_index]
    }

    // mark the slot as empty/filled.
    pub fn mark_slot_status(&mut self, slot_index: usize, used: bool) {
        self.header.set(slot_index, used);
    }

    /// The first free slot, if any.
    pub fn get_empty_slot(&self) -> Option<usize> {
        for i in 0..self.slot_count {
            if !self.header[i] {
                return Some(i);
            }
        }
        None
    }

    pub fn get_prev_pid(&self) -> Option<BTreePageID> {
        if self.prev_page_index == EMPTY_PAGE_ID {
            return None;
        }
        Some(BTreePageID::new(
            PageCategory::Header,
            self.get_pid().get_table_id(),
            self.prev_page_index,
        ))
    }

    pub fn set_prev_pid(&mut self, pid: Option<BTreePageID>) {
        match pid {
            Some(pid) => self.prev_page_index = pid.page_index,
            None => self.prev_page_index = EMPTY_PAGE_ID,
        }
    }

    pub fn get_next_pid(&self) -> Option<BTreePageID> {
        if self.next_page_index == EMPTY_PAGE_ID {
            return None;
        }
        Some(BTreePageID::new(
            PageCategory::Header,
            self.get_pid().get_table_id(),
            self.next_page_index,
        ))
    }

    pub fn set_next_pid(&mut self, pid: Option<BTreePageID>) {
        match pid {
            Some(pid) => self.next_page_index = pid.page_index,
            None => self.next_page_index = EMPTY_PAGE_ID,
        }
    }
}

impl BTreePage for BTreeHeaderPage {
    fn new(pid: &BTreePageID, bytes: &[u8], _scheme: &Schema, _key_field: usize) -> Self {
        let slot_count = Self::calculate_slots_count();

        let mut reader = Cursor::new(bytes);
        let prev_page_index: u32 = read_into(&mut reader);
        let next_page_index: u32 = read_into(&mut reader);
        let bitmap = read_exact(&mut reader, slot_count / 8);

        let mut page = Self {
            base: BTreeBasePage::new(pid),
            header: decode_bitmap(&bitmap, slot_count),
            slot_count,
            prev_page_index,
            next_page_index,
        };
        page.set_before_image();
        page
    }

    fn get_pid(&self) -> BTreePageID {
        self.base.get_pid()
    }

    fn get_parent_pid(&self) -> BTreePageID {
        self.base.get_parent_pid()
    }

    fn set_parent_pid(&mut self, pid: &BTreePageID) {
        self.base.set_parent_pid(pid)
    }

    fn get_page_data(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer.write(&self.prev_page_index);
        writer.write(&self.next_page_index);
        writer.write_bytes(&encode_bitmap(&self.header));
        writer.to_padded_bytes(PageCache::get_page_size())
    }

    fn set_before_image(&mut self) {
        let data = self.get_page_data();
        self.base.set_old_data(data);
    }

    fn get_before_image(&self) -> Vec<u8> {
        self.base.get_old_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::small_int_schema;

    #[test]
    fn test_fresh_header_has_no_free_slot() {
        let pid = BTreePageID::new(PageCategory::Header, 1, 4);
        let page = BTreeHeaderPage::new_empty(&pid);
        assert_eq!(page.get_empty_slot(), None);
    }

    #[test]
    fn test_header_round_trip() {
        let scheme = small_int_schema(2, "");
        let pid = BTreePageID::new(PageCategory::Header, 1, 4);

        let mut page = BTreeHeaderPage::new_empty(&pid);
        page.mark_slot_status(3, false);
        page.mark_slot_status(77, false);
        page.set_next_pid(Some(BTreePageID::new(PageCategory::Header, 1, 9)));

        let data = page.get_page_data();
        assert_eq!(data.len(), PageCache::get_page_size());

        let decoded = BTreeHeaderPage::new(&pid, &data, &scheme, 0);
        assert_eq!(decoded.get_empty_slot(), Some(3));
        assert!(!decoded.is_slot_used(77));
        assert!(decoded.is_slot_used(78));
        assert_eq!(decoded.get_next_pid().unwrap().page_index, 9);
        assert_eq!(decoded.get_prev_pid(), None);
        assert_eq!(decoded.get_page_data(), data);
    }
}
