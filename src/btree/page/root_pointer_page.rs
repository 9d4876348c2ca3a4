use std::io::Cursor;

use crate::{
    btree::page_cache::PageCache,
    io::{read_into, ByteWriter},
    storage::schema::Schema,
};

use super::{BTreeBasePage, BTreePage, BTreePageID, PageCategory, EMPTY_PAGE_ID};

/// Page 0 of every table file.
///
/// The tree rebalances as it grows and shrinks, so the location of the
/// root page changes over time. This page always sits at the start of
/// the file and names the current root (page number + kind) and the
/// first header page of the free list.
///
/// On disk: root page number (4B), root kind (1B), first header page
/// number (4B), zero padding.
pub struct BTreeRootPointerPage {
    base: BTreeBasePage,

    root_page_index: u32,
    root_category: PageCategory,

    header_page_index: u32,
}

impl std::ops::Deref for BTreeRootPointerPage {
    type Target = BTreeBasePage;
    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl std::ops::DerefMut for BTreeRootPointerPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

impl BTreeRootPointerPage {
    /// The root pointer page occupies a full page-size slot; only the
    /// first 9 bytes carry data.
    pub fn page_size() -> usize {
        PageCache::get_page_size()
    }

    /// True when the file has no root yet (nothing was ever inserted).
    pub fn has_root(&self) -> bool {
        self.root_page_index != EMPTY_PAGE_ID
    }

    pub fn get_root_pid(&self) -> BTreePageID {
        BTreePageID::new(
            self.root_category,
            self.get_pid().get_table_id(),
            self.root_page_index,
        )
    }

    pub fn set_root_pid(&mut self, pid: &BTreePageID) {
        assert!(
            pid.category == PageCategory::Leaf || pid.category == PageCategory::Internal,
            "root must be a leaf or internal page, got {}",
            pid,
        );
        self.root_page_index = pid.page_index;
        self.root_category = pid.category;
    }

    /// Id of the first header page, `None` when the free list has not
    /// been created yet.
    pub fn get_header_pid(&self) -> Option<BTreePageID> {
        if self.header_page_index == EMPTY_PAGE_ID {
            None
        } else {
            Some(BTreePageID::new(
                PageCategory::Header,
                self.get_pid().get_table_id(),
                self.header_page_index,
            ))
        }
    }

    pub fn set_header_pid(&mut self, pid: Option<BTreePageID>) {
        match pid {
            Some(pid) => self.header_page_index = pid.page_index,
            None => self.header_page_index = EMPTY_PAGE_ID,
        }
    }
}

impl BTreePage for BTreeRootPointerPage {
    fn new(pid: &BTreePageID, bytes: &[u8], _scheme: &Schema, _key_field: usize) -> Self {
        let mut reader = Cursor::new(bytes);
        let root_page_index: u32 = read_into(&mut reader);
        let kind_code: u8 = read_into(&mut reader);
        let header_page_index: u32 = read_into(&mut reader);

        // An all-zero image decodes as "no root yet"; the kind byte is
        // only meaningful once a root exists.
        let root_category = if root_page_index == EMPTY_PAGE_ID {
            PageCategory::RootPointer
        } else {
            PageCategory::from_byte(kind_code)
        };

        let mut page = Self {
            base: BTreeBasePage::new(pid),
            root_page_index,
            root_category,
            header_page_index,
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
        writer.write(&self.root_page_index);
        let kind_code = if self.root_page_index == EMPTY_PAGE_ID {
            0
        } else {
            self.root_category.to_byte()
        };
        writer.write(&kind_code);
        writer.write(&self.header_page_index);
        writer.to_padded_bytes(Self::page_size())
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
    fn test_root_pointer_round_trip() {
        let scheme = small_int_schema(2, "");
        let pid = BTreePageID::new(PageCategory::RootPointer, 7, 0);

        let blank = vec![0; PageCache::get_page_size()];
        let mut page = BTreeRootPointerPage::new(&pid, &blank, &scheme, 0);
        assert!(!page.has_root());
        assert_eq!(page.get_header_pid(), None);

        let root = BTreePageID::new(PageCategory::Internal, 7, 3);
        page.set_root_pid(&root);
        page.set_header_pid(Some(BTreePageID::new(PageCategory::Header, 7, 5)));

        let data = page.get_page_data();
        assert_eq!(data.len(), BTreeRootPointerPage::page_size());

        let decoded = BTreeRootPointerPage::new(&pid, &data, &scheme, 0);
        assert_eq!(decoded.get_root_pid(), root);
        assert_eq!(
            decoded.get_header_pid().unwrap().page_index,
            5,
        );
        assert_eq!(decoded.get_page_data(), data);
    }
}
