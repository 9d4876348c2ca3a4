use super::{BTreePageID, PageCategory, EMPTY_PAGE_ID};

/// State shared by every page kind: identity, the parent link and the
/// before image used by transaction abort.
///
/// The parent is stored as a bare page index. Index 0 means the page is
/// parented by the root pointer page (i.e. it is the root); anything
/// else names an internal page.
#[derive(Debug)]
pub struct BTreeBasePage {
    pid: BTreePageID,

    parent_page_index: u32,

    old_data: Vec<u8>,
}

impl BTreeBasePage {
    pub fn new(pid: &BTreePageID) -> BTreeBasePage {
        BTreeBasePage {
            pid: *pid,
            parent_page_index: EMPTY_PAGE_ID,
            old_data: Vec::new(),
        }
    }

    pub fn get_pid(&self) -> BTreePageID {
        self.pid
    }

    pub fn get_parent_pid(&self) -> BTreePageID {
        let category = if self.parent_page_index == EMPTY_PAGE_ID {
            PageCategory::RootPointer
        } else {
            PageCategory::Internal
        };
        BTreePageID::new(category, self.pid.get_table_id(), self.parent_page_index)
    }

    pub fn set_parent_pid(&mut self, pid: &BTreePageID) {
        assert!(
            pid.category == PageCategory::Internal
                || pid.category == PageCategory::RootPointer,
            "parent of {} must be an internal or root pointer page, got {}",
            self.pid,
            pid,
        );
        assert_eq!(
            pid.get_table_id(),
            self.pid.get_table_id(),
            "parent of {} must belong to the same table",
            self.pid,
        );
        self.parent_page_index = pid.page_index;
    }

    pub fn get_parent_page_index(&self) -> u32 {
        self.parent_page_index
    }

    pub fn set_parent_page_index(&mut self, index: u32) {
        self.parent_page_index = index;
    }

    pub fn get_old_data(&self) -> Vec<u8> {
        self.old_data.clone()
    }

    pub fn set_old_data(&mut self, data: Vec<u8>) {
        self.old_data = data;
    }
}
