use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, RwLock,
};

use log::debug;

use crate::{
    concurrent_status::Permission,
    error::OakError,
    storage::tuple::{Tuple, WrappedTuple},
    transaction::Transaction,
    types::{ConcurrentHashMap, OakResult, Pod, ResultPod},
    utils::HandyRwLock,
    Database,
};

use super::page::{
    BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreePage, BTreePageID,
    BTreeRootPointerPage, PageCategory,
};

pub const DEFAULT_PAGE_SIZE: usize = 4096;
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_PAGE_SIZE);

/// How many pages the cache holds at most. Sized so that bulk loads of
/// a packed two-tier tree fit their working set while uncommitted.
pub const DEFAULT_PAGES_COUNT: usize = 2048;

type Key = BTreePageID;

/// Bounded cache of in-memory pages.
///
/// Every page access goes through `get_*_page`, which acquires the page
/// lock *before* the page is returned. Pages dirtied by an uncommitted
/// transaction are never written to disk (NO-STEAL): eviction only ever
/// discards clean pages, and abort rolls dirty pages back from their
/// before images entirely in memory.
pub struct PageCache {
    pub root_pointer_buffer: ConcurrentHashMap<Key, Pod<BTreeRootPointerPage>>,
    pub internal_buffer: ConcurrentHashMap<Key, Pod<BTreeInternalPage>>,
    pub leaf_buffer: ConcurrentHashMap<Key, Pod<BTreeLeafPage>>,
    pub header_buffer: ConcurrentHashMap<Key, Pod<BTreeHeaderPage>>,

    capacity: usize,

    // resident pages, least recently used first
    lru: Mutex<Vec<Key>>,

    // which transaction dirtied which page
    dirties: ConcurrentHashMap<Key, Transaction>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::new_with_capacity(DEFAULT_PAGES_COUNT)
    }

    pub fn new_with_capacity(capacity: usize) -> Self {
        Self {
            root_pointer_buffer: ConcurrentHashMap::new(),
            header_buffer: ConcurrentHashMap::new(),
            internal_buffer: ConcurrentHashMap::new(),
            leaf_buffer: ConcurrentHashMap::new(),
            capacity,
            lru: Mutex::new(Vec::new()),
            dirties: ConcurrentHashMap::new(),
        }
    }

    pub fn set_page_size(page_size: usize) {
        PAGE_SIZE.store(page_size, Ordering::Relaxed);
    }

    pub fn get_page_size() -> usize {
        PAGE_SIZE.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.root_pointer_buffer.clear();
        self.header_buffer.clear();
        self.internal_buffer.clear();
        self.leaf_buffer.clear();
        self.lru.lock().unwrap().clear();
        self.dirties.clear();
    }

    /// Number of pages currently resident.
    pub fn resident_count(&self) -> usize {
        self.root_pointer_buffer.len()
            + self.header_buffer.len()
            + self.internal_buffer.len()
            + self.leaf_buffer.len()
    }

    pub fn is_dirty(&self, pid: &Key) -> bool {
        self.dirties.contains_key(pid)
    }

    /// Record that `tx` dirtied `pid` and refresh its recency.
    pub fn mark_dirty(&self, tx: &Transaction, pid: &Key) {
        self.dirties.insert(*pid, *tx);
        self.touch(pid);
    }

    // Move the page to the most-recently-used end, inserting it into
    // the order when absent.
    fn touch(&self, pid: &Key) {
        let mut lru = self.lru.lock().unwrap();
        if let Some(pos) = lru.iter().position(|k| k == pid) {
            lru.remove(pos);
        }
        lru.push(*pid);
    }

    /// Read one page from disk and decode it.
    fn load_page<PAGE>(&self, pid: &Key) -> ResultPod<PAGE>
    where
        PAGE: BTreePage,
    {
        let table_pod = Database::catalog().get_table(&pid.get_table_id())?;
        let table = table_pod.rl();

        let buf = table.read_page_bytes(pid)?;
        let page = PAGE::new(pid, &buf, &table.tuple_scheme, table.key_field);

        debug!("page loaded from disk, pid: {}", pid);
        Ok(Arc::new(RwLock::new(page)))
    }

    // Make room for one more page. Runs before a miss is filled.
    fn ensure_capacity(&self) -> OakResult {
        while self.resident_count() >= self.capacity {
            self.evict_page()?;
        }
        Ok(())
    }

    /// Evict the least recently used **clean** page.
    ///
    /// Dirty pages are pinned by the NO-STEAL rule: writing one out
    /// would leak uncommitted bytes to disk. When every resident page
    /// is dirty the cache is stuck and the error is not retryable.
    fn evict_page(&self) -> OakResult {
        let candidates: Vec<Key> = self.lru.lock().unwrap().clone();

        for pid in candidates {
            if self.dirties.contains_key(&pid) {
                continue;
            }

            debug!("evicting page {}", pid);
            self.discard_page(&pid);
            return Ok(());
        }

        Err(OakError::invalid(
            "cannot evict: all cached pages are dirty",
        ))
    }

    pub fn get_root_ptr_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &Key,
    ) -> ResultPod<BTreeRootPointerPage> {
        Database::concurrent_status().request_lock(tx, &perm.to_lock(), pid)?;
        if !self.root_pointer_buffer.contains_key(pid) {
            self.ensure_capacity()?;
        }
        let pod = self
            .root_pointer_buffer
            .get_or_insert(pid, |pid| self.load_page(pid))?;
        self.touch(pid);
        if perm == Permission::ReadWrite {
            self.dirties.insert(*pid, *tx);
        }
        Ok(pod)
    }

    pub fn get_header_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &Key,
    ) -> ResultPod<BTreeHeaderPage> {
        Database::concurrent_status().request_lock(tx, &perm.to_lock(), pid)?;
        if !self.header_buffer.contains_key(pid) {
            self.ensure_capacity()?;
        }
        let pod = self
            .header_buffer
            .get_or_insert(pid, |pid| self.load_page(pid))?;
        self.touch(pid);
        if perm == Permission::ReadWrite {
            self.dirties.insert(*pid, *tx);
        }
        Ok(pod)
    }

    pub fn get_internal_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &Key,
    ) -> ResultPod<BTreeInternalPage> {
        Database::concurrent_status().request_lock(tx, &perm.to_lock(), pid)?;
        if !self.internal_buffer.contains_key(pid) {
            self.ensure_capacity()?;
        }
        let pod = self
            .internal_buffer
            .get_or_insert(pid, |pid| self.load_page(pid))?;
        self.touch(pid);
        if perm == Permission::ReadWrite {
            self.dirties.insert(*pid, *tx);
        }
        Ok(pod)
    }

    pub fn get_leaf_page(
        &self,
        tx: &Transaction,
        perm: Permission,
        pid: &Key,
    ) -> ResultPod<BTreeLeafPage> {
        Database::concurrent_status().request_lock(tx, &perm.to_lock(), pid)?;
        if !self.leaf_buffer.contains_key(pid) {
            self.ensure_capacity()?;
        }
        let pod = self
            .leaf_buffer
            .get_or_insert(pid, |pid| self.load_page(pid))?;
        self.touch(pid);
        if perm == Permission::ReadWrite {
            self.dirties.insert(*pid, *tx);
        }
        Ok(pod)
    }

    /// Add a tuple to the specified table on behalf of transaction
    /// `tx`. Acquires a write lock on the page the tuple lands on and
    /// on any page touched by the splits the insert may cause; all of
    /// them stay dirty in the cache until the transaction completes.
    pub fn insert_tuple(&self, tx: &Transaction, table_id: u32, tuple: &Tuple) -> OakResult {
        let table_pod = Database::catalog().get_table(&table_id)?;
        let table = table_pod.rl();
        table.insert_tuple(tx, tuple)
    }

    /// Remove a tuple (located through its record id) on behalf of
    /// transaction `tx`. May trigger redistribution or merges; every
    /// page touched stays dirty in the cache.
    pub fn delete_tuple(&self, tx: &Transaction, tuple: &WrappedTuple) -> OakResult {
        let table_pod = Database::catalog().get_table(&tuple.get_pid().get_table_id())?;
        let table = table_pod.rl();
        table.delete_tuple(tx, tuple)
    }

    /// Remove the specific page id from the cache **without** writing
    /// it.
    ///
    /// Used by the B+ tree to make sure that freed pages are not kept
    /// around in their stale shape, and when installing freshly
    /// formatted pages.
    pub fn discard_page(&self, pid: &Key) {
        match pid.category {
            PageCategory::Internal => {
                self.internal_buffer.remove(pid);
            }
            PageCategory::Leaf => {
                self.leaf_buffer.remove(pid);
            }
            PageCategory::RootPointer => {
                self.root_pointer_buffer.remove(pid);
            }
            PageCategory::Header => {
                self.header_buffer.remove(pid);
            }
        }

        let mut lru = self.lru.lock().unwrap();
        if let Some(pos) = lru.iter().position(|k| k == pid) {
            lru.remove(pos);
        }
        drop(lru);

        self.dirties.remove(pid);
    }

    /// Write the content of a specific page to disk, if it is dirty.
    pub fn flush_page(&self, pid: &Key) -> OakResult {
        if !self.dirties.contains_key(pid) {
            return Ok(());
        }
        self.force_flush_page(pid)?;
        self.dirties.remove(pid);
        Ok(())
    }

    /// Write every page dirtied by `tx` to disk.
    pub fn flush_pages(&self, tx: &Transaction) -> OakResult {
        for pid in self.dirties.keys() {
            if self.dirties.get(&pid) == Some(*tx) {
                self.flush_page(&pid)?;
            }
        }
        Ok(())
    }

    /// Write every dirty page to disk.
    ///
    /// NB: be careful using this routine -- it persists the work of
    /// transactions that are still running. It exists for orderly
    /// shutdown and for tests.
    pub fn flush_all_pages(&self) -> OakResult {
        for pid in self.dirties.keys() {
            self.flush_page(&pid)?;
        }
        Ok(())
    }

    fn force_flush_page(&self, pid: &Key) -> OakResult {
        match pid.category {
            PageCategory::RootPointer => self.write_page(pid, &self.root_pointer_buffer),
            PageCategory::Header => self.write_page(pid, &self.header_buffer),
            PageCategory::Internal => self.write_page(pid, &self.internal_buffer),
            PageCategory::Leaf => self.write_page(pid, &self.leaf_buffer),
        }
    }

    fn write_page<PAGE: BTreePage>(
        &self,
        pid: &Key,
        buffer: &ConcurrentHashMap<Key, Pod<PAGE>>,
    ) -> OakResult {
        let pod = match buffer.get(pid) {
            Some(pod) => pod,
            // discarded in the meantime, nothing to write
            None => return Ok(()),
        };

        let table_pod = Database::catalog().get_table(&pid.get_table_id())?;
        let table = table_pod.rl();

        debug!("flushing page {:?}", pid);
        let page_data = pod.rl().get_page_data();
        table.write_page_to_disk(pid, &page_data)
    }

    /// Commit or roll back everything `tx` changed in the cache.
    ///
    /// Commit flushes the transaction's dirty pages and advances their
    /// before images to the committed content. Abort re-decodes each
    /// dirty page from its before image; NO-STEAL guarantees the disk
    /// never saw the aborted bytes, so in-memory restoration suffices.
    pub fn tx_complete(&self, tx: &Transaction, commit: bool) -> OakResult {
        let touched: Vec<Key> = self
            .dirties
            .keys()
            .into_iter()
            .filter(|pid| self.dirties.get(pid) == Some(*tx))
            .collect();

        if commit {
            for pid in &touched {
                self.flush_page(pid)?;
                self.stabilize_page(pid);
            }
        } else {
            for pid in &touched {
                self.rollback_page(pid)?;
                self.dirties.remove(pid);
            }
        }

        Ok(())
    }

    // Overwrite the page's before image with its current (just
    // committed) content.
    fn stabilize_page(&self, pid: &Key) {
        match pid.category {
            PageCategory::RootPointer => {
                if let Some(pod) = self.root_pointer_buffer.get(pid) {
                    pod.wl().set_before_image();
                }
            }
            PageCategory::Header => {
                if let Some(pod) = self.header_buffer.get(pid) {
                    pod.wl().set_before_image();
                }
            }
            PageCategory::Internal => {
                if let Some(pod) = self.internal_buffer.get(pid) {
                    pod.wl().set_before_image();
                }
            }
            PageCategory::Leaf => {
                if let Some(pod) = self.leaf_buffer.get(pid) {
                    pod.wl().set_before_image();
                }
            }
        }
    }

    fn rollback_page_generic<PAGE: BTreePage>(
        &self,
        pid: &Key,
        buffer: &ConcurrentHashMap<Key, Pod<PAGE>>,
    ) -> OakResult {
        let pod = match buffer.get(pid) {
            Some(pod) => pod,
            None => return Ok(()),
        };

        let table_pod = Database::catalog().get_table(&pid.get_table_id())?;
        let table = table_pod.rl();

        let before = pod.rl().get_before_image();
        let fresh = PAGE::new(pid, &before, &table.tuple_scheme, table.key_field);

        // replace in place so every holder of the pod sees the
        // restored content
        *pod.wl() = fresh;
        Ok(())
    }

    fn rollback_page(&self, pid: &Key) -> OakResult {
        debug!("rolling back page {:?}", pid);
        match pid.category {
            PageCategory::RootPointer => {
                self.rollback_page_generic(pid, &self.root_pointer_buffer)
            }
            PageCategory::Header => self.rollback_page_generic(pid, &self.header_buffer),
            PageCategory::Internal => {
                self.rollback_page_generic(pid, &self.internal_buffer)
            }
            PageCategory::Leaf => self.rollback_page_generic(pid, &self.leaf_buffer),
        }
    }

    pub fn all_keys(&self) -> Vec<Key> {
        let mut keys = vec![];
        keys.append(&mut self.root_pointer_buffer.keys());
        keys.append(&mut self.header_buffer.keys());
        keys.append(&mut self.leaf_buffer.keys());
        keys.append(&mut self.internal_buffer.keys());
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::small_int_schema;

    fn blank_leaf_pod(table_id: u32, index: u32) -> (Key, Pod<BTreeLeafPage>) {
        let scheme = small_int_schema(2, "");
        let pid = BTreePageID::new(PageCategory::Leaf, table_id, index);
        let blank = vec![0; PageCache::get_page_size()];
        let page = BTreeLeafPage::new(&pid, &blank, &scheme, 0);
        (pid, Arc::new(RwLock::new(page)))
    }

    fn fill(cache: &PageCache, table_id: u32, count: u32) -> Vec<Key> {
        let mut pids = Vec::new();
        for i in 1..=count {
            let (pid, pod) = blank_leaf_pod(table_id, i);
            cache.leaf_buffer.insert(pid, pod);
            cache.touch(&pid);
            pids.push(pid);
        }
        pids
    }

    #[test]
    fn test_evicts_least_recently_used_clean_page() {
        let cache = PageCache::new_with_capacity(3);
        let pids = fill(&cache, 42, 3);

        // refresh page 1 so page 2 becomes the oldest
        cache.touch(&pids[0]);

        cache.ensure_capacity().unwrap();
        assert_eq!(cache.resident_count(), 2);
        assert!(!cache.leaf_buffer.contains_key(&pids[1]));
        assert!(cache.leaf_buffer.contains_key(&pids[0]));
        assert!(cache.leaf_buffer.contains_key(&pids[2]));
    }

    #[test]
    fn test_eviction_skips_dirty_pages() {
        let cache = PageCache::new_with_capacity(3);
        let pids = fill(&cache, 43, 3);
        let tx = Transaction::new();

        // the two oldest pages are dirty, so the newest one must go
        cache.mark_dirty(&tx, &pids[0]);
        cache.mark_dirty(&tx, &pids[1]);

        cache.evict_page().unwrap();
        assert!(cache.leaf_buffer.contains_key(&pids[0]));
        assert!(cache.leaf_buffer.contains_key(&pids[1]));
        assert!(!cache.leaf_buffer.contains_key(&pids[2]));
    }

    #[test]
    fn test_eviction_fails_when_everything_is_dirty() {
        let cache = PageCache::new_with_capacity(2);
        let pids = fill(&cache, 44, 2);
        let tx = Transaction::new();

        for pid in &pids {
            cache.mark_dirty(&tx, pid);
        }

        let err = cache.evict_page().unwrap_err();
        assert!(matches!(err, OakError::Invalid(_)));
        assert_eq!(cache.resident_count(), 2);
    }

    #[test]
    fn test_discard_drops_dirty_state() {
        let cache = PageCache::new_with_capacity(2);
        let pids = fill(&cache, 45, 1);
        let tx = Transaction::new();

        cache.mark_dirty(&tx, &pids[0]);
        assert!(cache.is_dirty(&pids[0]));

        cache.discard_page(&pids[0]);
        assert!(!cache.is_dirty(&pids[0]));
        assert_eq!(cache.resident_count(), 0);
    }
}
