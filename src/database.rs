use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::OnceCell;

use crate::{
    btree::page_cache::PageCache, catalog::Catalog, concurrent_status::ConcurrentStatus,
    utils::HandyRwLock,
};

static DB: OnceCell<Database> = OnceCell::new();

/// Process-wide shared state: the page cache, the catalog and the lock
/// manager. Everything on it is internally synchronized.
pub struct Database {
    page_cache: PageCache,
    catalog: RwLock<Catalog>,
    concurrent_status: ConcurrentStatus,
}

impl Database {
    fn new() -> Self {
        Self {
            page_cache: PageCache::new(),
            catalog: RwLock::new(Catalog::new()),
            concurrent_status: ConcurrentStatus::new(),
        }
    }

    pub fn global() -> &'static Self {
        DB.get_or_init(Database::new)
    }

    pub fn page_cache() -> &'static PageCache {
        &Self::global().page_cache
    }

    pub fn catalog() -> RwLockReadGuard<'static, Catalog> {
        Self::global().catalog.rl()
    }

    pub fn mut_catalog() -> RwLockWriteGuard<'static, Catalog> {
        Self::global().catalog.wl()
    }

    pub fn concurrent_status() -> &'static ConcurrentStatus {
        &Self::global().concurrent_status
    }
}
