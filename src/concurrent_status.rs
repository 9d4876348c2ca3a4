use core::fmt;
use std::{
    collections::HashSet,
    sync::Mutex,
    thread::sleep,
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    btree::page::BTreePageID,
    error::OakError,
    transaction::Transaction,
    types::{ConcurrentHashMap, OakResult},
};

/// How long a transaction may wait for a conflicting lock to clear
/// before it is told to abort. Timeout is the sole deadlock-resolution
/// mechanism; there is no cycle detection.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(200);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lock {
    SLock,
    XLock,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    pub fn to_lock(&self) -> Lock {
        match self {
            Permission::ReadOnly => Lock::SLock,
            Permission::ReadWrite => Lock::XLock,
        }
    }
}

/// Page-granular lock table shared by every transaction.
///
/// Both maps are only written while `modification_lock` is held, so a
/// grant decision always sees a consistent pair.
pub struct ConcurrentStatus {
    s_lock_map: ConcurrentHashMap<BTreePageID, HashSet<Transaction>>,
    x_lock_map: ConcurrentHashMap<BTreePageID, Transaction>,
    hold_pages: ConcurrentHashMap<Transaction, HashSet<BTreePageID>>,
    modification_lock: Mutex<()>,
}

impl ConcurrentStatus {
    pub fn new() -> Self {
        Self {
            s_lock_map: ConcurrentHashMap::new(),
            x_lock_map: ConcurrentHashMap::new(),
            hold_pages: ConcurrentHashMap::new(),
            modification_lock: Mutex::new(()),
        }
    }

    /// Block until the lock can be granted, polling the lock table.
    /// Fails with `Aborted` once the wait exceeds `LOCK_TIMEOUT`; the
    /// caller is expected to abort its transaction and retry from the
    /// top.
    pub fn request_lock(
        &self,
        tx: &Transaction,
        lock: &Lock,
        page_id: &BTreePageID,
    ) -> OakResult {
        let start_time = Instant::now();
        loop {
            if self.add_lock(tx, lock, page_id) {
                return Ok(());
            }

            if start_time.elapsed() >= LOCK_TIMEOUT {
                debug!(
                    "lock timeout, tx: {}, lock: {:?}, page_id: {:?}, status: {}",
                    tx, lock, page_id, self,
                );
                return Err(OakError::Aborted);
            }

            sleep(POLL_INTERVAL);
        }
    }

    // Try to add a lock to the given page. This api is idempotent.
    //
    // Returns whether the lock was granted:
    //
    // - shared: granted unless a *different* transaction holds the
    //   exclusive lock
    // - exclusive: granted when nobody holds the page, when `tx` is the
    //   sole shared holder (upgrade), or when `tx` already holds it
    //   exclusively (reentrant)
    // - re-acquiring an already-held lock at the same or lower mode is
    //   a no-op
    fn add_lock(&self, tx: &Transaction, lock: &Lock, page_id: &BTreePageID) -> bool {
        let _guard = self.modification_lock.lock().unwrap();

        if let Some(holder) = self.x_lock_map.get(page_id) {
            // an exclusive holder covers both modes for itself and
            // blocks everyone else
            return holder == *tx;
        }

        match lock {
            Lock::SLock => {
                self.s_lock_map
                    .alter_value(page_id, |holders| {
                        holders.insert(*tx);
                        Ok(())
                    })
                    .unwrap();
            }
            Lock::XLock => {
                if let Some(holders) = self.s_lock_map.get(page_id) {
                    if holders.iter().any(|holder| holder != tx) {
                        return false;
                    }
                    // `tx` is the sole shared holder: upgrade
                    self.s_lock_map.remove(page_id);
                }
                self.x_lock_map.insert(*page_id, *tx);
            }
        }

        self.hold_pages
            .alter_value(tx, |pages| {
                pages.insert(*page_id);
                Ok(())
            })
            .unwrap();

        debug!(
            "lock acquired, tx: {}, lock: {:?}, page_id: {:?}",
            tx, lock, page_id
        );
        true
    }

    /// Release one page held by `tx`. This is the explicit escape hatch
    /// of the locking discipline; everything else releases in bulk at
    /// transaction end.
    pub fn release_lock(&self, tx: &Transaction, page_id: &BTreePageID) {
        let _guard = self.modification_lock.lock().unwrap();
        self.release_lock_inner(tx, page_id);

        let mut hold_pages = self.hold_pages.get_inner_wl();
        if let Some(pages) = hold_pages.get_mut(tx) {
            pages.remove(page_id);
            if pages.is_empty() {
                hold_pages.remove(tx);
            }
        }
    }

    /// Release every lock held by `tx`.
    pub fn release_lock_by_tx(&self, tx: &Transaction) -> OakResult {
        if !self.hold_pages.contains_key(tx) {
            return Ok(());
        }

        let _guard = self.modification_lock.lock().unwrap();
        if let Some(pages) = self.hold_pages.remove(tx) {
            for page_id in pages {
                self.release_lock_inner(tx, &page_id);
            }
        }

        Ok(())
    }

    fn release_lock_inner(&self, tx: &Transaction, page_id: &BTreePageID) {
        let mut s_lock_map = self.s_lock_map.get_inner_wl();
        if let Some(holders) = s_lock_map.get_mut(page_id) {
            debug!("release shared lock, tx: {}, page_id: {:?}", tx, page_id);
            holders.remove(tx);
            if holders.is_empty() {
                s_lock_map.remove(page_id);
            }
        }
        drop(s_lock_map);

        let mut x_lock_map = self.x_lock_map.get_inner_wl();
        if x_lock_map.get(page_id) == Some(tx) {
            debug!("release exclusive lock, tx: {}, page_id: {:?}", tx, page_id);
            x_lock_map.remove(page_id);
        }
    }

    /// True iff `tx` holds any lock on `page_id`.
    pub fn holds_lock(&self, tx: &Transaction, page_id: &BTreePageID) -> bool {
        if self.x_lock_map.get(page_id) == Some(*tx) {
            return true;
        }
        if let Some(holders) = self.s_lock_map.get(page_id) {
            return holders.contains(tx);
        }
        false
    }

    /// Number of distinct pages `tx` currently holds locks on.
    pub fn hold_count(&self, tx: &Transaction) -> usize {
        match self.hold_pages.get(tx) {
            Some(pages) => pages.len(),
            None => 0,
        }
    }

    /// The transaction holding `page_id` exclusively, if any.
    pub fn get_page_tx(&self, page_id: &BTreePageID) -> Option<Transaction> {
        self.x_lock_map.get(page_id)
    }

    pub fn clear(&self) {
        self.s_lock_map.clear();
        self.x_lock_map.clear();
        self.hold_pages.clear();
    }
}

impl fmt::Display for ConcurrentStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut depiction = "\n".to_string();

        depiction.push_str("s_lock_map: {");
        for (k, v) in self.s_lock_map.get_inner_rl().iter() {
            depiction.push_str(&format!("\n\t{:?} -> [", k.get_short_repr()));
            for tx in v {
                depiction.push_str(&format!("{:?}, ", tx));
            }
            depiction.push_str("]");
        }
        depiction.push_str("\n}\n");

        depiction.push_str("x_lock_map: {");
        for (k, v) in self.x_lock_map.get_inner_rl().iter() {
            depiction.push_str(&format!("\n\t{:?} -> {:?}, ", k.get_short_repr(), v));
        }
        depiction.push_str("\n}\n");

        write!(f, "{}", depiction)
    }
}
