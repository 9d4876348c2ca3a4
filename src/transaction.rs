use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{types::OakResult, Database};

static TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// A transaction handle. Ids increase monotonically by 1; the handle is
/// freely copyable and hashable so the lock table can key on it.
#[derive(Eq, Hash, PartialEq, Clone, Copy)]
pub struct Transaction {
    uuid: u64,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            uuid: TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn get_id(&self) -> u64 {
        self.uuid
    }

    pub fn commit(&self) -> OakResult {
        self.complete(true)
    }

    pub fn abort(&self) -> OakResult {
        self.complete(false)
    }

    fn complete(&self, commit: bool) -> OakResult {
        // On commit: flush this transaction's dirty pages and advance
        // their before images. On abort: restore every dirty page from
        // its before image in memory (NO-STEAL guarantees nothing
        // leaked to disk).
        Database::page_cache().tx_complete(self, commit)?;

        // Strict 2PL: every lock goes in one batch, at the very end.
        Database::concurrent_status().release_lock_by_tx(self)?;

        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.uuid)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
