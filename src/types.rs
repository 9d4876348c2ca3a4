use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{error::OakError, utils::HandyRwLock};

pub type Pod<T> = Arc<RwLock<T>>;

pub type ResultPod<T> = Result<Pod<T>, OakError>;
pub type OakResult = Result<(), OakError>;

/// A `HashMap` behind a `RwLock`, shared freely between threads.
///
/// All mutation goes through `&self`; the lock is the unit of
/// serialization, not the borrow checker.
pub struct ConcurrentHashMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Copy, V: Clone> ConcurrentHashMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_inner_rl(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.inner.rl()
    }

    pub fn get_inner_wl(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.inner.wl()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.rl().get(key).cloned()
    }

    /// Return the value under `key`, inserting the result of `init`
    /// first when the key is vacant. `init` runs under the write lock,
    /// so concurrent callers observe a single insertion.
    pub fn get_or_insert(
        &self,
        key: &K,
        init: impl FnOnce(&K) -> Result<V, OakError>,
    ) -> Result<V, OakError> {
        let mut inner = self.inner.wl();
        if let Some(v) = inner.get(key) {
            return Ok(v.clone());
        }
        let v = init(key)?;
        inner.insert(*key, v.clone());
        Ok(v)
    }

    /// Run `action` against the value under `key`, inserting a default
    /// first when vacant.
    pub fn alter_value(
        &self,
        key: &K,
        action: impl FnOnce(&mut V) -> OakResult,
    ) -> OakResult
    where
        V: Default,
    {
        let mut inner = self.inner.wl();
        let v = inner.entry(*key).or_insert_with(V::default);
        action(v)
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.wl().insert(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.wl().remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.rl().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.rl().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.rl().len()
    }

    pub fn clear(&self) {
        self.inner.wl().clear();
    }
}
