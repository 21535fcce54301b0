//! Concurrent table of individually locked records
//!
//! Each row sits behind its own `RwLock`, so writers serialize per record and
//! never on the whole table. DashMap shard guards are only held while cloning
//! the row handle and are never carried across an `.await`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

pub type Record<T> = Arc<RwLock<T>>;

pub struct RecordTable<K, T> {
    rows: DashMap<K, Record<T>>,
}

impl<K, T> Default for RecordTable<K, T>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> RecordTable<K, T>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.rows.contains_key(key)
    }

    fn handle(&self, key: &K) -> Option<Record<T>> {
        self.rows.get(key).map(|row| Arc::clone(row.value()))
    }

    /// True while `record` is still the row stored under `key`
    fn is_live(&self, key: &K, record: &Record<T>) -> bool {
        self.rows
            .get(key)
            .map(|row| Arc::ptr_eq(row.value(), record))
            .unwrap_or(false)
    }

    /// Insert a new row. Returns false (and drops `value`) if the key is taken.
    pub fn insert_new(&self, key: K, value: T) -> bool {
        match self.rows.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(value)));
                true
            }
        }
    }

    /// Insert or replace a row. Used when hydrating from persistence.
    pub fn put(&self, key: K, value: T) {
        self.rows.insert(key, Arc::new(RwLock::new(value)));
    }

    /// Handle of the row under `key`, creating it with `init` when absent
    pub fn get_or_insert_with(&self, key: K, init: impl FnOnce() -> T) -> Record<T> {
        Arc::clone(
            self.rows
                .entry(key)
                .or_insert_with(|| Arc::new(RwLock::new(init())))
                .value(),
        )
    }

    /// Shared lock on a live row
    pub async fn read(&self, key: &K) -> Option<OwnedRwLockReadGuard<T>> {
        let record = self.handle(key)?;
        let guard = record.clone().read_owned().await;
        self.is_live(key, &record).then_some(guard)
    }

    /// Exclusive lock on a live row.
    ///
    /// Returns `None` when the row is absent or was removed while waiting for
    /// the lock.
    pub async fn write(&self, key: &K) -> Option<OwnedRwLockWriteGuard<T>> {
        let record = self.handle(key)?;
        let guard = record.clone().write_owned().await;
        self.is_live(key, &record).then_some(guard)
    }

    /// Remove a row. Callers hold the row's write guard so no writer can be
    /// mid-update on the detached record.
    pub fn remove(&self, key: &K) -> bool {
        self.rows.remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<K> {
        self.rows.iter().map(|row| row.key().clone()).collect()
    }
}

impl<K, T> RecordTable<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    /// Cloned copy of one row
    pub async fn get(&self, key: &K) -> Option<T> {
        self.read(key).await.map(|guard| guard.clone())
    }

    /// Cloned copy of every row, in no particular order
    pub async fn values(&self) -> Vec<T> {
        let handles: Vec<Record<T>> = self.rows.iter().map(|row| Arc::clone(row.value())).collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.read().await.clone());
        }
        out
    }
}
