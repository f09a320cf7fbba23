//! Process-lifetime keyed state store.
//!
//! Every key owns a lock slot. Slots live in a sharded map; a caller clones
//! the slot handle out of the map and releases the shard before locking the
//! slot, so no caller ever waits on a slot while holding a shard.

use crate::entry::{Entry, Versioned};
use crate::error::{StoreError, UpdateError};
use dashmap::DashMap;
use iamsim_kernel::ResourceKey;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Slot = Arc<Mutex<Option<Entry>>>;

/// Concurrency-safe map from opaque string keys to versioned values.
///
/// Instances are independent: construct one per engine (or per test).
///
/// Deleting a key leaves its empty slot in place so concurrent holders stay
/// valid. Reclaiming those slots is the caller's job: call
/// [`StateStore::compact`] at a quiet point.
#[derive(Debug, Default)]
pub struct StateStore {
    slots: DashMap<String, Slot>,
    sequence: AtomicU64,
}

fn lock(slot: &Mutex<Option<Entry>>) -> MutexGuard<'_, Option<Entry>> {
    // A panicking mutator never leaves a half-written entry behind, so a
    // poisoned slot is still consistent.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::undecodable(key, e.to_string()))
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Encode {
        key: key.to_string(),
        message: e.to_string(),
    })
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_slot(&self, key: &str) -> Option<Slot> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.existing_slot(key) {
            return slot;
        }
        Arc::clone(self.slots.entry(key.to_string()).or_default().value())
    }

    /// Next write version. Callers hold the key's slot lock, which makes
    /// versions strictly increasing per key.
    fn next_version(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn snapshot_slots(&self, prefix: &str) -> Vec<(String, Slot)> {
        self.slots
            .iter()
            .filter(|item| item.key().starts_with(prefix))
            .map(|item| (item.key().clone(), Arc::clone(item.value())))
            .collect()
    }

    pub fn exists(&self, key: impl AsRef<str>) -> bool {
        self.existing_slot(key.as_ref())
            .is_some_and(|slot| lock(&slot).is_some())
    }

    /// Decode the value at `key`.
    ///
    /// Fails with `NotFound` if the key is absent or the payload does not
    /// decode as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: impl AsRef<str>) -> Result<T, StoreError> {
        self.get_versioned(key).map(Versioned::into_value)
    }

    pub fn get_versioned<T: DeserializeOwned>(
        &self,
        key: impl AsRef<str>,
    ) -> Result<Versioned<T>, StoreError> {
        let key = key.as_ref();
        let slot = self
            .existing_slot(key)
            .ok_or_else(|| StoreError::absent(key))?;
        let entry = lock(&slot).clone().ok_or_else(|| StoreError::absent(key))?;
        Ok(Versioned {
            value: decode(key, entry.value)?,
            version: entry.version,
        })
    }

    /// Current version of `key`, if present.
    pub fn version(&self, key: impl AsRef<str>) -> Option<u64> {
        let slot = self.existing_slot(key.as_ref())?;
        let guard = lock(&slot);
        guard.as_ref().map(|entry| entry.version)
    }

    /// Unconditional upsert. Returns the version of the new value.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: impl AsRef<str>,
        value: &T,
    ) -> Result<u64, StoreError> {
        let key = key.as_ref();
        let value = encode(key, value)?;
        let slot = self.slot(key);
        let mut guard = lock(&slot);
        let version = self.next_version();
        *guard = Some(Entry { value, version });
        drop(guard);

        tracing::debug!(key, version, "store set");
        Ok(version)
    }

    /// Compare-and-set against the current version.
    ///
    /// `expected == 0` succeeds only when the key is absent.
    pub fn set_if_version<T: Serialize + ?Sized>(
        &self,
        key: impl AsRef<str>,
        value: &T,
        expected: u64,
    ) -> Result<u64, StoreError> {
        let key = key.as_ref();
        let value = encode(key, value)?;
        let slot = self.slot(key);
        let mut guard = lock(&slot);

        let actual = guard.as_ref().map(|entry| entry.version);
        let current = match actual {
            Some(version) => version == expected,
            None => expected == 0,
        };
        if !current {
            return Err(StoreError::VersionConflict {
                key: key.to_string(),
                expected,
                actual,
            });
        }

        let version = self.next_version();
        *guard = Some(Entry { value, version });
        drop(guard);

        tracing::debug!(key, version, expected, "store compare-and-set");
        Ok(version)
    }

    /// Remove `key`. Deleting an absent key is a no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn delete(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        let Some(slot) = self.existing_slot(key) else {
            return false;
        };
        let removed = lock(&slot).take().is_some();
        if removed {
            tracing::debug!(key, "store delete");
        }
        removed
    }

    /// Keys with the literal `prefix`, sorted.
    ///
    /// The result is a snapshot: every key present for the whole call is
    /// included exactly once.
    pub fn list(&self, prefix: impl AsRef<str>) -> Vec<String> {
        let mut keys: Vec<String> = self
            .snapshot_slots(prefix.as_ref())
            .into_iter()
            .filter(|(_, slot)| lock(slot).is_some())
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        keys
    }

    /// [`StateStore::list`] restricted to keys in [`ResourceKey`] form.
    pub fn list_resources(&self, prefix: impl AsRef<str>) -> Vec<ResourceKey> {
        self.list(prefix)
            .iter()
            .filter_map(|key| ResourceKey::parse(key).ok())
            .collect()
    }

    /// Atomic read-modify-write.
    ///
    /// Reads the current value (or `T::default()` when absent), lets
    /// `mutate` edit it in place, and writes it back, all under the key's
    /// slot lock. If `mutate` fails nothing is written. `mutate` must not
    /// access `key` itself.
    pub fn update<T, E, F>(
        &self,
        key: impl AsRef<str>,
        mutate: F,
    ) -> Result<Versioned<T>, UpdateError<E>>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<(), E>,
    {
        let key = key.as_ref();
        let slot = self.slot(key);
        self.update_slot(key, &slot, false, mutate)
    }

    /// Like [`StateStore::update`] but fails with `NotFound` when absent.
    pub fn update_existing<T, E, F>(
        &self,
        key: impl AsRef<str>,
        mutate: F,
    ) -> Result<Versioned<T>, UpdateError<E>>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<(), E>,
    {
        let key = key.as_ref();
        let slot = self
            .existing_slot(key)
            .ok_or_else(|| StoreError::absent(key))?;
        self.update_slot(key, &slot, true, mutate)
    }

    fn update_slot<T, E, F>(
        &self,
        key: &str,
        slot: &Mutex<Option<Entry>>,
        require_existing: bool,
        mutate: F,
    ) -> Result<Versioned<T>, UpdateError<E>>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<(), E>,
    {
        let mut guard = lock(slot);

        let mut value: T = match guard.as_ref() {
            Some(entry) => decode(key, entry.value.clone())?,
            None if require_existing => return Err(StoreError::absent(key).into()),
            None => T::default(),
        };

        mutate(&mut value).map_err(UpdateError::Mutation)?;

        let encoded = encode(key, &value)?;
        let version = self.next_version();
        *guard = Some(Entry {
            value: encoded,
            version,
        });
        drop(guard);

        tracing::debug!(key, version, "store update");
        Ok(Versioned { value, version })
    }

    /// Number of present entries.
    pub fn len(&self) -> usize {
        self.snapshot_slots("")
            .iter()
            .filter(|(_, slot)| lock(slot).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop slots of deleted keys that no caller currently holds.
    ///
    /// Returns the number of slots removed.
    pub fn compact(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            // The shard is write-locked here, so nobody can clone the handle
            // concurrently; a count of one means nobody else holds it.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard.is_some(),
                Err(_) => true,
            }
        });
        before.saturating_sub(self.slots.len())
    }
}
