//! Lifecycle-scoped value store.
//!
//! A [`Store`] maps call-site keys to [`Retained`] values. It outlives
//! compositions (it belongs to a [`StoreOwner`](crate::StoreOwner)), which is
//! what lets a value survive a host recreation.
//!
//! Every removal (supersede, forget, teardown) hands the removed value to the
//! main dispatcher, which later runs its [`Clearable::on_cleared`]. Teardown
//! disposes remaining entries in insertion order.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::clearable::{Clearable, Retained};
use crate::dispatch::MainDispatcher;
use crate::error::RetainError;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of an entry; in practice a call-site composite key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey(pub u64);

/// Typed view of a stored value.
#[derive(Debug)]
pub struct Entry<T> {
    key: StoreKey,
    value: Arc<T>,
}

impl<T> Entry<T> {
    pub fn key(&self) -> StoreKey {
        self.key
    }

    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    pub fn into_value(self) -> Arc<T> {
        self.value
    }
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            value: self.value.clone(),
        }
    }
}

#[derive(Default)]
struct Slots {
    entries: IndexMap<StoreKey, Retained>,
    cleared: bool,
}

pub struct Store {
    id: u64,
    slots: Mutex<Slots>,
    dispatcher: Arc<dyn MainDispatcher>,
}

impl Store {
    pub fn new(dispatcher: Arc<dyn MainDispatcher>) -> Self {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("store #{id} created");
        Self {
            id,
            slots: Mutex::new(Slots::default()),
            dispatcher,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: StoreKey) -> bool {
        self.slots.lock().entries.contains_key(&key)
    }

    pub fn is_cleared(&self) -> bool {
        self.slots.lock().cleared
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<StoreKey> {
        self.slots.lock().entries.keys().copied().collect()
    }

    /// Returns the entry for `key`, or `None` if absent or of another type.
    pub fn read<T: Any + Send + Sync>(&self, key: StoreKey) -> Option<Entry<T>> {
        let retained = self.read_retained(key)?;
        match retained.downcast::<T>() {
            Some(value) => Some(Entry { key, value }),
            None => {
                log::warn!(
                    "store #{}: entry {key:?} holds `{}`, not `{}`",
                    self.id,
                    retained.type_name(),
                    std::any::type_name::<T>()
                );
                None
            }
        }
    }

    pub fn read_retained(&self, key: StoreKey) -> Option<Retained> {
        self.slots.lock().entries.get(&key).cloned()
    }

    /// Returns the existing entry or inserts the one produced by `supplier`.
    ///
    /// The store lock is held while `supplier` runs, so concurrent first
    /// reads of one key invoke it once. `supplier` must not call back into
    /// this store.
    pub fn read_or_create<T: Any + Send + Sync>(
        &self,
        key: StoreKey,
        supplier: impl FnOnce() -> T,
    ) -> Result<Entry<T>, RetainError> {
        self.read_or_create_with(key, || Retained::new(Arc::new(supplier())))
    }

    pub fn read_or_create_clearable<T: Clearable + Any>(
        &self,
        key: StoreKey,
        supplier: impl FnOnce() -> T,
    ) -> Result<Entry<T>, RetainError> {
        self.read_or_create_with(key, || Retained::clearable(Arc::new(supplier())))
    }

    fn read_or_create_with<T: Any + Send + Sync>(
        &self,
        key: StoreKey,
        supplier: impl FnOnce() -> Retained,
    ) -> Result<Entry<T>, RetainError> {
        let mut slots = self.slots.lock();
        let retained = match slots.entries.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                if slots.cleared {
                    return Err(RetainError::StoreCleared { store: self.id });
                }
                let created = supplier();
                slots.entries.insert(key, created.clone());
                log::trace!("store #{}: created {key:?}", self.id);
                created
            }
        };
        let value = retained
            .downcast::<T>()
            .ok_or(RetainError::TypeMismatch { key })?;
        Ok(Entry { key, value })
    }

    pub fn write<T: Any + Send + Sync>(
        &self,
        key: StoreKey,
        value: Arc<T>,
    ) -> Result<Entry<T>, RetainError> {
        self.write_retained(key, Retained::new(value.clone()))?;
        Ok(Entry { key, value })
    }

    pub fn write_clearable<T: Clearable + Any>(
        &self,
        key: StoreKey,
        value: Arc<T>,
    ) -> Result<Entry<T>, RetainError> {
        self.write_retained(key, Retained::clearable(value.clone()))?;
        Ok(Entry { key, value })
    }

    /// Replaces the mapping for `key`.
    ///
    /// A superseded value that is not the same allocation as `value` is
    /// scheduled for disposal before the new mapping becomes readable.
    pub fn write_retained(&self, key: StoreKey, value: Retained) -> Result<(), RetainError> {
        let mut slots = self.slots.lock();
        if slots.cleared {
            log::warn!("store #{}: write to {key:?} after teardown", self.id);
            return Err(RetainError::StoreCleared { store: self.id });
        }
        let superseded = slots.entries.insert(key, value.clone());
        match superseded {
            Some(old) if !old.same_value(&value) => {
                log::debug!("store #{}: {key:?} superseded", self.id);
                self.schedule_disposal(Some(key), old);
            }
            Some(_) => {}
            None => log::trace!("store #{}: wrote {key:?}", self.id),
        }
        Ok(())
    }

    /// Removes `key` and schedules its value for disposal. No-op if absent.
    pub fn forget(&self, key: StoreKey) {
        let removed = self.slots.lock().entries.shift_remove(&key);
        if let Some(old) = removed {
            log::debug!("store #{}: forgot {key:?}", self.id);
            self.schedule_disposal(Some(key), old);
        }
    }

    /// Disposes every remaining entry in insertion order and refuses further
    /// writes. Later calls do nothing.
    pub fn teardown(&self) {
        let mut slots = self.slots.lock();
        if slots.cleared {
            return;
        }
        slots.cleared = true;
        let drained: Vec<(StoreKey, Retained)> = slots.entries.drain(..).collect();
        log::debug!("store #{}: teardown, {} entries", self.id, drained.len());
        for (key, value) in drained {
            self.schedule_disposal(Some(key), value);
        }
    }

    /// Disposes a value that never made it into the mapping.
    pub(crate) fn dispose_detached(&self, value: Retained) {
        self.schedule_disposal(None, value);
    }

    fn schedule_disposal(&self, key: Option<StoreKey>, value: Retained) {
        if !value.is_clearable() {
            return;
        }
        let store = self.id;
        self.dispatcher.dispatch(Box::new(move || {
            match key {
                Some(key) => log::trace!("store #{store}: clearing {key:?}"),
                None => log::trace!("store #{store}: clearing detached `{}`", value.type_name()),
            }
            value.clear();
        }));
    }
}

/// Clearing a store (e.g. through its owner) tears it down.
impl Clearable for Store {
    fn on_cleared(&self) {
        self.teardown();
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("entries", &slots.entries.len())
            .field("cleared", &slots.cleared)
            .finish()
    }
}
