use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use holdover_core::{
    Lifecycle, LifecycleState, RememberObserver, key_group, local, local_lifecycle,
    remember_observer, remember_with_store, retain_config, with_local,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::SaveError;

/// Saved values by key; a key may hold several values when more than one
/// provider registered under it.
pub type Snapshot = BTreeMap<String, Vec<Value>>;

type Provider = Rc<dyn Fn() -> Result<Value, SaveError>>;

/// Collects serializable state from registered providers and hands restored
/// values back to whoever asks for them first.
#[derive(Default)]
pub struct SaveableStateRegistry {
    restored: RefCell<Snapshot>,
    providers: RefCell<BTreeMap<String, Vec<(u64, Provider)>>>,
    next_id: Cell<u64>,
}

impl SaveableStateRegistry {
    pub fn new(restored: Option<Snapshot>) -> Self {
        Self {
            restored: RefCell::new(restored.unwrap_or_default()),
            ..Self::default()
        }
    }

    pub fn can_be_saved<T: Serialize>(&self, value: &T) -> bool {
        serde_json::to_value(value).is_ok()
    }

    /// Takes the next restored value for `key`, if any is left.
    pub fn consume_restored(&self, key: &str) -> Option<Value> {
        let mut restored = self.restored.borrow_mut();
        let values = restored.get_mut(key)?;
        let value = (!values.is_empty()).then(|| values.remove(0));
        if values.is_empty() {
            restored.remove(key);
        }
        value
    }

    pub fn register_provider(
        self: &Rc<Self>,
        key: &str,
        provider: impl Fn() -> Result<Value, SaveError> + 'static,
    ) -> Result<ProviderEntry, SaveError> {
        if key.trim().is_empty() {
            return Err(SaveError::BlankKey);
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.providers
            .borrow_mut()
            .entry(key.to_string())
            .or_default()
            .push((id, Rc::new(provider)));
        Ok(ProviderEntry {
            registry: Rc::downgrade(self),
            key: key.to_string(),
            id,
        })
    }

    /// Restored values nobody consumed, plus the current output of every
    /// provider.
    pub fn perform_save(&self) -> Result<Snapshot, SaveError> {
        let mut snapshot = self.restored.borrow().clone();
        let providers: Vec<(String, Vec<Provider>)> = self
            .providers
            .borrow()
            .iter()
            .map(|(k, list)| (k.clone(), list.iter().map(|(_, p)| p.clone()).collect()))
            .collect();
        for (key, list) in providers {
            let values = list.iter().map(|p| p()).collect::<Result<Vec<_>, _>>()?;
            snapshot.insert(key, values);
        }
        Ok(snapshot)
    }
}

/// Handle returned by [`SaveableStateRegistry::register_provider`].
pub struct ProviderEntry {
    registry: Weak<SaveableStateRegistry>,
    key: String,
    id: u64,
}

impl ProviderEntry {
    pub fn unregister(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut providers = registry.providers.borrow_mut();
        if let Some(list) = providers.get_mut(&self.key) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                providers.remove(&self.key);
            }
        }
    }
}

pub fn with_saveable_registry<R>(registry: Rc<SaveableStateRegistry>, f: impl FnOnce() -> R) -> R {
    with_local(registry, f)
}

pub fn local_saveable_registry() -> Option<Rc<SaveableStateRegistry>> {
    local::<Rc<SaveableStateRegistry>>()
}

/// Last snapshot taken for a scoped registry; lives in the store.
#[derive(Default)]
struct SnapshotHolder {
    saved: Mutex<Option<Snapshot>>,
}

struct RegistrySaver {
    holder: Arc<SnapshotHolder>,
    registry: Rc<SaveableStateRegistry>,
}

impl RememberObserver for RegistrySaver {
    fn on_forgotten(&self) {
        match self.registry.perform_save() {
            Ok(snapshot) => {
                log::debug!("saveable registry saved {} key(s)", snapshot.len());
                *self.holder.saved.lock() = Some(snapshot);
            }
            Err(err) => log::warn!("saveable registry: save failed: {err}"),
        }
    }
}

/// Runs `content` with a fresh [`SaveableStateRegistry`].
///
/// The registry is restored from the snapshot taken when the previous
/// incarnation of this call site left the composition; the snapshot itself
/// is retained in the ambient store, so it survives host recreation.
#[track_caller]
pub fn scoped_saveable_state_registry<R>(content: impl FnOnce() -> R) -> Result<R, SaveError> {
    let holder = key_group("snapshot", || remember_with_store(None, SnapshotHolder::default))?;
    let saver = key_group("saver", || {
        remember_observer(|| RegistrySaver {
            registry: Rc::new(SaveableStateRegistry::new(holder.saved.lock().clone())),
            holder: holder.clone(),
        })
    });
    Ok(with_saveable_registry(saver.registry.clone(), content))
}

struct SaveableSlot<T> {
    key: String,
    state: Rc<RefCell<T>>,
    registry: Option<Rc<SaveableStateRegistry>>,
    entry: RefCell<Option<ProviderEntry>>,
    lifecycle: Option<Lifecycle>,
    forget_threshold: LifecycleState,
}

impl<T: Serialize + 'static> RememberObserver for SaveableSlot<T> {
    fn on_remembered(&self) {
        let Some(registry) = &self.registry else {
            return;
        };
        let state = self.state.clone();
        let key = self.key.clone();
        let provider = move || {
            serde_json::to_value(&*state.borrow()).map_err(|source| SaveError::Serde {
                key: key.clone(),
                source,
            })
        };
        match registry.register_provider(&self.key, provider) {
            Ok(entry) => *self.entry.borrow_mut() = Some(entry),
            Err(err) => log::warn!("remember_saveable: {err}"),
        }
    }

    // During a recreation the provider stays registered so the enclosing
    // registry still sees it when it saves.
    fn on_forgotten(&self) {
        let recreating = self
            .lifecycle
            .as_ref()
            .is_some_and(|l| !l.current_state().is_at_least(self.forget_threshold));
        if recreating {
            return;
        }
        if let Some(entry) = self.entry.borrow_mut().take() {
            entry.unregister();
        }
    }
}

/// Like `remember_state`, but the value is saved into the ambient registry
/// and restored from it when the call site is recreated.
///
/// Without a registry in scope this is a plain remembered state.
#[track_caller]
pub fn remember_saveable<T>(key: impl Into<String>, init: impl FnOnce() -> T) -> Rc<RefCell<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    let key = key.into();
    let slot = remember_observer(|| {
        let registry = local_saveable_registry();
        let restored = registry
            .as_ref()
            .and_then(|r| r.consume_restored(&key))
            .and_then(|v| match serde_json::from_value::<T>(v) {
                Ok(value) => Some(value),
                Err(err) => {
                    log::warn!("remember_saveable: dropping unreadable state for `{key}`: {err}");
                    None
                }
            });
        SaveableSlot {
            state: Rc::new(RefCell::new(restored.unwrap_or_else(init))),
            key: key.clone(),
            registry,
            entry: RefCell::new(None),
            lifecycle: local_lifecycle(),
            forget_threshold: retain_config().forget_threshold,
        }
    });
    slot.state.clone()
}
