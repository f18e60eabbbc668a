//! Per-call-site bridge between a composition slot and a [`Store`] entry.
//!
//! A [`Binding`] lives in the composition slot of a `remember_with_store`
//! call site. Every pass asks it which value to use
//! ([`Binding::resolve_value_for_pass`]); once the pass commits the value is
//! registered in the store ([`Binding::commit_pass`]). When the call site
//! leaves the composition the binding decides, from the host lifecycle,
//! whether this is a permanent removal (forget the entry) or a recreation
//! (keep it for the call site that replaces this one).

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clearable::{ExtraKey, Retained};
use crate::composition::RememberObserver;
use crate::error::RetainError;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::store::{Store, StoreKey};

/// Where a binding's value lives, as of its last commit.
struct Bound {
    store: Arc<Store>,
    key: StoreKey,
    extra_key: Option<ExtraKey>,
    lifecycle: Option<Lifecycle>,
    value: Retained,
}

impl Bound {
    fn targets(&self, store: &Arc<Store>, key: StoreKey, extra_key: Option<&ExtraKey>) -> bool {
        Arc::ptr_eq(&self.store, store) && self.key == key && self.extra_key.as_ref() == extra_key
    }
}

/// Value handed out by a pass that has not committed yet.
struct Pending {
    store: Arc<Store>,
    key: StoreKey,
    extra_key: Option<ExtraKey>,
    value: Retained,
    /// Produced by the supplier rather than adopted from the store.
    fresh: bool,
}

impl Pending {
    fn targets(&self, store: &Arc<Store>, key: StoreKey, extra_key: Option<&ExtraKey>) -> bool {
        Arc::ptr_eq(&self.store, store) && self.key == key && self.extra_key.as_ref() == extra_key
    }

    /// A fresh value never reached the store, so nothing else will clear it.
    fn discard(self) {
        if self.fresh {
            log::debug!("binding: discarding uncommitted value for {:?}", self.key);
            self.store.dispose_detached(self.value);
        }
    }
}

pub struct Binding {
    forget_threshold: LifecycleState,
    bound: Mutex<Option<Bound>>,
    pending: Mutex<Option<Pending>>,
}

impl Binding {
    pub fn new(forget_threshold: LifecycleState) -> Self {
        Self {
            forget_threshold,
            bound: Mutex::new(None),
            pending: Mutex::new(None),
        }
    }

    /// Chooses the value for this pass.
    ///
    /// Reuses a known value when `store`, `key` and `extra_key` match what the
    /// binding is bound to: the registered entry, or the value committed last
    /// if the entry is gone. A new binding adopts a stored value produced
    /// under `extra_key`. Otherwise `supplier` runs once and
    /// its value is held as pending until [`commit_pass`](Self::commit_pass).
    pub fn resolve_value_for_pass(
        &self,
        store: &Arc<Store>,
        key: StoreKey,
        extra_key: Option<&ExtraKey>,
        value_type: TypeId,
        supplier: impl FnOnce() -> Retained,
    ) -> Retained {
        let stale = {
            let mut pending = self.pending.lock();
            let reusable = pending
                .as_ref()
                .filter(|p| p.targets(store, key, extra_key) && p.value.value_type() == value_type)
                .map(|p| p.value.clone());
            if let Some(value) = reusable {
                return value;
            }
            pending.take()
        };
        if let Some(stale) = stale {
            stale.discard();
        }

        let registered = || {
            store
                .read_retained(key)
                .filter(|v| v.value_type() == value_type && v.tag() == extra_key)
        };
        let adopted = match self.bound.lock().as_ref() {
            // The entry may have been removed from under us; the held value
            // is re-registered on commit.
            Some(bound) if bound.targets(store, key, extra_key) => registered().or_else(|| {
                Some(bound.value.clone()).filter(|v| v.value_type() == value_type)
            }),
            Some(_) => None,
            None => registered(),
        };

        let (value, fresh) = match adopted {
            Some(value) => (value, false),
            None => {
                log::debug!("binding: producing a new value for {key:?} in store #{}", store.id());
                (supplier(), true)
            }
        };

        *self.pending.lock() = Some(Pending {
            store: store.clone(),
            key,
            extra_key: extra_key.cloned(),
            value: value.clone(),
            fresh,
        });
        value
    }

    /// Registers `value` once its pass is known to stick.
    ///
    /// If the target moved (other store, key or extra key), the previous
    /// entry is forgotten first, whatever the lifecycle state.
    pub fn commit_pass(
        &self,
        value: &Retained,
        store: &Arc<Store>,
        lifecycle: Option<Lifecycle>,
        key: StoreKey,
        extra_key: Option<&ExtraKey>,
    ) -> Result<(), RetainError> {
        {
            let mut pending = self.pending.lock();
            if pending.as_ref().is_some_and(|p| p.value.same_value(value)) {
                pending.take();
            }
        }

        let mut bound = self.bound.lock();
        if let Some(prev) = bound.as_ref()
            && !prev.targets(store, key, extra_key)
        {
            log::debug!(
                "binding: retargeted, forgetting {:?} in store #{}",
                prev.key,
                prev.store.id()
            );
            prev.store.forget(prev.key);
        }

        let registered = store
            .read_retained(key)
            .is_some_and(|current| current.same_value(value) && current.tag() == value.tag());
        let written = if registered {
            Ok(())
        } else {
            store.write_retained(key, value.clone())
        };

        *bound = Some(Bound {
            store: store.clone(),
            key,
            extra_key: extra_key.cloned(),
            lifecycle,
            value: value.clone(),
        });
        written
    }

    /// The call site left the composition for good.
    ///
    /// Forgets the entry when the host lifecycle is at or above the forget
    /// threshold (or unknown); otherwise the host is recreating and the entry
    /// must survive.
    pub fn on_call_site_torn_down(&self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.discard();
        }
        let Some(bound) = self.bound.lock().take() else {
            return;
        };
        let active = bound
            .lifecycle
            .as_ref()
            .is_none_or(|l| l.current_state().is_at_least(self.forget_threshold));
        if active {
            bound.store.forget(bound.key);
        } else {
            log::debug!(
                "binding: {:?} torn down during recreation; kept in store #{}",
                bound.key,
                bound.store.id()
            );
        }
    }

    /// The pass that created this binding was discarded before committing.
    ///
    /// Nothing was registered by this binding; a value it produced is
    /// disposed, a value it adopted from the store stays there.
    pub fn on_call_site_abandoned_before_commit(&self) {
        if let Some(pending) = self.pending.lock().take() {
            pending.discard();
        }
        self.bound.lock().take();
    }

    pub fn is_bound(&self) -> bool {
        self.bound.lock().is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl RememberObserver for Binding {
    fn on_forgotten(&self) {
        self.on_call_site_torn_down();
    }

    fn on_abandoned(&self) {
        self.on_call_site_abandoned_before_commit();
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = self.bound.lock();
        f.debug_struct("Binding")
            .field("key", &bound.as_ref().map(|b| b.key))
            .field("store", &bound.as_ref().map(|b| b.store.id()))
            .field("extra_key", &bound.as_ref().and_then(|b| b.extra_key.clone()))
            .field("value", &bound.as_ref().map(|b| b.value.type_name()))
            .field("pending", &self.pending.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{Clearable, MainQueue};

    #[derive(Default)]
    struct Counted(AtomicUsize);

    impl Clearable for Counted {
        fn on_cleared(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fresh() -> Retained {
        Retained::clearable(Arc::new(Counted::default()))
    }

    fn cleared(v: &Retained) -> usize {
        v.downcast::<Counted>().unwrap().0.load(Ordering::SeqCst)
    }

    fn setup() -> (Arc<MainQueue>, Arc<Store>) {
        let queue = Arc::new(MainQueue::new());
        let store = Arc::new(Store::new(queue.clone()));
        (queue, store)
    }

    const KEY: StoreKey = StoreKey(11);
    fn ty() -> TypeId {
        TypeId::of::<Counted>()
    }

    #[test]
    fn test_pending_is_reused_until_commit() {
        let (_queue, store) = setup();
        let binding = Binding::new(LifecycleState::Resumed);

        let a = binding.resolve_value_for_pass(&store, KEY, None, ty(), fresh);
        let b = binding.resolve_value_for_pass(&store, KEY, None, ty(), || panic!("supplier"));
        assert!(a.same_value(&b));
        assert!(binding.has_pending());

        binding.commit_pass(&a, &store, None, KEY, None).unwrap();
        assert!(!binding.has_pending());
        assert!(store.read_retained(KEY).unwrap().same_value(&a));

        let c = binding.resolve_value_for_pass(&store, KEY, None, ty(), || panic!("supplier"));
        assert!(c.same_value(&a));
    }

    #[test]
    fn test_extra_key_change_forgets_old_entry_at_commit() {
        let (queue, store) = setup();
        let binding = Binding::new(LifecycleState::Resumed);
        let k1 = ExtraKey::new(1);
        let k2 = ExtraKey::new(2);

        let first = binding.resolve_value_for_pass(&store, KEY, Some(&k1), ty(), || {
            fresh().tagged(Some(k1.clone()))
        });
        binding.commit_pass(&first, &store, None, KEY, Some(&k1)).unwrap();

        let second = binding.resolve_value_for_pass(&store, KEY, Some(&k2), ty(), || {
            fresh().tagged(Some(k2.clone()))
        });
        assert!(!second.same_value(&first));
        binding.commit_pass(&second, &store, None, KEY, Some(&k2)).unwrap();

        queue.run_pending();
        assert_eq!(cleared(&first), 1);
        assert_eq!(cleared(&second), 0);
        assert!(store.read_retained(KEY).unwrap().same_value(&second));
    }

    #[test]
    fn test_new_binding_adopts_value_with_same_extra_key() {
        let (_queue, store) = setup();
        let tag = ExtraKey::new("user-7");
        let value = fresh().tagged(Some(tag.clone()));
        store.write_retained(KEY, value.clone()).unwrap();

        let binding = Binding::new(LifecycleState::Resumed);
        let adopted =
            binding.resolve_value_for_pass(&store, KEY, Some(&tag), ty(), || panic!("supplier"));
        assert!(adopted.same_value(&value));

        let other = Binding::new(LifecycleState::Resumed);
        let user8 = ExtraKey::new("user-8");
        let replaced = other.resolve_value_for_pass(&store, KEY, Some(&user8), ty(), fresh);
        assert!(!replaced.same_value(&value));
    }

    #[test]
    fn test_teardown_below_threshold_keeps_entry() {
        let (queue, store) = setup();
        let lifecycle = Lifecycle::new(LifecycleState::Resumed);
        let binding = Binding::new(LifecycleState::Resumed);
        let v = binding.resolve_value_for_pass(&store, KEY, None, ty(), fresh);
        binding
            .commit_pass(&v, &store, Some(lifecycle.clone()), KEY, None)
            .unwrap();

        lifecycle.set_state(LifecycleState::Created);
        binding.on_call_site_torn_down();
        queue.run_pending();
        assert_eq!(cleared(&v), 0);
        assert!(store.contains(KEY));
    }

    #[test]
    fn test_teardown_when_resumed_forgets_entry() {
        let (queue, store) = setup();
        let lifecycle = Lifecycle::new(LifecycleState::Resumed);
        let binding = Binding::new(LifecycleState::Resumed);
        let v = binding.resolve_value_for_pass(&store, KEY, None, ty(), fresh);
        binding.commit_pass(&v, &store, Some(lifecycle), KEY, None).unwrap();

        binding.on_call_site_torn_down();
        queue.run_pending();
        assert_eq!(cleared(&v), 1);
        assert!(!store.contains(KEY));
    }

    #[test]
    fn test_abandon_disposes_fresh_value_only() {
        let (queue, store) = setup();
        let binding = Binding::new(LifecycleState::Resumed);
        let v = binding.resolve_value_for_pass(&store, KEY, None, ty(), fresh);
        binding.on_call_site_abandoned_before_commit();
        queue.run_pending();
        assert_eq!(cleared(&v), 1);
        assert!(!store.contains(KEY));

        let kept = fresh();
        store.write_retained(KEY, kept.clone()).unwrap();
        let adopter = Binding::new(LifecycleState::Resumed);
        adopter.resolve_value_for_pass(&store, KEY, None, ty(), || panic!("supplier"));
        adopter.on_call_site_abandoned_before_commit();
        queue.run_pending();
        assert_eq!(cleared(&kept), 0);
        assert!(store.contains(KEY));
    }

    #[test]
    fn test_held_value_is_reused_after_entry_removed() {
        let (_queue, store) = setup();
        let binding = Binding::new(LifecycleState::Resumed);
        let tag = ExtraKey::new(3u8);

        let v = binding.resolve_value_for_pass(&store, KEY, Some(&tag), ty(), || {
            fresh().tagged(Some(tag.clone()))
        });
        binding.commit_pass(&v, &store, None, KEY, Some(&tag)).unwrap();

        store.forget(KEY);
        let again =
            binding.resolve_value_for_pass(&store, KEY, Some(&tag), ty(), || panic!("supplier"));
        assert!(again.same_value(&v));

        binding.commit_pass(&again, &store, None, KEY, Some(&tag)).unwrap();
        assert!(store.read_retained(KEY).unwrap().same_value(&v));
        assert!(!binding.has_pending());
    }

    #[test]
    fn test_store_change_forgets_old_store_entry() {
        let (queue, outer) = setup();
        let inner = Arc::new(Store::new(queue.clone()));
        let binding = Binding::new(LifecycleState::Resumed);

        let a = binding.resolve_value_for_pass(&outer, KEY, None, ty(), fresh);
        binding.commit_pass(&a, &outer, None, KEY, None).unwrap();
        let b = binding.resolve_value_for_pass(&inner, KEY, None, ty(), fresh);
        binding.commit_pass(&b, &inner, None, KEY, None).unwrap();

        queue.run_pending();
        assert_eq!(cleared(&a), 1);
        assert!(!outer.contains(KEY));
        assert!(inner.contains(KEY));
    }
}
