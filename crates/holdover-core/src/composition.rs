//! # Composition passes and remembered slots
//!
//! A [`Composition`] owns a slot table. Each call to [`Composition::compose`]
//! runs the content closure as one pass; every `remember*` call inside it
//! resolves to a slot keyed by the structural position of the call site:
//!
//! - the key of the enclosing group (the root, or a [`key_group`]),
//! - the caller's source location (`#[track_caller]`).
//!
//! So the same line in a different branch, or in a different keyed group,
//! gets a different key, while re-running the same content hits the same
//! slots. A location reached twice in one group (a loop, or a helper that is
//! not `#[track_caller]` called from several places) has no key of its own:
//! the second claim fails with [`RetainError::DuplicateCallSite`]. Wrap each
//! repetition in a [`key_group`] instead.
//!
//! A pass does not touch the slot table until it is committed:
//!
//! ```rust
//! use holdover_core::*;
//!
//! let composition = Composition::new();
//! let pass = composition.compose(|| {
//!     let n = remember(|| 41);
//!     side_effect(move || assert_eq!(*n, 41));
//! });
//! pass.commit(); // slots applied, observers notified, side effects run
//! assert_eq!(composition.slot_count(), 1);
//! ```
//!
//! On commit, slots that were not revisited are forgotten (reverse order),
//! new slots are remembered, then side effects run in registration order.
//! An abandoned pass reports `on_abandoned` to the slots it created and drops
//! its side effects.

use std::any::Any;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::RetainError;
use crate::store::StoreKey;

/// Structural identity of a call site within a composition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey(u64);

impl CompositeKey {
    pub const ROOT: CompositeKey = CompositeKey(0);

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl From<CompositeKey> for StoreKey {
    fn from(key: CompositeKey) -> Self {
        StoreKey(key.0)
    }
}

/// Composition lifecycle of a remembered object.
pub trait RememberObserver {
    /// The pass that created this object committed.
    fn on_remembered(&self) {}
    /// The object's call site left the composition.
    fn on_forgotten(&self) {}
    /// The pass that created this object was discarded.
    fn on_abandoned(&self) {}
}

struct Slot {
    value: Rc<dyn Any>,
    observer: Option<Rc<dyn RememberObserver>>,
}

type SlotTable = IndexMap<CompositeKey, Slot>;

struct PassState {
    table: Rc<RefCell<SlotTable>>,
    groups: Vec<CompositeKey>,
    claimed: HashSet<CompositeKey>,
    visited: HashSet<CompositeKey>,
    created: IndexMap<CompositeKey, Slot>,
    effects: Vec<Box<dyn FnOnce()>>,
}

impl PassState {
    fn new(table: Rc<RefCell<SlotTable>>) -> Self {
        Self {
            table,
            groups: vec![CompositeKey::ROOT],
            claimed: HashSet::new(),
            visited: HashSet::new(),
            created: IndexMap::new(),
            effects: Vec::new(),
        }
    }

    fn group_key(&self) -> CompositeKey {
        self.groups.last().copied().unwrap_or(CompositeKey::ROOT)
    }

    fn claim(
        &mut self,
        location: &'static Location<'static>,
    ) -> Result<CompositeKey, RetainError> {
        let key = mix(self.group_key(), location, 0, 0);
        if !self.claimed.insert(key) {
            return Err(RetainError::DuplicateCallSite { location });
        }
        Ok(key)
    }

    fn lookup(&mut self, key: CompositeKey) -> Option<Rc<dyn Any>> {
        if !self.visited.insert(key) {
            log::warn!("composite key {key:?} used twice in one pass; use key_group for repeated content");
        }
        if let Some(slot) = self.created.get(&key) {
            return Some(slot.value.clone());
        }
        self.table.borrow().get(&key).map(|slot| slot.value.clone())
    }
}

thread_local! {
    static PASSES: RefCell<Vec<PassState>> = const { RefCell::new(Vec::new()) };
}

fn mix(parent: CompositeKey, location: &Location<'_>, kind: u8, salt: u64) -> CompositeKey {
    let mut h = DefaultHasher::new();
    parent.0.hash(&mut h);
    location.file().hash(&mut h);
    location.line().hash(&mut h);
    location.column().hash(&mut h);
    kind.hash(&mut h);
    salt.hash(&mut h);
    CompositeKey(h.finish())
}

// Never call user code from `f`: the pass stack stays borrowed.
fn with_current_pass<R>(f: impl FnOnce(&mut PassState) -> R) -> Option<R> {
    PASSES.with(|passes| passes.borrow_mut().last_mut().map(f))
}

pub fn is_composing() -> bool {
    PASSES.with(|passes| !passes.borrow().is_empty())
}

/// Claims the key for the caller's location in the current group.
///
/// Each key can be claimed once per pass.
#[track_caller]
pub fn call_site_key() -> Result<CompositeKey, RetainError> {
    let location = Location::caller();
    with_current_pass(|pass| pass.claim(location)).unwrap_or(Err(RetainError::NotComposing {
        operation: "call_site_key",
    }))
}

/// Runs `content` in a group identified by `key`, so that repeated content
/// (list items, movable branches) keeps its slots by key instead of by order.
#[track_caller]
pub fn key_group<K: Hash, R>(key: K, content: impl FnOnce() -> R) -> R {
    let location = Location::caller();
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    let salt = h.finish();

    let pushed = with_current_pass(|pass| {
        let group = mix(pass.group_key(), location, 1, salt);
        pass.groups.push(group);
    })
    .is_some();
    if !pushed {
        return content();
    }

    struct PopGroup;
    impl Drop for PopGroup {
        fn drop(&mut self) {
            with_current_pass(|pass| {
                if pass.groups.len() > 1 {
                    pass.groups.pop();
                }
            });
        }
    }
    let _guard = PopGroup;
    content()
}

/// Slot-based remember keyed by call site.
///
/// Outside a pass nothing is retained and `init` runs every time.
#[track_caller]
pub fn remember<T: 'static>(init: impl FnOnce() -> T) -> Rc<T> {
    match call_site_key() {
        Ok(key) => remember_at(key, init, |_| None),
        Err(err) => {
            log::warn!("remember: {err}; value is not retained");
            Rc::new(init())
        }
    }
}

/// Like [`remember`], and `value` receives the slot's lifecycle callbacks.
#[track_caller]
pub fn remember_observer<T: RememberObserver + 'static>(init: impl FnOnce() -> T) -> Rc<T> {
    match call_site_key() {
        Ok(key) => remember_observer_at(key, init),
        Err(err) => {
            log::warn!("remember_observer: {err}; no callbacks");
            Rc::new(init())
        }
    }
}

/// [`remember_observer`] for a key the caller already claimed.
pub fn remember_observer_at<T: RememberObserver + 'static>(
    key: CompositeKey,
    init: impl FnOnce() -> T,
) -> Rc<T> {
    fn observe<T: RememberObserver + 'static>(value: &Rc<T>) -> Option<Rc<dyn RememberObserver>> {
        Some(value.clone() as Rc<dyn RememberObserver>)
    }
    remember_at(key, init, observe::<T>)
}

fn remember_at<T: 'static>(
    key: CompositeKey,
    init: impl FnOnce() -> T,
    observe: fn(&Rc<T>) -> Option<Rc<dyn RememberObserver>>,
) -> Rc<T> {
    if let Some(existing) = with_current_pass(|pass| pass.lookup(key)).flatten() {
        match existing.downcast::<T>() {
            Ok(value) => return value,
            Err(_) => log::warn!("remember: slot {key:?} type changed; replacing"),
        }
    }

    let value = Rc::new(init());
    let slot = Slot {
        value: value.clone(),
        observer: observe(&value),
    };
    let displaced = with_current_pass(|pass| pass.created.insert(key, slot)).flatten();
    if let Some(observer) = displaced.and_then(|slot| slot.observer) {
        observer.on_abandoned();
    }
    value
}

/// Runs `effect` once the current pass commits. Outside a pass it runs
/// immediately.
pub fn side_effect(effect: impl FnOnce() + 'static) {
    let mut effect: Option<Box<dyn FnOnce()>> = Some(Box::new(effect));
    with_current_pass(|pass| {
        if let Some(effect) = effect.take() {
            pass.effects.push(effect);
        }
    });
    if let Some(effect) = effect {
        effect();
    }
}

#[derive(Default)]
pub struct Composition {
    table: Rc<RefCell<SlotTable>>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_count(&self) -> usize {
        self.table.borrow().len()
    }

    /// Runs `content` as a pass. Nothing is applied until the returned pass
    /// is committed.
    pub fn compose(&self, content: impl FnOnce()) -> PendingPass {
        PASSES.with(|passes| passes.borrow_mut().push(PassState::new(self.table.clone())));

        // Non-panicking frame guard (ensures pop on unwind)
        struct Guard {
            armed: bool,
        }
        impl Drop for Guard {
            fn drop(&mut self) {
                if self.armed {
                    PASSES.with(|passes| {
                        passes.borrow_mut().pop();
                    });
                }
            }
        }
        let mut guard = Guard { armed: true };
        content();
        guard.armed = false;

        let state = PASSES.with(|passes| passes.borrow_mut().pop());
        PendingPass {
            table: self.table.clone(),
            state,
        }
    }

    /// Compose and commit in one go.
    pub fn recompose(&self, content: impl FnOnce()) {
        self.compose(content).commit();
    }

    /// Tears the whole tree down: every slot is forgotten, newest first.
    pub fn dispose(&self) {
        let slots: Vec<Slot> = self.table.borrow_mut().drain(..).map(|(_, s)| s).collect();
        log::debug!("composition disposed, {} slot(s)", slots.len());
        for slot in slots.iter().rev() {
            if let Some(observer) = &slot.observer {
                observer.on_forgotten();
            }
        }
    }
}

/// A pass whose outcome has not been decided yet. Dropping it abandons it.
#[must_use = "a pass is only applied when committed"]
pub struct PendingPass {
    table: Rc<RefCell<SlotTable>>,
    state: Option<PassState>,
}

impl PendingPass {
    pub fn commit(mut self) {
        let Some(state) = self.state.take() else {
            return;
        };

        let (forgotten, remembered) = {
            let mut table = self.table.borrow_mut();
            let stale: Vec<CompositeKey> = table
                .keys()
                .filter(|k| !state.visited.contains(*k))
                .copied()
                .collect();
            let mut forgotten: Vec<Slot> =
                stale.iter().filter_map(|k| table.shift_remove(k)).collect();

            let mut remembered = Vec::new();
            for (key, slot) in state.created {
                if let Some(observer) = &slot.observer {
                    remembered.push(observer.clone());
                }
                if let Some(replaced) = table.insert(key, slot) {
                    forgotten.push(replaced);
                }
            }
            (forgotten, remembered)
        };
        log::trace!(
            "pass committed: {} forgotten, {} remembered, {} effect(s)",
            forgotten.len(),
            remembered.len(),
            state.effects.len()
        );

        for slot in forgotten.iter().rev() {
            if let Some(observer) = &slot.observer {
                observer.on_forgotten();
            }
        }
        for observer in remembered {
            observer.on_remembered();
        }
        for effect in state.effects {
            effect();
        }
    }

    pub fn abandon(mut self) {
        self.abandon_inner();
    }

    fn abandon_inner(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        log::debug!("pass abandoned, {} new slot(s) discarded", state.created.len());
        for (_, slot) in state.created.iter().rev() {
            if let Some(observer) = &slot.observer {
                observer.on_abandoned();
            }
        }
    }
}

impl Drop for PendingPass {
    fn drop(&mut self) {
        self.abandon_inner();
    }
}
