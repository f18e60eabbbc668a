use std::sync::Arc;

use parking_lot::RwLock;

/// Host lifecycle states, ordered from dead to fully active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LifecycleState {
    Destroyed,
    #[default]
    Initialized,
    Created,
    Started,
    Resumed,
}

impl LifecycleState {
    pub fn is_at_least(self, other: LifecycleState) -> bool {
        self >= other
    }
}

/// Observed handle to the host screen's lifecycle.
///
/// The host moves it through its states; bindings only read it. Clones share
/// the same state.
#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    state: Arc<RwLock<LifecycleState>>,
}

impl Lifecycle {
    pub fn new(initial: LifecycleState) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn current_state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn set_state(&self, state: LifecycleState) {
        let prev = std::mem::replace(&mut *self.state.write(), state);
        if prev != state {
            log::debug!("lifecycle {prev:?} -> {state:?}");
        }
    }

    pub fn same_as(&self, other: &Lifecycle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}
