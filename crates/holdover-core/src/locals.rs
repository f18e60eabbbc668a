//! # Composition locals
//!
//! Holdover reads its ambient dependencies from thread‑local “composition
//! locals” instead of globals:
//!
//! - `StoreOwner` — the lifecycle scope whose `Store` backs
//!   `remember_with_store`.
//! - `Lifecycle` — the host screen's lifecycle, consulted when a call site
//!   leaves the composition.
//! - `RetainConfig` — tuning for bindings.
//!
//! Override them for a subtree with `with_store_owner`, `with_lifecycle` and
//! `with_retain_config`:
//!
//! ```rust
//! use std::sync::Arc;
//! use holdover_core::*;
//!
//! let queue = Arc::new(MainQueue::new());
//! let owner = Arc::new(StoreOwner::new(queue));
//!
//! with_store_owner(owner.clone(), || {
//!     assert!(Arc::ptr_eq(&local_store_owner().unwrap(), &owner));
//! });
//! assert!(local_store_owner().is_none());
//! ```
//!
//! Other crates can provide their own locals with [`with_local`] and read
//! them back with [`local`].

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::owner::StoreOwner;

thread_local! {
    static LOCALS_STACK: RefCell<Vec<HashMap<TypeId, Box<dyn Any>>>> = const { RefCell::new(Vec::new()) };
}

fn with_locals_frame<R>(f: impl FnOnce() -> R) -> R {
    // Non-panicking frame guard (ensures pop on unwind)
    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {
            LOCALS_STACK.with(|st| {
                st.borrow_mut().pop();
            });
        }
    }
    LOCALS_STACK.with(|st| st.borrow_mut().push(HashMap::new()));
    let _guard = Guard;
    f()
}

fn set_local_boxed(t: TypeId, v: Box<dyn Any>) {
    LOCALS_STACK.with(|st| {
        if let Some(top) = st.borrow_mut().last_mut() {
            top.insert(t, v);
        }
    });
}

/// Provides `value` to everything `f` composes.
pub fn with_local<T: Clone + 'static, R>(value: T, f: impl FnOnce() -> R) -> R {
    with_locals_frame(|| {
        set_local_boxed(TypeId::of::<T>(), Box::new(value));
        f()
    })
}

/// Innermost provided value of type `T`, if any.
pub fn local<T: Clone + 'static>() -> Option<T> {
    LOCALS_STACK.with(|st| {
        for frame in st.borrow().iter().rev() {
            if let Some(v) = frame.get(&TypeId::of::<T>())
                && let Some(t) = v.downcast_ref::<T>()
            {
                return Some(t.clone());
            }
        }
        None
    })
}

/// Tuning for `remember_with_store` bindings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetainConfig {
    /// A call site leaving the composition forgets its value only if the host
    /// lifecycle is at least this state. Below it, the removal is taken to be
    /// part of a recreation and the value is kept for the next call site.
    pub forget_threshold: LifecycleState,
}

impl Default for RetainConfig {
    fn default() -> Self {
        Self {
            forget_threshold: LifecycleState::Resumed,
        }
    }
}

// Typed API

pub fn with_store_owner<R>(owner: Arc<StoreOwner>, f: impl FnOnce() -> R) -> R {
    with_local(owner, f)
}

pub fn with_lifecycle<R>(lifecycle: Lifecycle, f: impl FnOnce() -> R) -> R {
    with_local(lifecycle, f)
}

pub fn with_retain_config<R>(config: RetainConfig, f: impl FnOnce() -> R) -> R {
    with_local(config, f)
}

pub fn local_store_owner() -> Option<Arc<StoreOwner>> {
    local::<Arc<StoreOwner>>()
}

pub fn local_lifecycle() -> Option<Lifecycle> {
    local::<Lifecycle>()
}

pub fn retain_config() -> RetainConfig {
    local::<RetainConfig>().unwrap_or_default()
}
