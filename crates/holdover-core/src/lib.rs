//! # Stores, Bindings, and Compositions
//!
//! Holdover keeps arbitrary in-memory objects alive across a host
//! recreation (rotation, window re-creation) without serializing them. Three
//! pieces cooperate:
//!
//! - `Store` — lifecycle‑scoped map from call-site key to value, owned by a
//!   `StoreOwner` that outlives the composition.
//! - `Binding` — one per `remember_with_store` call site; decides whether a
//!   pass reuses the stored value or makes a new one, and whether leaving
//!   the composition forgets it.
//! - `Composition` — the slot table and pass lifecycle driving bindings.
//!
//! ## Retaining a value
//!
//! ```rust
//! use std::sync::Arc;
//! use holdover_core::*;
//!
//! struct Session(u32);
//!
//! let queue = Arc::new(MainQueue::new());
//! let owner = Arc::new(StoreOwner::new(queue.clone()));
//! let lifecycle = Lifecycle::new(LifecycleState::Resumed);
//!
//! let screen = || {
//!     with_store_owner(owner.clone(), || {
//!         with_lifecycle(lifecycle.clone(), || {
//!             remember_with_store(None, || Session(7)).unwrap()
//!         })
//!     })
//! };
//!
//! let mut first = None;
//! let composition = Composition::new();
//! composition.recompose(|| first = Some(screen()));
//!
//! // Recreation: the host pauses, drops the old tree and builds a new one.
//! lifecycle.set_state(LifecycleState::Created);
//! composition.dispose();
//! let mut second = None;
//! Composition::new().recompose(|| second = Some(screen()));
//!
//! assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
//! ```
//!
//! ## Disposal
//!
//! Values implementing `Clearable` (retained with
//! `remember_clearable_with_store`) get `on_cleared` exactly once when they
//! are superseded, forgotten, or their store is torn down. The call is
//! queued on the owner's `MainDispatcher`; with `MainQueue` the host runs it
//! from its main loop via `run_pending()`.
//!
//! ## Extra keys
//!
//! Passing a different `ExtraKey` on a later pass resets the call site: the
//! old value is forgotten when the pass commits and `init` runs again.

pub mod binding;
pub mod clearable;
pub mod composition;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod locals;
pub mod owner;
pub mod prelude;
pub mod runtime;
pub mod store;

pub use binding::*;
pub use clearable::*;
pub use composition::*;
pub use dispatch::*;
pub use error::*;
pub use lifecycle::*;
pub use locals::*;
pub use owner::*;
pub use runtime::*;
pub use store::*;
