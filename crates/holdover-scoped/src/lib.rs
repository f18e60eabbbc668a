//! Convenience providers built on `remember_with_store`:
//!
//! - [`scoped_store_owner`] — a nested `StoreOwner` for a subtree.
//! - [`scoped_saveable_state_registry`] — a saveable state registry whose
//!   snapshot is retained across host recreation, with [`remember_saveable`]
//!   to store serde values in it.

pub mod error;
pub mod saveable;
pub mod scoped_owner;
mod tests;

pub use error::SaveError;
pub use saveable::{
    ProviderEntry, SaveableStateRegistry, Snapshot, local_saveable_registry, remember_saveable,
    scoped_saveable_state_registry, with_saveable_registry,
};
pub use scoped_owner::scoped_store_owner;
