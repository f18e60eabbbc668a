//! Nested store owners.
//!
//! [`scoped_store_owner`] gives a subtree its own [`StoreOwner`]. The nested
//! owner is itself retained in the enclosing store, so it survives host
//! recreation like any other retained value, and it is cleared (tearing
//! down only its own store) when the call site is removed for good or the
//! enclosing owner is cleared.

use std::sync::Arc;

use holdover_core::{
    RetainError, StoreOwner, local_store_owner, remember_clearable_with_store, with_store_owner,
};

/// Runs `content` with a nested [`StoreOwner`] provided.
///
/// Values remembered with `remember_with_store` inside `content` live in the
/// nested owner's store. Disposal of the nested owner is queued on the
/// outer owner's dispatcher; the store teardown it triggers queues the
/// entries' own disposal behind it.
#[track_caller]
pub fn scoped_store_owner<R>(content: impl FnOnce() -> R) -> Result<R, RetainError> {
    let outer = local_store_owner().ok_or(RetainError::NoStoreOwner)?;
    let dispatcher = outer.dispatcher().clone();
    let inner: Arc<StoreOwner> =
        remember_clearable_with_store(None, move || StoreOwner::new(dispatcher))?;
    Ok(with_store_owner(inner, content))
}

