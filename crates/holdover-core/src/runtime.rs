use std::any::{Any, TypeId};
use std::panic::Location;
use std::sync::Arc;

use crate::binding::Binding;
use crate::clearable::{Clearable, ExtraKey, Retained};
use crate::composition::{self, CompositeKey};
use crate::error::RetainError;
use crate::locals;
use crate::store::StoreKey;

/// Remembers a value in the ambient [`Store`](crate::Store), so it survives
/// the host recreating the composition.
///
/// `init` runs at most once per (store, call site, `extra_key`); changing
/// `extra_key` between passes replaces the value.
#[track_caller]
pub fn remember_with_store<T: Any + Send + Sync>(
    extra_key: Option<ExtraKey>,
    init: impl FnOnce() -> T,
) -> Result<Arc<T>, RetainError> {
    let key = call_site()?;
    remember_in_store(key, extra_key, move || Retained::new(Arc::new(init())))
}

/// [`remember_with_store`] for values that need [`Clearable::on_cleared`]
/// when they are disposed.
#[track_caller]
pub fn remember_clearable_with_store<T: Clearable + Any>(
    extra_key: Option<ExtraKey>,
    init: impl FnOnce() -> T,
) -> Result<Arc<T>, RetainError> {
    let key = call_site()?;
    remember_in_store(key, extra_key, move || Retained::clearable(Arc::new(init())))
}

#[track_caller]
fn call_site() -> Result<CompositeKey, RetainError> {
    if !composition::is_composing() {
        return Err(RetainError::NotComposing {
            operation: "remember_with_store",
        });
    }
    log::trace!("remember_with_store at {}", Location::caller());
    composition::call_site_key()
}

fn remember_in_store<T: Any + Send + Sync>(
    call_site: CompositeKey,
    extra_key: Option<ExtraKey>,
    supplier: impl FnOnce() -> Retained,
) -> Result<Arc<T>, RetainError> {
    let owner = locals::local_store_owner().ok_or(RetainError::NoStoreOwner)?;
    let store = owner.store()?;
    let lifecycle = locals::local_lifecycle();
    let config = locals::retain_config();
    let key = StoreKey::from(call_site);

    let binding =
        composition::remember_observer_at(call_site, || Binding::new(config.forget_threshold));
    let retained = binding.resolve_value_for_pass(
        &store,
        key,
        extra_key.as_ref(),
        TypeId::of::<T>(),
        || supplier().tagged(extra_key.clone()),
    );
    let value = retained
        .downcast::<T>()
        .ok_or(RetainError::TypeMismatch { key })?;

    composition::side_effect(move || {
        if let Err(err) =
            binding.commit_pass(&retained, &store, lifecycle, key, extra_key.as_ref())
        {
            log::warn!("remember_with_store: could not register {key:?}: {err}");
        }
    });
    Ok(value)
}
