pub use crate::clearable::{Clearable, ExtraKey};
pub use crate::composition::{
    Composition, PendingPass, RememberObserver, key_group, remember, remember_observer,
    side_effect,
};
pub use crate::dispatch::{MainDispatcher, MainQueue};
pub use crate::error::RetainError;
pub use crate::lifecycle::{Lifecycle, LifecycleState};
pub use crate::locals::{
    RetainConfig, local_lifecycle, local_store_owner, with_lifecycle, with_retain_config,
    with_store_owner,
};
pub use crate::owner::StoreOwner;
pub use crate::runtime::{remember_clearable_with_store, remember_with_store};
pub use crate::store::{Entry, Store, StoreKey};
