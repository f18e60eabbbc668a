use std::panic::Location;

use thiserror::Error;

use crate::store::StoreKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetainError {
    /// The owner's factory does not know how to build the requested holder.
    #[error("cannot create a holder of type `{requested}`; only `Store` holders are supported")]
    UnknownHolderType { requested: &'static str },

    #[error("no StoreOwner was provided to this composition; wrap it in `with_store_owner`")]
    NoStoreOwner,

    #[error("store owner has been cleared")]
    OwnerCleared,

    #[error("store #{store} has been cleared")]
    StoreCleared { store: u64 },

    /// A slot holds a value of another type than the call site expects.
    #[error("entry {key:?} holds a value of a different type")]
    TypeMismatch { key: StoreKey },

    #[error("`{operation}` must be called during a composition pass")]
    NotComposing { operation: &'static str },

    /// The same call site was reached twice in one group during a pass.
    #[error("call site {location} was already used in this group; wrap repeated content in `key_group`")]
    DuplicateCallSite {
        location: &'static Location<'static>,
    },
}
