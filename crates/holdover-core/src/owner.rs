//! Holder owners: the lifecycle scope a [`Store`] belongs to.
//!
//! A [`StoreOwner`] is created by the host per screen (or navigation
//! destination, or nested scope) and lives until that scope finishes for
//! good. Holders are created lazily through a [`HolderFactory`] the first
//! time they are requested, and all of them are cleared together by
//! [`StoreOwner::clear`].

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::clearable::{Clearable, Retained};
use crate::dispatch::MainDispatcher;
use crate::error::RetainError;
use crate::store::Store;

/// Type token passed to a [`HolderFactory`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HolderType {
    id: TypeId,
    name: &'static str,
}

impl HolderType {
    pub fn of<H: Any>() -> Self {
        Self {
            id: TypeId::of::<H>(),
            name: std::any::type_name::<H>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub trait HolderFactory: Send + Sync {
    /// Builds a holder of `requested` type. Unknown types are a programmer
    /// error and must be rejected with [`RetainError::UnknownHolderType`].
    fn create(
        &self,
        requested: HolderType,
        dispatcher: &Arc<dyn MainDispatcher>,
    ) -> Result<Retained, RetainError>;
}

/// Factory that only knows how to build [`Store`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreFactory;

impl HolderFactory for StoreFactory {
    fn create(
        &self,
        requested: HolderType,
        dispatcher: &Arc<dyn MainDispatcher>,
    ) -> Result<Retained, RetainError> {
        if requested != HolderType::of::<Store>() {
            return Err(RetainError::UnknownHolderType {
                requested: requested.name(),
            });
        }
        Ok(Retained::clearable(Arc::new(Store::new(dispatcher.clone()))))
    }
}

#[derive(Default)]
struct Holders {
    by_type: IndexMap<TypeId, Retained>,
    cleared: bool,
}

pub struct StoreOwner {
    holders: Mutex<Holders>,
    factory: Box<dyn HolderFactory>,
    dispatcher: Arc<dyn MainDispatcher>,
}

impl StoreOwner {
    pub fn new(dispatcher: Arc<dyn MainDispatcher>) -> Self {
        Self::with_factory(StoreFactory, dispatcher)
    }

    pub fn with_factory(
        factory: impl HolderFactory + 'static,
        dispatcher: Arc<dyn MainDispatcher>,
    ) -> Self {
        Self {
            holders: Mutex::new(Holders::default()),
            factory: Box::new(factory),
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Arc<dyn MainDispatcher> {
        &self.dispatcher
    }

    /// Returns the holder of type `H`, creating it on first access.
    pub fn holder<H: Any + Send + Sync>(&self) -> Result<Arc<H>, RetainError> {
        let mut holders = self.holders.lock();
        if holders.cleared {
            return Err(RetainError::OwnerCleared);
        }
        if let Some(existing) = holders.by_type.get(&TypeId::of::<H>()) {
            return existing.downcast::<H>().ok_or(RetainError::UnknownHolderType {
                requested: std::any::type_name::<H>(),
            });
        }

        let created = self.factory.create(HolderType::of::<H>(), &self.dispatcher)?;
        let typed = created
            .downcast::<H>()
            .ok_or(RetainError::UnknownHolderType {
                requested: std::any::type_name::<H>(),
            })?;
        log::debug!("owner created holder `{}`", created.type_name());
        holders.by_type.insert(TypeId::of::<H>(), created);
        Ok(typed)
    }

    pub fn store(&self) -> Result<Arc<Store>, RetainError> {
        self.holder::<Store>()
    }

    pub fn is_cleared(&self) -> bool {
        self.holders.lock().cleared
    }

    /// Ends this scope: clears every holder created so far, in creation
    /// order. Later calls do nothing.
    pub fn clear(&self) {
        let drained: Vec<Retained> = {
            let mut holders = self.holders.lock();
            if holders.cleared {
                return;
            }
            holders.cleared = true;
            holders.by_type.drain(..).map(|(_, h)| h).collect()
        };
        log::debug!("owner cleared, {} holder(s)", drained.len());
        for holder in drained {
            holder.clear();
        }
    }
}

/// A retained owner (see nested scopes) ends with the value that holds it.
impl Clearable for StoreOwner {
    fn on_cleared(&self) {
        self.clear();
    }
}

impl fmt::Debug for StoreOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let holders = self.holders.lock();
        f.debug_struct("StoreOwner")
            .field("holders", &holders.by_type.len())
            .field("cleared", &holders.cleared)
            .finish()
    }
}
