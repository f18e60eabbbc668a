use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Optional disposal capability of a retained value.
///
/// `on_cleared` runs exactly once, on the main dispatcher, when the value is
/// superseded, forgotten, or its store is torn down.
pub trait Clearable: Send + Sync {
    fn on_cleared(&self);
}

type DynValue = dyn Any + Send + Sync;

/// Invalidation key compared by value.
///
/// Changing the extra key passed to `remember_with_store` between passes
/// discards the retained value and runs the supplier again.
#[derive(Clone)]
pub struct ExtraKey {
    value: Arc<DynValue>,
    eq: fn(&DynValue, &DynValue) -> bool,
    fmt: fn(&DynValue, &mut fmt::Formatter<'_>) -> fmt::Result,
}

impl ExtraKey {
    pub fn new<K>(key: K) -> Self
    where
        K: PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            value: Arc::new(key),
            eq: eq_as::<K>,
            fmt: fmt_as::<K>,
        }
    }

    pub fn downcast_ref<K: 'static>(&self) -> Option<&K> {
        (*self.value).downcast_ref::<K>()
    }
}

fn eq_as<K: PartialEq + 'static>(a: &DynValue, b: &DynValue) -> bool {
    match (a.downcast_ref::<K>(), b.downcast_ref::<K>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn fmt_as<K: fmt::Debug + 'static>(v: &DynValue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match v.downcast_ref::<K>() {
        Some(k) => fmt::Debug::fmt(k, f),
        None => f.write_str("<?>"),
    }
}

impl PartialEq for ExtraKey {
    fn eq(&self, other: &Self) -> bool {
        (self.eq)(&*self.value, &*other.value)
    }
}

impl fmt::Debug for ExtraKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExtraKey(")?;
        (self.fmt)(&*self.value, f)?;
        f.write_str(")")
    }
}

/// A type-erased value as held by a [`Store`](crate::Store).
///
/// Carries the value, its clear hook (if the value is [`Clearable`]) and the
/// extra key it was produced under. Identity is the identity of the inner
/// allocation; clones share it.
#[derive(Clone)]
pub struct Retained {
    value: Arc<DynValue>,
    value_type: TypeId,
    type_name: &'static str,
    clearable: Option<Arc<dyn Clearable>>,
    tag: Option<ExtraKey>,
}

impl Retained {
    pub fn new<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            value_type: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            clearable: None,
            tag: None,
        }
    }

    pub fn clearable<T: Clearable + Any>(value: Arc<T>) -> Self {
        let hook: Arc<dyn Clearable> = value.clone();
        Self {
            clearable: Some(hook),
            ..Self::new(value)
        }
    }

    /// Attaches the extra key this value was produced under.
    pub fn tagged(mut self, tag: Option<ExtraKey>) -> Self {
        self.tag = tag;
        self
    }

    pub fn tag(&self) -> Option<&ExtraKey> {
        self.tag.as_ref()
    }

    pub fn value_type(&self) -> TypeId {
        self.value_type
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value_type == TypeId::of::<T>()
    }

    pub fn is_clearable(&self) -> bool {
        self.clearable.is_some()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    /// Reference identity of the held value.
    pub fn same_value(&self, other: &Retained) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    /// Runs the clear hook, if any. Callers are responsible for doing this
    /// on the main dispatcher.
    pub(crate) fn clear(&self) {
        if let Some(hook) = &self.clearable {
            hook.on_cleared();
        }
    }
}

impl fmt::Debug for Retained {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retained")
            .field("type", &self.type_name)
            .field("clearable", &self.clearable.is_some())
            .field("tag", &self.tag)
            .finish()
    }
}
