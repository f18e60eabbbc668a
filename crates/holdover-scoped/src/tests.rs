#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use holdover_core::*;
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::*;

    #[derive(Default)]
    struct Counted(AtomicUsize);

    impl Clearable for Counted {
        fn on_cleared(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Counted {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Host {
        queue: Arc<MainQueue>,
        owner: Arc<StoreOwner>,
        lifecycle: Lifecycle,
    }

    impl Host {
        fn new() -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            let queue = Arc::new(MainQueue::new());
            Self {
                owner: Arc::new(StoreOwner::new(queue.clone())),
                queue,
                lifecycle: Lifecycle::new(LifecycleState::Resumed),
            }
        }

        fn provide<R>(&self, f: impl FnOnce() -> R) -> R {
            with_store_owner(self.owner.clone(), || with_lifecycle(self.lifecycle.clone(), f))
        }
    }

    #[test]
    fn test_nested_store_is_isolated_from_outer() {
        let host = Host::new();
        let show_inner = Cell::new(true);
        let outer_value: Rc<Mutex<Option<Arc<Counted>>>> = Rc::default();
        let sibling: Rc<Mutex<Option<Arc<Counted>>>> = Rc::default();
        let inner_value: Rc<Mutex<Option<Arc<Counted>>>> = Rc::default();
        let inner_store: Rc<Mutex<Option<Arc<Store>>>> = Rc::default();

        let composition = Composition::new();
        let content = || {
            host.provide(|| {
                *outer_value.lock() =
                    Some(remember_clearable_with_store(None, Counted::default).unwrap());
                *sibling.lock() =
                    Some(remember_clearable_with_store(None, Counted::default).unwrap());
                if show_inner.get() {
                    scoped_store_owner(|| {
                        *inner_value.lock() =
                            Some(remember_clearable_with_store(None, Counted::default).unwrap());
                        *inner_store.lock() = Some(local_store_owner().unwrap().store().unwrap());
                    })
                    .unwrap();
                }
            })
        };
        composition.recompose(content);

        let outer = host.owner.store().unwrap();
        let inner = inner_store.lock().clone().unwrap();
        assert!(!Arc::ptr_eq(&outer, &inner));
        assert_eq!(inner.len(), 1);
        // outer holds its own two values plus the nested owner
        assert_eq!(outer.len(), 3);
        let keys = outer.keys();
        let [outer_value_key, sibling_key, owner_key] = keys[..] else {
            panic!("unexpected outer keys: {keys:?}");
        };

        // Forgetting an outer entry leaves the nested store alone.
        outer.forget(sibling_key);
        host.queue.run_until_idle();
        assert_eq!(sibling.lock().as_ref().unwrap().count(), 1);
        assert_eq!(inner_value.lock().as_ref().unwrap().count(), 0);
        assert_eq!(inner.len(), 1);
        assert!(!inner.is_cleared());

        // Removing the scoped call site clears the nested owner only.
        show_inner.set(false);
        composition.recompose(content);
        host.queue.run_until_idle();
        assert_eq!(inner_value.lock().as_ref().unwrap().count(), 1);
        assert!(inner.is_cleared());
        assert_eq!(outer_value.lock().as_ref().unwrap().count(), 0);
        assert!(outer.contains(outer_value_key));
        assert!(!outer.contains(owner_key));
    }

    #[test]
    fn test_nested_owner_survives_recreation() {
        let host = Host::new();
        let stores: Rc<Mutex<Vec<Arc<Store>>>> = Rc::default();
        let content = || {
            host.provide(|| {
                scoped_store_owner(|| {
                    remember_with_store(None, || String::from("draft")).unwrap();
                    stores.lock().push(local_store_owner().unwrap().store().unwrap());
                })
                .unwrap();
            })
        };

        let composition = Composition::new();
        composition.recompose(content);
        host.lifecycle.set_state(LifecycleState::Started);
        composition.dispose();
        Composition::new().recompose(content);
        host.queue.run_until_idle();

        let stores = stores.lock();
        assert!(Arc::ptr_eq(&stores[0], &stores[1]));
        assert_eq!(stores[0].len(), 1);
        assert!(!stores[0].is_cleared());
    }

    #[test]
    fn test_registry_consume_and_save() {
        let mut restored = Snapshot::new();
        restored.insert("name".into(), vec![json!("a"), json!("b")]);
        restored.insert("unused".into(), vec![json!(1)]);
        let registry = Rc::new(SaveableStateRegistry::new(Some(restored)));

        assert_eq!(registry.consume_restored("name"), Some(json!("a")));
        assert_eq!(registry.consume_restored("name"), Some(json!("b")));
        assert_eq!(registry.consume_restored("name"), None);

        let count = Rc::new(Cell::new(3));
        let entry = registry
            .register_provider("count", {
                let count = count.clone();
                move || Ok(json!(count.get()))
            })
            .unwrap();
        count.set(4);

        let saved = registry.perform_save().unwrap();
        assert_eq!(saved.get("count"), Some(&vec![json!(4)]));
        assert_eq!(saved.get("unused"), Some(&vec![json!(1)]));
        assert!(!saved.contains_key("name"));

        entry.unregister();
        assert!(!registry.perform_save().unwrap().contains_key("count"));
        assert!(matches!(
            registry.register_provider("  ", || Ok(json!(null))),
            Err(SaveError::BlankKey)
        ));
        assert!(registry.can_be_saved(&vec![1, 2]));
    }

    #[test]
    fn test_saveable_state_restored_after_recreation() {
        let host = Host::new();
        let states: Rc<Mutex<Vec<Rc<std::cell::RefCell<Vec<String>>>>>> = Rc::default();
        let content = || {
            host.provide(|| {
                scoped_saveable_state_registry(|| {
                    let notes = remember_saveable("notes", Vec::<String>::new);
                    states.lock().push(notes);
                })
                .unwrap();
            })
        };

        let composition = Composition::new();
        composition.recompose(content);
        states.lock()[0].borrow_mut().push("buy milk".into());

        host.lifecycle.set_state(LifecycleState::Created);
        composition.dispose();
        Composition::new().recompose(content);

        let states = states.lock();
        assert!(!Rc::ptr_eq(&states[0], &states[1]));
        assert_eq!(*states[1].borrow(), vec!["buy milk".to_string()]);
    }

    #[test]
    fn test_remember_saveable_without_registry_is_plain_state() {
        let composition = Composition::new();
        let seen: Rc<Mutex<Vec<Rc<std::cell::RefCell<u32>>>>> = Rc::default();
        let content = || seen.lock().push(remember_saveable("n", || 1u32));
        composition.recompose(content);
        composition.recompose(content);
        let seen = seen.lock();
        assert!(Rc::ptr_eq(&seen[0], &seen[1]));
        assert_eq!(*seen[0].borrow(), 1);
    }
}
