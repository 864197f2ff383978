use crate::action::{Action, ChangeEvent};
use crate::store::Store;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// External observer of change events
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handle returned by [`Dispatcher::register`], used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registered {
    id: u64,
    store: Arc<dyn Store>,
}

/// Routes actions to stores and change events to observers
///
/// `dispatch` runs synchronously on the calling thread. Callers that need a
/// total order over store mutations feed it from a single worker (see
/// [`crate::queue::ActionQueue`]). Registration lists are copied before each
/// delivery, so stores may register or unregister from inside a handler.
pub struct Dispatcher {
    stores: RwLock<Vec<Registered>>,
    listeners: RwLock<Vec<(u64, ChangeListener)>>,
    next_id: AtomicU64,
}

fn same_store(a: &Arc<dyn Store>, b: &Arc<dyn Store>) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add `store` to the delivery list
    ///
    /// Registering the same instance twice returns the first registration
    /// and does not run `on_register` again.
    pub fn register(&self, store: Arc<dyn Store>) -> Registration {
        let id = {
            let mut stores = self.stores.write();
            if let Some(existing) = stores.iter().find(|r| same_store(&r.store, &store)) {
                return Registration(existing.id);
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            stores.push(Registered {
                id,
                store: Arc::clone(&store),
            });
            id
        };
        debug!("registered store {} as #{}", store.name(), id);
        store.on_register();
        Registration(id)
    }

    /// Returns false when the registration was already removed
    pub fn unregister(&self, registration: Registration) -> bool {
        let mut stores = self.stores.write();
        let before = stores.len();
        stores.retain(|r| r.id != registration.0);
        let removed = stores.len() != before;
        if removed {
            debug!("unregistered store #{}", registration.0);
        }
        removed
    }

    pub fn store_count(&self) -> usize {
        self.stores.read().len()
    }

    pub fn add_listener(&self, listener: ChangeListener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        ListenerId(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id.0);
        listeners.len() != before
    }

    fn store_snapshot(&self) -> Vec<Arc<dyn Store>> {
        self.stores
            .read()
            .iter()
            .map(|r| Arc::clone(&r.store))
            .collect()
    }

    /// Deliver `action` to every interested store in registration order
    ///
    /// # Panics
    ///
    /// Panics when the payload is malformed (see [`Action::assert_well_formed`]).
    pub fn dispatch(&self, action: &Action) {
        action.assert_well_formed();
        let kind = action.kind();
        trace!("dispatching {}", kind);

        for store in self.store_snapshot() {
            if !store.interested_in(kind) {
                continue;
            }
            if let Some(event) = store.handle_action(action) {
                self.emit_change(&event);
            }
        }
    }

    /// Fan a change event out to all stores, then all listeners
    pub fn emit_change(&self, event: &ChangeEvent) {
        trace!(
            "change {} affected={} error={:?}",
            event.cause, event.affected, event.error
        );
        for store in self.store_snapshot() {
            store.on_change(event);
        }

        let listeners: Vec<ChangeListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
