use crate::action::{Action, ActionKind, ChangeEvent};

/// A component owning one or more entity tables
///
/// A store is the exclusive writer of its tables. `handle_action` must be
/// total over every action kind: kinds the store does not own are ignored by
/// returning `None`. Handlers run on the dispatch worker and must never wait
/// on the network; I/O is spawned and re-enters as a response action.
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `dispatch` should deliver actions of `kind` to this store
    fn interested_in(&self, _kind: ActionKind) -> bool {
        true
    }

    /// Runs once, synchronously, when the store is registered. Other stores
    /// may not be registered yet.
    fn on_register(&self) {}

    fn handle_action(&self, action: &Action) -> Option<ChangeEvent>;

    /// Observes change events emitted by any store
    fn on_change(&self, _event: &ChangeEvent) {}
}
