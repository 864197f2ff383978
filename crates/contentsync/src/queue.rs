use crate::action::Action;
use crate::dispatcher::Dispatcher;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("action queue is closed")]
    Closed,
    #[error("action queue is full")]
    Full,
}

enum Envelope {
    Action(Action),
    Shutdown,
}

/// Producer side of the action queue
///
/// Cheap to clone; network tasks hold one to re-enter with response actions.
#[derive(Clone)]
pub struct ActionSender {
    tx: mpsc::Sender<Envelope>,
}

impl ActionSender {
    /// Enqueue `action`, waiting for room when the queue is full
    pub async fn send(&self, action: Action) -> Result<(), QueueError> {
        self.tx
            .send(Envelope::Action(action))
            .await
            .map_err(|_| QueueError::Closed)
    }

    /// Enqueue without waiting
    pub fn try_send(&self, action: Action) -> Result<(), QueueError> {
        self.tx
            .try_send(Envelope::Action(action))
            .map_err(|e| match e {
                TrySendError::Full(_) => QueueError::Full,
                TrySendError::Closed(_) => QueueError::Closed,
            })
    }

    /// Enqueue from a thread outside the async runtime
    pub fn blocking_send(&self, action: Action) -> Result<(), QueueError> {
        self.tx
            .blocking_send(Envelope::Action(action))
            .map_err(|_| QueueError::Closed)
    }

    /// Stop the worker once every action queued before this call is dispatched
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.tx
            .send(Envelope::Shutdown)
            .await
            .map_err(|_| QueueError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side: the single dispatch worker
///
/// Producers enqueue from any task or thread; one consumer drains in FIFO
/// order, which gives a total order over every store mutation.
pub struct ActionQueue {
    rx: mpsc::Receiver<Envelope>,
}

impl ActionQueue {
    pub fn new(capacity: usize) -> (ActionSender, ActionQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ActionSender { tx }, ActionQueue { rx })
    }

    /// Run the worker on the blocking pool, since store handlers do
    /// synchronous storage I/O. Resolves to the number of actions dispatched.
    pub fn spawn(self, dispatcher: Arc<Dispatcher>) -> JoinHandle<usize> {
        tokio::task::spawn_blocking(move || self.run_blocking(&dispatcher))
    }

    /// Pop the next queued action without waiting
    pub fn try_next(&mut self) -> Option<Action> {
        match self.rx.try_recv() {
            Ok(Envelope::Action(action)) => Some(action),
            Ok(Envelope::Shutdown) | Err(_) => None,
        }
    }

    /// Drain the queue on the current thread until shutdown or until every
    /// sender is dropped
    pub fn run_blocking(mut self, dispatcher: &Dispatcher) -> usize {
        info!("dispatch worker started");
        let mut dispatched = 0;
        while let Some(envelope) = self.rx.blocking_recv() {
            match envelope {
                Envelope::Action(action) => {
                    dispatcher.dispatch(&action);
                    dispatched += 1;
                }
                Envelope::Shutdown => {
                    debug!("dispatch worker received shutdown");
                    break;
                }
            }
        }
        self.rx.close();
        info!("dispatch worker stopped after {} actions", dispatched);
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionKind, ChangeEvent};
    use crate::store::Store;
    use crate::types::LocalId;
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<LocalId>>,
    }

    impl Store for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn interested_in(&self, kind: ActionKind) -> bool {
            kind == ActionKind::ClearUpload
        }

        fn handle_action(&self, action: &Action) -> Option<ChangeEvent> {
            if let Action::ClearUpload { local_id } = action {
                self.seen.lock().push(*local_id);
            }
            None
        }
    }

    #[tokio::test]
    async fn test_worker_preserves_fifo_order() {
        let dispatcher = Arc::new(Dispatcher::new());
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        dispatcher.register(recorder.clone());

        let (sender, queue) = ActionQueue::new(4);
        let worker = queue.spawn(Arc::clone(&dispatcher));

        for id in 1..=20 {
            sender
                .send(Action::ClearUpload {
                    local_id: LocalId(id),
                })
                .await
                .unwrap();
        }
        sender.shutdown().await.unwrap();

        assert_eq!(worker.await.unwrap(), 20);
        let expected: Vec<LocalId> = (1..=20).map(LocalId).collect();
        assert_eq!(*recorder.seen.lock(), expected);
    }

    #[tokio::test]
    async fn test_send_after_shutdown_is_closed() {
        let dispatcher = Arc::new(Dispatcher::new());
        let (sender, queue) = ActionQueue::new(4);
        let worker = queue.spawn(dispatcher);

        sender.shutdown().await.unwrap();
        assert_eq!(worker.await.unwrap(), 0);

        let result = sender
            .send(Action::ClearUpload {
                local_id: LocalId(1),
            })
            .await;
        assert_eq!(result, Err(QueueError::Closed));
        assert!(sender.is_closed());
    }

    #[test]
    fn test_try_send_reports_full() {
        let (sender, _queue) = ActionQueue::new(1);
        let action = Action::ClearUpload {
            local_id: LocalId(1),
        };
        sender.try_send(action.clone()).unwrap();
        assert_eq!(sender.try_send(action), Err(QueueError::Full));
    }
}
