#![allow(dead_code)]

use async_trait::async_trait;
use contentsync::config::{NetworkConfig, StorageConfig};
use contentsync::{
    Action, ActionKind, ActionQueue, ActionSender, ChangeEvent, ContentFields, ContentFilter,
    ContentKind, ContentStore, Dispatcher, Entity, NetworkClient, ProgressReporter, RemoteId,
    RemoteRecord, Site, SiteId, SqliteRecordStore, SyncError,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

pub fn site() -> Site {
    Site::new(SiteId(1), "https://example.org")
}

pub fn remote_post(remote_id: i64, title: &str) -> RemoteRecord {
    RemoteRecord::new(
        SiteId(1),
        RemoteId(remote_id),
        ContentKind::Post,
        ContentFields::titled(title),
    )
}

pub fn open_store(temp: &TempDir) -> Arc<SqliteRecordStore> {
    let config = StorageConfig {
        db_path: temp.path().join("test.db"),
        sqlite_cache_size: 1000,
        sqlite_busy_timeout: 5000,
        pool_size: 2,
    };
    Arc::new(SqliteRecordStore::open(&config.db_path, &config).unwrap())
}

/// Network client with scripted responses
///
/// Each call pops the next scripted result; an empty script fails with a
/// transport error. With `hold_pushes` set, pushes report half progress and
/// then wait on `release` before answering.
#[derive(Default)]
pub struct FakeClient {
    pub fetches: Mutex<VecDeque<Result<Vec<RemoteRecord>, SyncError>>>,
    pub pushes: Mutex<VecDeque<Result<RemoteRecord, SyncError>>>,
    pub deletes: Mutex<VecDeque<Result<(), SyncError>>>,
    pub calls: Mutex<Vec<String>>,
    pub hold_pushes: bool,
    pub release: Notify,
}

impl FakeClient {
    pub fn holding_pushes() -> Self {
        Self {
            hold_pushes: true,
            ..Self::default()
        }
    }

    pub fn script_fetch(&self, result: Result<Vec<RemoteRecord>, SyncError>) {
        self.fetches.lock().push_back(result);
    }

    pub fn script_push(&self, result: Result<RemoteRecord, SyncError>) {
        self.pushes.lock().push_back(result);
    }

    pub fn script_delete(&self, result: Result<(), SyncError>) {
        self.deletes.lock().push_back(result);
    }

    fn unscripted(call: &str) -> SyncError {
        SyncError::Transport(format!("no scripted {} response", call))
    }
}

#[async_trait]
impl NetworkClient for FakeClient {
    async fn fetch(
        &self,
        site: &Site,
        filter: &ContentFilter,
    ) -> Result<Vec<RemoteRecord>, SyncError> {
        self.calls
            .lock()
            .push(format!("fetch {} {} {}", site.id, filter.kind, filter.offset));
        let next = self.fetches.lock().pop_front();
        next.unwrap_or_else(|| Err(Self::unscripted("fetch")))
    }

    async fn push(
        &self,
        site: &Site,
        entity: &Entity,
        progress: ProgressReporter,
    ) -> Result<RemoteRecord, SyncError> {
        self.calls
            .lock()
            .push(format!("push {} {}", site.id, entity.local_id));
        if self.hold_pushes {
            progress.report(0.5);
            self.release.notified().await;
        }
        let next = self.pushes.lock().pop_front();
        next.unwrap_or_else(|| Err(Self::unscripted("push")))
    }

    async fn delete(&self, site: &Site, remote_id: RemoteId) -> Result<(), SyncError> {
        self.calls
            .lock()
            .push(format!("delete {} {}", site.id, remote_id));
        let next = self.deletes.lock().pop_front();
        next.unwrap_or_else(|| Err(Self::unscripted("delete")))
    }
}

/// A content store wired to a running dispatch worker
pub struct Harness {
    pub temp: TempDir,
    pub records: Arc<SqliteRecordStore>,
    pub client: Arc<FakeClient>,
    pub store: Arc<ContentStore<SqliteRecordStore, FakeClient>>,
    pub dispatcher: Arc<Dispatcher>,
    pub sender: ActionSender,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    worker: JoinHandle<usize>,
}

impl Harness {
    pub fn start(client: FakeClient) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let temp = TempDir::new().unwrap();
        let records = open_store(&temp);
        let client = Arc::new(client);
        let (sender, queue) = ActionQueue::new(64);

        let network = NetworkConfig {
            request_timeout_ms: 5_000,
            page_size: 2,
        };
        let store = Arc::new(ContentStore::new(
            Arc::clone(&records),
            Arc::clone(&client),
            sender.clone(),
            &network,
        ));

        let dispatcher = Arc::new(Dispatcher::new());
        dispatcher.register(store.clone());

        let (tx, events) = mpsc::unbounded_channel();
        dispatcher.add_listener(Arc::new(move |event: &ChangeEvent| {
            let _ = tx.send(event.clone());
        }));

        let worker = queue.spawn(Arc::clone(&dispatcher));
        Self {
            temp,
            records,
            client,
            store,
            dispatcher,
            sender,
            events,
            worker,
        }
    }

    pub async fn send(&self, action: Action) {
        self.sender.send(action).await.unwrap();
    }

    /// Wait for the next change event caused by `cause`, skipping others
    pub async fn next_event(&mut self, cause: ActionKind) -> ChangeEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {}", cause))
                .expect("event channel closed");
            if event.cause == cause {
                return event;
            }
        }
    }

    /// Collect every event up to and including the next one caused by `cause`
    pub async fn events_until(&mut self, cause: ActionKind) -> Vec<ChangeEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {}", cause))
                .expect("event channel closed");
            let done = event.cause == cause;
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    pub async fn shutdown(self) -> usize {
        self.sender.shutdown().await.unwrap();
        self.worker.await.unwrap()
    }
}
