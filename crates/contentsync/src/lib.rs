// Core
pub mod action;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod store;
pub mod types;

// Content sync
pub mod content_store;
pub mod network;
pub mod reconcile;
pub mod storage;
pub mod upload;

// Public exports
pub use action::{Action, ActionKind, ChangeEvent};
pub use config::Config;
pub use content_store::ContentStore;
pub use dispatcher::{ChangeListener, Dispatcher, ListenerId, Registration};
pub use error::{ErrorKind, StorageError, SyncError};
pub use network::{NetworkClient, OfflineClient, ProgressReporter};
pub use queue::{ActionQueue, ActionSender, QueueError};
pub use reconcile::{MergeMode, Reconciler};
pub use storage::{EntityQuery, RecordStore, SqliteRecordStore};
pub use store::Store;
pub use types::{
    ContentFields, ContentFilter, ContentKind, Entity, LocalId, RemoteId, RemoteRecord, Site,
    SiteId, UploadOperation, UploadOutcome, UploadRecord, UploadState,
};
pub use upload::UploadTracker;
