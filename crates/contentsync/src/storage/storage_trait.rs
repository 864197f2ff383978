use crate::error::Result;
use crate::types::{ContentKind, Entity, LocalId, RemoteId, SiteId, UploadRecord, UploadState};

/// Predicate over entity rows; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityQuery {
    pub site_id: Option<SiteId>,
    pub kind: Option<ContentKind>,
    pub remote_id: Option<RemoteId>,
    pub is_local_only: Option<bool>,
    pub is_locally_modified: Option<bool>,
}

impl EntityQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn site(site_id: SiteId) -> Self {
        Self {
            site_id: Some(site_id),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: ContentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn remote_id(mut self, remote_id: RemoteId) -> Self {
        self.remote_id = Some(remote_id);
        self
    }

    pub fn local_only(mut self, local_only: bool) -> Self {
        self.is_local_only = Some(local_only);
        self
    }

    pub fn locally_modified(mut self, modified: bool) -> Self {
        self.is_locally_modified = Some(modified);
        self
    }
}

/// Durable storage for entities and their upload records
///
/// Every method is one atomic transaction. Implementations only persist;
/// merge policy and state-machine rules live in the reconciler and the
/// upload tracker.
///
/// Schema contract:
/// - `local_id` is the sole key and is never reused
/// - `(site_id, remote_id)` is unique among rows with an assigned remote id
/// - an upload record is removed together with its entity
pub trait RecordStore: Send + Sync {
    fn get(&self, local_id: LocalId) -> Result<Option<Entity>>;

    fn find_by_remote_id(&self, site_id: SiteId, remote_id: RemoteId) -> Result<Option<Entity>>;

    /// All rows matching `query`, ordered by `local_id`
    fn find(&self, query: &EntityQuery) -> Result<Vec<Entity>>;

    fn count(&self, query: &EntityQuery) -> Result<usize>;

    /// Persist a new row; the returned entity carries its assigned `local_id`
    fn insert(&self, entity: &Entity) -> Result<Entity>;

    /// Insert when `local_id` is unassigned, otherwise update the row in place.
    /// Returns rows written; updating a vanished row writes nothing.
    fn upsert(&self, entity: &Entity) -> Result<usize>;

    fn delete(&self, local_id: LocalId) -> Result<usize>;

    fn delete_where(&self, query: &EntityQuery) -> Result<usize>;

    fn get_upload(&self, local_id: LocalId) -> Result<Option<UploadRecord>>;

    /// Unconditionally write `record`, replacing any existing one
    fn put_upload(&self, record: &UploadRecord) -> Result<usize>;

    /// Compare-and-set write of `record`
    ///
    /// Applies only when the stored state is one of `from`, or when no record
    /// exists and `create_if_missing` is set. Returns rows written.
    fn transition_upload(
        &self,
        record: &UploadRecord,
        from: &[UploadState],
        create_if_missing: bool,
    ) -> Result<usize>;

    /// Narrow progress write: applies only while the record is uploading and
    /// the new value does not go backwards
    fn update_upload_progress(&self, local_id: LocalId, progress: f32) -> Result<usize>;

    fn find_uploads(&self, state: Option<UploadState>) -> Result<Vec<UploadRecord>>;

    fn delete_upload(&self, local_id: LocalId) -> Result<usize>;
}
