use crate::error::{Result, StorageError};
use crate::storage::RecordStore;
use crate::types::{ContentFields, ContentKind, Entity, LocalId, RemoteRecord, SiteId};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// How an incoming remote record treats a locally modified match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Remote record replaces the local row and clears `is_locally_modified`
    Overwrite,
    /// A locally modified row keeps its content until its own edit is pushed
    KeepLocalChanges,
}

/// Decides how remote records land in the record store
///
/// All merges key on `(site_id, remote_id)`. Every write method returns the
/// number of rows written (0 or 1), so a discarded merge is observable as a
/// zero rather than an error.
pub struct Reconciler<R: RecordStore> {
    records: Arc<R>,
}

impl<R: RecordStore> Reconciler<R> {
    pub fn new(records: Arc<R>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &Arc<R> {
        &self.records
    }

    pub fn insert_or_update_overwriting_local_changes(
        &self,
        record: Option<&RemoteRecord>,
    ) -> Result<usize> {
        self.merge(record, MergeMode::Overwrite)
    }

    pub fn insert_or_update_keeping_local_changes(
        &self,
        record: Option<&RemoteRecord>,
    ) -> Result<usize> {
        self.merge(record, MergeMode::KeepLocalChanges)
    }

    pub fn merge(&self, record: Option<&RemoteRecord>, mode: MergeMode) -> Result<usize> {
        let Some(record) = record else {
            return Ok(0);
        };
        if !record.remote_id.is_assigned() {
            return Err(StorageError::MissingRemoteId(record.site_id));
        }

        match self
            .records
            .find_by_remote_id(record.site_id, record.remote_id)?
        {
            None => {
                let entity = self.records.insert(&from_remote(LocalId::UNASSIGNED, record))?;
                trace!(
                    "inserted {} {} for site {} as {}",
                    record.kind, record.remote_id, record.site_id, entity.local_id
                );
                Ok(1)
            }
            Some(existing)
                if mode == MergeMode::KeepLocalChanges && existing.is_locally_modified =>
            {
                // The remote value is dropped; the pending local edit wins
                debug!(
                    "kept local changes of {} over remote {} on site {}",
                    existing.local_id, record.remote_id, record.site_id
                );
                Ok(0)
            }
            Some(existing) => {
                let updated = from_remote(existing.local_id, record);
                self.records.upsert(&updated)
            }
        }
    }

    /// Persist a new draft that exists only on this device
    pub fn create_local_draft(
        &self,
        site_id: SiteId,
        kind: ContentKind,
        fields: ContentFields,
    ) -> Result<Entity> {
        let draft = Entity::local_draft(site_id, kind, fields);
        let stored = self.records.insert(&draft)?;
        debug!("created local draft {} on site {}", stored.local_id, site_id);
        Ok(stored)
    }

    /// Apply a user edit to an existing row
    ///
    /// Local-only rows stay local-only; anything already on the server is
    /// marked locally modified so later fetches in keep-local mode skip it.
    pub fn update_local(&self, entity: &Entity) -> Result<usize> {
        let Some(current) = self.records.get(entity.local_id)? else {
            return Ok(0);
        };

        let updated = Entity {
            local_id: current.local_id,
            remote_id: current.remote_id,
            site_id: current.site_id,
            kind: current.kind,
            is_local_only: current.is_local_only,
            is_locally_modified: !current.is_local_only,
            fields: entity.fields.clone(),
        };
        self.records.upsert(&updated)
    }

    /// Record the server's answer to a push of `local_id`
    ///
    /// The pushed row is updated in place: its `local_id` survives, it gains
    /// the server-assigned remote id, and both local-change flags clear. A
    /// row that a fetch inserted for the same remote id in the meantime is
    /// folded away so the pair never ends up duplicated.
    pub fn apply_push_result(&self, local_id: LocalId, record: &RemoteRecord) -> Result<usize> {
        if !record.remote_id.is_assigned() {
            return Err(StorageError::MissingRemoteId(record.site_id));
        }
        let Some(pushed) = self.records.get(local_id)? else {
            return Ok(0);
        };
        if record.site_id != pushed.site_id {
            return Err(StorageError::SiteMismatch {
                expected: pushed.site_id,
                actual: record.site_id,
            });
        }

        if let Some(holder) = self
            .records
            .find_by_remote_id(record.site_id, record.remote_id)?
        {
            if holder.local_id != pushed.local_id {
                if holder.is_locally_modified {
                    return Err(StorageError::Conflict {
                        site_id: record.site_id,
                        remote_id: record.remote_id,
                        holder: holder.local_id,
                    });
                }
                warn!(
                    "dropping fetched duplicate {} of pushed {} for {}",
                    holder.local_id, pushed.local_id, record.remote_id
                );
                self.records.delete(holder.local_id)?;
            }
        }

        let mut updated = from_remote(pushed.local_id, record);
        updated.kind = pushed.kind;
        self.records.upsert(&updated)
    }
}

fn from_remote(local_id: LocalId, record: &RemoteRecord) -> Entity {
    Entity {
        local_id,
        remote_id: record.remote_id,
        site_id: record.site_id,
        kind: record.kind,
        is_local_only: false,
        is_locally_modified: false,
        fields: record.fields.clone(),
    }
}
