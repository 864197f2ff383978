use crate::error::{Result, SyncError};
use crate::storage::RecordStore;
use crate::types::{LocalId, UploadOperation, UploadRecord, UploadState};
use std::sync::Arc;
use tracing::{debug, trace};

/// Tracks the outcome of push and delete operations per entity
///
/// Each transition is a compare-and-set on the stored state, so a stale or
/// late write (a progress heartbeat after a failure, a success callback after
/// a cancel) finds an unexpected state and writes nothing. Every method
/// returns whether it wrote.
pub struct UploadTracker<R: RecordStore> {
    records: Arc<R>,
}

impl<R: RecordStore> UploadTracker<R> {
    pub fn new(records: Arc<R>) -> Self {
        Self { records }
    }

    pub fn get(&self, local_id: LocalId) -> Result<Option<UploadRecord>> {
        self.records.get_upload(local_id)
    }

    pub fn find(&self, state: UploadState) -> Result<Vec<UploadRecord>> {
        self.records.find_uploads(Some(state))
    }

    pub fn count(&self, state: UploadState) -> Result<usize> {
        Ok(self.find(state)?.len())
    }

    /// Queue a push, superseding any settled record
    pub fn request_push(&self, local_id: LocalId) -> Result<bool> {
        let record = UploadRecord::new(local_id, UploadOperation::Push, UploadState::Pending);
        self.write(&record, &UploadState::REQUESTABLE, true)
    }

    /// Pending -> Uploading for a new attempt
    pub fn start(&self, local_id: LocalId) -> Result<bool> {
        let Some(current) = self.records.get_upload(local_id)? else {
            return Ok(false);
        };
        let record = UploadRecord {
            state: UploadState::Uploading,
            progress: 0.0,
            last_error: None,
            attempts: current.attempts + 1,
            ..current
        };
        self.write(&record, &[UploadState::Pending], false)
    }

    /// Heartbeat for an in-flight upload; never moves backwards or revives
    /// a record that already left `Uploading`
    pub fn progress(&self, local_id: LocalId, progress: f32) -> Result<bool> {
        let written = self
            .records
            .update_upload_progress(local_id, progress.clamp(0.0, 1.0))?;
        if written == 0 {
            trace!("ignored stale progress {} for {}", progress, local_id);
        }
        Ok(written > 0)
    }

    pub fn complete(&self, local_id: LocalId) -> Result<bool> {
        let Some(current) = self.records.get_upload(local_id)? else {
            return Ok(false);
        };
        let record = UploadRecord {
            state: UploadState::Completed,
            progress: 1.0,
            last_error: None,
            ..current
        };
        self.write(&record, &[UploadState::Uploading], false)
    }

    /// Uploading -> Failed; a queued record that never started is cancelled
    /// or retried instead
    pub fn fail(&self, local_id: LocalId, error: SyncError) -> Result<bool> {
        let Some(current) = self.records.get_upload(local_id)? else {
            return Ok(false);
        };
        let record = UploadRecord {
            state: UploadState::Failed,
            last_error: Some(error),
            ..current
        };
        self.write(&record, &[UploadState::Uploading], false)
    }

    /// Cancel a queued or in-flight upload; settled records are left alone
    pub fn cancel(&self, local_id: LocalId) -> Result<bool> {
        let Some(current) = self.records.get_upload(local_id)? else {
            return Ok(false);
        };
        let record = UploadRecord {
            state: UploadState::Cancelled,
            last_error: None,
            ..current
        };
        self.write(&record, &[UploadState::Pending, UploadState::Uploading], false)
    }

    /// Pending | Failed | Cancelled -> Pending, keeping the operation kind
    pub fn retry(&self, local_id: LocalId) -> Result<bool> {
        let Some(current) = self.records.get_upload(local_id)? else {
            return Ok(false);
        };
        let record = UploadRecord {
            state: UploadState::Pending,
            progress: 0.0,
            last_error: None,
            ..current
        };
        self.write(&record, &UploadState::RETRYABLE, false)
    }

    /// Retry each id, returning how many actually moved to `Pending`
    pub fn retry_many(&self, local_ids: &[LocalId]) -> Result<usize> {
        let mut retried = 0;
        for local_id in local_ids {
            if self.retry(*local_id)? {
                retried += 1;
            }
        }
        Ok(retried)
    }

    pub fn request_delete(&self, local_id: LocalId) -> Result<bool> {
        let record = UploadRecord::new(local_id, UploadOperation::Delete, UploadState::Deleting);
        self.write(&record, &UploadState::REQUESTABLE, true)
    }

    pub fn finish_delete(&self, local_id: LocalId) -> Result<bool> {
        let Some(current) = self.records.get_upload(local_id)? else {
            return Ok(false);
        };
        let record = UploadRecord {
            state: UploadState::Deleted,
            last_error: None,
            ..current
        };
        self.write(&record, &[UploadState::Deleting], false)
    }

    pub fn fail_delete(&self, local_id: LocalId, error: SyncError) -> Result<bool> {
        let Some(current) = self.records.get_upload(local_id)? else {
            return Ok(false);
        };
        let record = UploadRecord {
            state: UploadState::Failed,
            last_error: Some(error),
            ..current
        };
        self.write(&record, &[UploadState::Deleting], false)
    }

    /// Drop the record whatever its state
    pub fn clear(&self, local_id: LocalId) -> Result<bool> {
        Ok(self.records.delete_upload(local_id)? > 0)
    }

    fn write(
        &self,
        record: &UploadRecord,
        from: &[UploadState],
        create_if_missing: bool,
    ) -> Result<bool> {
        let written = self
            .records
            .transition_upload(record, from, create_if_missing)?;
        if written > 0 {
            debug!("upload {} -> {}", record.local_id, record.state);
        } else {
            trace!(
                "upload {} transition to {} not applicable",
                record.local_id, record.state
            );
        }
        Ok(written > 0)
    }
}
