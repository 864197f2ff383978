use crate::action::{Action, ChangeEvent};
use crate::config::NetworkConfig;
use crate::error::{Result, StorageError, SyncError};
use crate::network::{NetworkClient, ProgressReporter, with_timeout};
use crate::queue::ActionSender;
use crate::reconcile::Reconciler;
use crate::storage::{EntityQuery, RecordStore};
use crate::store::Store;
use crate::types::{
    ContentFields, ContentFilter, ContentKind, Entity, LocalId, RemoteId, RemoteRecord, Site,
    SiteId, UploadOutcome, UploadRecord, UploadState,
};
use crate::upload::UploadTracker;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Store owning posts, pages and media plus their upload records
///
/// Request actions (`FetchContent`, `PushContent`, `DeleteContent`) spawn a
/// network task and return immediately; the task re-enters through the
/// action queue with the matching response action, which is where the
/// record store is written.
pub struct ContentStore<R: RecordStore, C: NetworkClient> {
    records: Arc<R>,
    reconciler: Reconciler<R>,
    tracker: UploadTracker<R>,
    client: Arc<C>,
    sender: ActionSender,
    request_timeout: Duration,
    page_size: usize,
    in_flight: Mutex<HashMap<LocalId, AbortHandle>>,
}

impl<R: RecordStore + 'static, C: NetworkClient> ContentStore<R, C> {
    pub fn new(
        records: Arc<R>,
        client: Arc<C>,
        sender: ActionSender,
        config: &NetworkConfig,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&records)),
            tracker: UploadTracker::new(Arc::clone(&records)),
            records,
            client,
            sender,
            request_timeout: config.request_timeout(),
            page_size: config.page_size.max(1),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Request for the first page of `kind` at the configured page size
    pub fn fetch_first_page(&self, site: Site, kind: ContentKind) -> Action {
        Action::FetchContent {
            site,
            filter: ContentFilter::first_page(kind, self.page_size),
        }
    }

    pub fn get(&self, local_id: LocalId) -> Result<Option<Entity>> {
        self.records.get(local_id)
    }

    pub fn content_for_site(&self, site_id: SiteId, kind: ContentKind) -> Result<Vec<Entity>> {
        self.records.find(&EntityQuery::site(site_id).kind(kind))
    }

    /// Entities whose local state has not reached the server yet
    pub fn pending_local_changes(&self, site_id: SiteId) -> Result<Vec<Entity>> {
        Ok(self
            .records
            .find(&EntityQuery::site(site_id))?
            .into_iter()
            .filter(Entity::has_local_changes)
            .collect())
    }

    pub fn upload_record(&self, local_id: LocalId) -> Result<Option<UploadRecord>> {
        self.tracker.get(local_id)
    }

    pub fn tracker(&self) -> &UploadTracker<R> {
        &self.tracker
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn abort_in_flight(&self, local_id: LocalId) -> bool {
        match self.in_flight.lock().remove(&local_id) {
            Some(handle) => {
                handle.abort();
                debug!("aborted network task for {}", local_id);
                true
            }
            None => false,
        }
    }

    fn apply(&self, action: &Action) -> Result<Option<ChangeEvent>> {
        let event = match action {
            Action::FetchContent { site, filter } => {
                self.spawn_fetch(site.clone(), filter.clone());
                return Ok(None);
            }
            Action::FetchedContent {
                site,
                records,
                can_load_more,
                error,
                ..
            } => self.on_fetched(action, site, records, *can_load_more, error.as_ref())?,
            Action::PushContent { site, local_id } => self.on_push(action, site, *local_id)?,
            Action::PushedContent {
                local_id,
                record,
                error,
                ..
            } => self.on_pushed(action, *local_id, record.as_ref(), error.as_ref())?,
            Action::DeleteContent { site, local_id } => self.on_delete(action, site, *local_id)?,
            Action::DeletedContent {
                local_id, error, ..
            } => self.on_deleted(action, *local_id, error.as_ref())?,
            Action::UpdateContent { entity } => {
                let written = self.reconciler.update_local(entity)?;
                let event = ChangeEvent::for_action(action, written);
                if written == 0 {
                    event.with_error(not_found(entity.local_id))
                } else {
                    event
                }
            }
            Action::CreateDraft { site, kind, fields } => {
                self.on_create_draft(action, site.id, *kind, fields)?
            }
            Action::UploadProgress { local_id, progress } => {
                let written = self.tracker.progress(*local_id, *progress)?;
                ChangeEvent::for_action(action, written as usize)
            }
            Action::UploadResult { local_id, outcome } => {
                self.on_upload_result(action, *local_id, outcome)?
            }
            Action::CancelUpload { local_id } => self.on_cancel(action, *local_id)?,
            Action::RetryUploads { local_ids } => {
                let retried = self.tracker.retry_many(local_ids)?;
                info!("retried {} of {} uploads", retried, local_ids.len());
                ChangeEvent::for_action(action, retried)
            }
            Action::ClearUpload { local_id } => {
                let cleared = self.tracker.clear(*local_id)?;
                ChangeEvent::for_action(action, cleared as usize)
            }
            Action::RemoveSiteContent { site } => {
                let query = EntityQuery::site(site.id);
                for entity in self.records.find(&query)? {
                    self.abort_in_flight(entity.local_id);
                }
                let removed = self.records.delete_where(&query)?;
                info!("removed {} local copies for site {}", removed, site.id);
                ChangeEvent::for_action(action, removed)
            }
        };
        Ok(Some(event))
    }

    fn spawn_fetch(&self, site: Site, filter: ContentFilter) {
        let client = Arc::clone(&self.client);
        let sender = self.sender.clone();
        let timeout = self.request_timeout;

        debug!("fetching {} page at offset {} for site {}", filter.kind, filter.offset, site.id);
        tokio::spawn(async move {
            let result = with_timeout(timeout, client.fetch(&site, &filter)).await;
            let response = match result {
                Ok(records) => Action::FetchedContent {
                    can_load_more: records.len() >= filter.limit,
                    site,
                    filter,
                    records,
                    error: None,
                },
                Err(e) => Action::FetchedContent {
                    site,
                    filter,
                    records: Vec::new(),
                    can_load_more: false,
                    error: Some(e),
                },
            };
            if let Err(e) = sender.send(response).await {
                warn!("dropping fetch response: {}", e);
            }
        });
    }

    fn on_fetched(
        &self,
        action: &Action,
        site: &Site,
        records: &[RemoteRecord],
        can_load_more: bool,
        error: Option<&SyncError>,
    ) -> Result<ChangeEvent> {
        if let Some(error) = error {
            warn!("fetch for site {} failed: {}", site.id, error);
            return Ok(ChangeEvent::for_action(action, 0).with_error(error.clone()));
        }

        let mut written = 0;
        for record in records {
            if record.site_id != site.id {
                warn!(
                    "skipping {} from site {} in a fetch for site {}",
                    record.remote_id, record.site_id, site.id
                );
                continue;
            }
            if !record.remote_id.is_assigned() {
                warn!("skipping fetched record without remote id on site {}", site.id);
                continue;
            }
            written += self
                .reconciler
                .insert_or_update_keeping_local_changes(Some(record))?;
        }

        info!(
            "fetched {} records for site {}, {} written, more={}",
            records.len(),
            site.id,
            written,
            can_load_more
        );
        Ok(ChangeEvent::for_action(action, written))
    }

    fn on_push(&self, action: &Action, site: &Site, local_id: LocalId) -> Result<ChangeEvent> {
        let event = ChangeEvent::for_action(action, 0);
        let Some(entity) = self.records.get(local_id)? else {
            return Ok(event.with_error(not_found(local_id)));
        };
        if !self.tracker.request_push(local_id)? {
            return Ok(event.with_error(SyncError::Generic(format!(
                "{} already has an operation in flight",
                local_id
            ))));
        }
        self.tracker.start(local_id)?;
        self.spawn_push(site.clone(), entity);
        Ok(ChangeEvent::for_action(action, 1))
    }

    fn spawn_push(&self, site: Site, entity: Entity) {
        let client = Arc::clone(&self.client);
        let sender = self.sender.clone();
        let timeout = self.request_timeout;
        let local_id = entity.local_id;
        let progress = ProgressReporter::new(local_id, sender.clone());

        debug!("pushing {} to site {}", local_id, site.id);
        let task = tokio::spawn(async move {
            let result = with_timeout(timeout, client.push(&site, &entity, progress)).await;
            let (record, error) = match result {
                Ok(record) => (Some(record), None),
                Err(e) => (None, Some(e)),
            };
            let response = Action::PushedContent {
                site,
                local_id,
                record,
                error,
            };
            if let Err(e) = sender.send(response).await {
                warn!("dropping push response for {}: {}", local_id, e);
            }
        });
        self.in_flight.lock().insert(local_id, task.abort_handle());
    }

    fn on_pushed(
        &self,
        action: &Action,
        local_id: LocalId,
        record: Option<&RemoteRecord>,
        error: Option<&SyncError>,
    ) -> Result<ChangeEvent> {
        self.in_flight.lock().remove(&local_id);
        let event = ChangeEvent::for_action(action, 0);

        let state = self.tracker.get(local_id)?.map(|r| r.state);
        if state != Some(UploadState::Uploading) {
            debug!("ignoring late push result for {} in state {:?}", local_id, state);
            return Ok(event);
        }

        let record = match (record, error) {
            (_, Some(error)) => {
                warn!("push of {} failed: {}", local_id, error);
                self.tracker.fail(local_id, error.clone())?;
                return Ok(event.with_error(error.clone()));
            }
            (None, None) => {
                let error = SyncError::Protocol("push response carried no record".to_string());
                self.tracker.fail(local_id, error.clone())?;
                return Ok(event.with_error(error));
            }
            (Some(record), None) => record,
        };

        match self.reconciler.apply_push_result(local_id, record) {
            Ok(written) => {
                self.tracker.complete(local_id)?;
                info!("pushed {} as {}", local_id, record.remote_id);
                Ok(ChangeEvent::for_action(action, written))
            }
            Err(
                err @ (StorageError::Conflict { .. }
                | StorageError::MissingRemoteId(_)
                | StorageError::SiteMismatch { .. }),
            ) => {
                let error = SyncError::from(err);
                warn!("push result for {} rejected: {}", local_id, error);
                self.tracker.fail(local_id, error.clone())?;
                Ok(event.with_error(error))
            }
            Err(other) => Err(other),
        }
    }

    fn on_delete(&self, action: &Action, site: &Site, local_id: LocalId) -> Result<ChangeEvent> {
        let event = ChangeEvent::for_action(action, 0);
        let Some(entity) = self.records.get(local_id)? else {
            return Ok(event.with_error(not_found(local_id)));
        };

        if !entity.remote_id.is_assigned() {
            // Never reached the server, so there is nothing remote to remove
            self.abort_in_flight(local_id);
            let removed = self.records.delete(local_id)?;
            debug!("deleted local-only {}", local_id);
            return Ok(ChangeEvent::for_action(action, removed));
        }

        if !self.tracker.request_delete(local_id)? {
            return Ok(event.with_error(SyncError::Generic(format!(
                "{} already has an operation in flight",
                local_id
            ))));
        }
        self.spawn_delete(site.clone(), local_id, entity.remote_id);
        Ok(ChangeEvent::for_action(action, 1))
    }

    fn spawn_delete(&self, site: Site, local_id: LocalId, remote_id: RemoteId) {
        let client = Arc::clone(&self.client);
        let sender = self.sender.clone();
        let timeout = self.request_timeout;

        debug!("deleting {} ({}) from site {}", local_id, remote_id, site.id);
        let task = tokio::spawn(async move {
            let error = with_timeout(timeout, client.delete(&site, remote_id))
                .await
                .err();
            let response = Action::DeletedContent {
                site,
                local_id,
                error,
            };
            if let Err(e) = sender.send(response).await {
                warn!("dropping delete response for {}: {}", local_id, e);
            }
        });
        self.in_flight.lock().insert(local_id, task.abort_handle());
    }

    fn on_deleted(
        &self,
        action: &Action,
        local_id: LocalId,
        error: Option<&SyncError>,
    ) -> Result<ChangeEvent> {
        self.in_flight.lock().remove(&local_id);
        match error {
            // Already gone remotely counts as deleted
            None | Some(SyncError::NotFound(_)) => {
                self.tracker.finish_delete(local_id)?;
                let removed = self.records.delete(local_id)?;
                info!("deleted {}", local_id);
                Ok(ChangeEvent::for_action(action, removed))
            }
            Some(error) => {
                warn!("delete of {} failed: {}", local_id, error);
                self.tracker.fail_delete(local_id, error.clone())?;
                Ok(ChangeEvent::for_action(action, 0).with_error(error.clone()))
            }
        }
    }

    fn on_create_draft(
        &self,
        action: &Action,
        site_id: SiteId,
        kind: ContentKind,
        fields: &ContentFields,
    ) -> Result<ChangeEvent> {
        let draft = self
            .reconciler
            .create_local_draft(site_id, kind, fields.clone())?;
        Ok(ChangeEvent::for_action(action, 1).with_local_id(draft.local_id))
    }

    fn on_upload_result(
        &self,
        action: &Action,
        local_id: LocalId,
        outcome: &UploadOutcome,
    ) -> Result<ChangeEvent> {
        let written = match outcome {
            UploadOutcome::Completed => {
                self.in_flight.lock().remove(&local_id);
                self.tracker.complete(local_id)?
            }
            UploadOutcome::Cancelled => {
                self.abort_in_flight(local_id);
                self.tracker.cancel(local_id)?
            }
            UploadOutcome::Failed(error) => {
                self.abort_in_flight(local_id);
                let deleting = self
                    .tracker
                    .get(local_id)?
                    .is_some_and(|r| r.state == UploadState::Deleting);
                let written = if deleting {
                    self.tracker.fail_delete(local_id, error.clone())?
                } else {
                    self.tracker.fail(local_id, error.clone())?
                };
                return Ok(
                    ChangeEvent::for_action(action, written as usize).with_error(error.clone())
                );
            }
        };
        Ok(ChangeEvent::for_action(action, written as usize))
    }

    fn on_cancel(&self, action: &Action, local_id: LocalId) -> Result<ChangeEvent> {
        let cancellable = matches!(
            self.tracker.get(local_id)?.map(|r| r.state),
            Some(UploadState::Pending | UploadState::Uploading)
        );
        if cancellable {
            // Best effort: the task may already have sent its response, in
            // which case the state check in on_pushed discards it
            self.abort_in_flight(local_id);
        }
        let written = self.tracker.cancel(local_id)?;
        Ok(ChangeEvent::for_action(action, written as usize))
    }
}

fn not_found(local_id: LocalId) -> SyncError {
    SyncError::NotFound(format!("{} does not exist", local_id))
}

impl<R: RecordStore + 'static, C: NetworkClient> Store for ContentStore<R, C> {
    fn name(&self) -> &str {
        "content"
    }

    fn on_register(&self) {
        info!("content store registered");
    }

    fn handle_action(&self, action: &Action) -> Option<ChangeEvent> {
        match self.apply(action) {
            Ok(event) => event,
            Err(err) => {
                error!("content store failed on {}: {}", action.kind(), err);
                Some(ChangeEvent::for_action(action, 0).with_error(err.into()))
            }
        }
    }
}
