use crate::action::Action;
use crate::error::SyncError;
use crate::queue::ActionSender;
use crate::types::{ContentFilter, Entity, LocalId, RemoteId, RemoteRecord, Site};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

/// Network abstraction for talking to a content server
///
/// One implementation per transport. Failures come back as typed
/// [`SyncError`]s; the content store wraps them into response actions.
#[async_trait]
pub trait NetworkClient: Send + Sync + 'static {
    /// Fetch one page of remote records matching `filter`
    async fn fetch(
        &self,
        site: &Site,
        filter: &ContentFilter,
    ) -> Result<Vec<RemoteRecord>, SyncError>;

    /// Create or update `entity` remotely, returning the server's copy
    async fn push(
        &self,
        site: &Site,
        entity: &Entity,
        progress: ProgressReporter,
    ) -> Result<RemoteRecord, SyncError>;

    async fn delete(&self, site: &Site, remote_id: RemoteId) -> Result<(), SyncError>;
}

/// Lets a client report upload progress for one entity
///
/// Reports re-enter as `UploadProgress` actions. Heartbeats are lossy: a
/// full queue drops the report instead of stalling the upload.
#[derive(Clone)]
pub struct ProgressReporter {
    local_id: LocalId,
    sender: ActionSender,
}

impl ProgressReporter {
    pub fn new(local_id: LocalId, sender: ActionSender) -> Self {
        Self { local_id, sender }
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn report(&self, progress: f32) {
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if let Err(e) = self.sender.try_send(Action::UploadProgress {
            local_id: self.local_id,
            progress,
        }) {
            trace!("dropped progress report for {}: {}", self.local_id, e);
        }
    }
}

/// Client for running without connectivity: every call fails with a
/// transport error, so requests land as retryable failures
#[derive(Debug, Default, Clone)]
pub struct OfflineClient;

#[async_trait]
impl NetworkClient for OfflineClient {
    async fn fetch(
        &self,
        site: &Site,
        _filter: &ContentFilter,
    ) -> Result<Vec<RemoteRecord>, SyncError> {
        Err(SyncError::Transport(format!("offline: cannot reach {}", site.url)))
    }

    async fn push(
        &self,
        site: &Site,
        _entity: &Entity,
        _progress: ProgressReporter,
    ) -> Result<RemoteRecord, SyncError> {
        Err(SyncError::Transport(format!("offline: cannot reach {}", site.url)))
    }

    async fn delete(&self, site: &Site, _remote_id: RemoteId) -> Result<(), SyncError> {
        Err(SyncError::Transport(format!("offline: cannot reach {}", site.url)))
    }
}

/// Bound a network call; an elapsed timer becomes a transport error
pub async fn with_timeout<T, F>(duration: Duration, call: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    match tokio::time::timeout(duration, call).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Transport(format!(
            "request timed out after {}ms",
            duration.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ActionQueue;
    use crate::types::{ContentKind, SiteId};

    #[tokio::test]
    async fn test_timeout_becomes_transport_error() {
        let result: Result<(), SyncError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[tokio::test]
    async fn test_offline_client_fails_with_transport() {
        let site = Site::new(SiteId(1), "https://example.org");
        let result = OfflineClient
            .fetch(&site, &ContentFilter::first_page(ContentKind::Post, 10))
            .await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[test]
    fn test_progress_reports_are_clamped() {
        let (sender, mut queue) = ActionQueue::new(8);
        let reporter = ProgressReporter::new(LocalId(3), sender);
        reporter.report(2.0);
        reporter.report(f32::NAN);

        let mut seen = Vec::new();
        while let Some(action) = queue.try_next() {
            seen.push(action);
        }
        assert_eq!(
            seen,
            vec![
                Action::UploadProgress {
                    local_id: LocalId(3),
                    progress: 1.0
                },
                Action::UploadProgress {
                    local_id: LocalId(3),
                    progress: 0.0
                },
            ]
        );
    }
}
