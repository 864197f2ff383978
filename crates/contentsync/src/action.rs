use crate::error::SyncError;
use crate::types::{
    ContentFields, ContentFilter, ContentKind, Entity, LocalId, RemoteRecord, Site, SiteId,
    UploadOutcome,
};
use std::fmt;

/// Discriminant of an [`Action`], used for store interest and change events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    FetchContent,
    FetchedContent,
    PushContent,
    PushedContent,
    DeleteContent,
    DeletedContent,
    UpdateContent,
    CreateDraft,
    UploadProgress,
    UploadResult,
    CancelUpload,
    RetryUploads,
    ClearUpload,
    RemoveSiteContent,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A typed request or response routed through the dispatcher
///
/// Each kind carries exactly one payload shape, checked by the compiler.
/// Responses (`Fetched*`, `Pushed*`, `Deleted*`) carry network errors in
/// their `error` field instead of dropping them.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    FetchContent {
        site: Site,
        filter: ContentFilter,
    },
    FetchedContent {
        site: Site,
        filter: ContentFilter,
        records: Vec<RemoteRecord>,
        can_load_more: bool,
        error: Option<SyncError>,
    },
    PushContent {
        site: Site,
        local_id: LocalId,
    },
    PushedContent {
        site: Site,
        local_id: LocalId,
        record: Option<RemoteRecord>,
        error: Option<SyncError>,
    },
    DeleteContent {
        site: Site,
        local_id: LocalId,
    },
    DeletedContent {
        site: Site,
        local_id: LocalId,
        error: Option<SyncError>,
    },
    /// Purely local write of user edits
    UpdateContent {
        entity: Entity,
    },
    CreateDraft {
        site: Site,
        kind: ContentKind,
        fields: ContentFields,
    },
    UploadProgress {
        local_id: LocalId,
        progress: f32,
    },
    UploadResult {
        local_id: LocalId,
        outcome: UploadOutcome,
    },
    CancelUpload {
        local_id: LocalId,
    },
    RetryUploads {
        local_ids: Vec<LocalId>,
    },
    ClearUpload {
        local_id: LocalId,
    },
    /// Forget every local copy belonging to a site
    RemoveSiteContent {
        site: Site,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::FetchContent { .. } => ActionKind::FetchContent,
            Action::FetchedContent { .. } => ActionKind::FetchedContent,
            Action::PushContent { .. } => ActionKind::PushContent,
            Action::PushedContent { .. } => ActionKind::PushedContent,
            Action::DeleteContent { .. } => ActionKind::DeleteContent,
            Action::DeletedContent { .. } => ActionKind::DeletedContent,
            Action::UpdateContent { .. } => ActionKind::UpdateContent,
            Action::CreateDraft { .. } => ActionKind::CreateDraft,
            Action::UploadProgress { .. } => ActionKind::UploadProgress,
            Action::UploadResult { .. } => ActionKind::UploadResult,
            Action::CancelUpload { .. } => ActionKind::CancelUpload,
            Action::RetryUploads { .. } => ActionKind::RetryUploads,
            Action::ClearUpload { .. } => ActionKind::ClearUpload,
            Action::RemoveSiteContent { .. } => ActionKind::RemoveSiteContent,
        }
    }

    /// The entity an action is about, when there is exactly one
    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            Action::PushContent { local_id, .. }
            | Action::PushedContent { local_id, .. }
            | Action::DeleteContent { local_id, .. }
            | Action::DeletedContent { local_id, .. }
            | Action::UploadProgress { local_id, .. }
            | Action::UploadResult { local_id, .. }
            | Action::CancelUpload { local_id }
            | Action::ClearUpload { local_id } => Some(*local_id),
            Action::UpdateContent { entity } => Some(entity.local_id),
            _ => None,
        }
    }

    pub fn site_id(&self) -> Option<SiteId> {
        match self {
            Action::FetchContent { site, .. }
            | Action::FetchedContent { site, .. }
            | Action::PushContent { site, .. }
            | Action::PushedContent { site, .. }
            | Action::DeleteContent { site, .. }
            | Action::DeletedContent { site, .. }
            | Action::CreateDraft { site, .. }
            | Action::RemoveSiteContent { site } => Some(site.id),
            Action::UpdateContent { entity } => Some(entity.site_id),
            _ => None,
        }
    }

    /// Panics on a payload no store can act on
    ///
    /// These are programming errors at the call site, so dispatch fails fast
    /// rather than letting a store silently skip them.
    pub fn assert_well_formed(&self) {
        match self {
            Action::UploadProgress { local_id, progress } => {
                assert!(
                    local_id.is_assigned(),
                    "UploadProgress requires an assigned local id"
                );
                assert!(
                    progress.is_finite() && (0.0..=1.0).contains(progress),
                    "UploadProgress progress {} outside [0, 1]",
                    progress
                );
            }
            Action::FetchContent { filter, .. } => {
                assert!(filter.limit > 0, "FetchContent requires a non-zero page size");
            }
            Action::UpdateContent { entity } => {
                assert!(
                    entity.local_id.is_assigned(),
                    "UpdateContent requires a persisted entity"
                );
            }
            Action::RetryUploads { local_ids } => {
                assert!(
                    local_ids.iter().all(LocalId::is_assigned),
                    "RetryUploads requires assigned local ids"
                );
            }
            other => {
                if let Some(local_id) = other.local_id() {
                    assert!(
                        local_id.is_assigned(),
                        "{} requires an assigned local id",
                        other.kind()
                    );
                }
            }
        }
    }
}

/// Emitted after a store finishes handling an action
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub cause: ActionKind,
    /// Rows written while handling the action
    pub affected: usize,
    pub local_id: Option<LocalId>,
    pub site_id: Option<SiteId>,
    pub error: Option<SyncError>,
}

impl ChangeEvent {
    pub fn for_action(action: &Action, affected: usize) -> Self {
        Self {
            cause: action.kind(),
            affected,
            local_id: action.local_id(),
            site_id: action.site_id(),
            error: None,
        }
    }

    pub fn with_local_id(mut self, local_id: LocalId) -> Self {
        self.local_id = Some(local_id);
        self
    }

    pub fn with_error(mut self, error: SyncError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentKind;

    fn site() -> Site {
        Site::new(SiteId(1), "https://example.org")
    }

    #[test]
    fn test_kind_and_ids() {
        let action = Action::PushContent {
            site: site(),
            local_id: LocalId(5),
        };
        assert_eq!(action.kind(), ActionKind::PushContent);
        assert_eq!(action.local_id(), Some(LocalId(5)));
        assert_eq!(action.site_id(), Some(SiteId(1)));

        let retry = Action::RetryUploads {
            local_ids: vec![LocalId(1)],
        };
        assert_eq!(retry.local_id(), None);
        assert_eq!(retry.site_id(), None);
    }

    #[test]
    fn test_well_formed_actions_pass() {
        Action::UploadProgress {
            local_id: LocalId(1),
            progress: 0.5,
        }
        .assert_well_formed();
        Action::FetchContent {
            site: site(),
            filter: ContentFilter::first_page(ContentKind::Post, 20),
        }
        .assert_well_formed();
    }

    #[test]
    #[should_panic(expected = "outside [0, 1]")]
    fn test_progress_out_of_range_panics() {
        Action::UploadProgress {
            local_id: LocalId(1),
            progress: 1.5,
        }
        .assert_well_formed();
    }

    #[test]
    #[should_panic(expected = "outside [0, 1]")]
    fn test_progress_nan_panics() {
        Action::UploadProgress {
            local_id: LocalId(1),
            progress: f32::NAN,
        }
        .assert_well_formed();
    }

    #[test]
    #[should_panic(expected = "requires an assigned local id")]
    fn test_unassigned_local_id_panics() {
        Action::PushContent {
            site: site(),
            local_id: LocalId::UNASSIGNED,
        }
        .assert_well_formed();
    }

    #[test]
    fn test_change_event_from_action() {
        let action = Action::DeleteContent {
            site: site(),
            local_id: LocalId(9),
        };
        let event = ChangeEvent::for_action(&action, 1)
            .with_error(SyncError::Transport("down".into()));
        assert_eq!(event.cause, ActionKind::DeleteContent);
        assert_eq!(event.local_id, Some(LocalId(9)));
        assert!(event.is_error());
    }
}
