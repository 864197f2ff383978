use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier assigned by the record store on first persist
///
/// `LocalId(0)` means "not yet persisted". Assigned ids are never reused,
/// even after the row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub i64);

impl LocalId {
    pub const UNASSIGNED: LocalId = LocalId(0);

    pub fn is_assigned(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Identifier assigned by the server. `RemoteId(0)` means "not created remotely".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteId(pub i64);

impl RemoteId {
    pub const NONE: RemoteId = RemoteId(0);

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }

    /// SQL representation: absent ids are stored as NULL so the
    /// `(site_id, remote_id)` unique index ignores them
    pub fn to_sql(&self) -> Option<i64> {
        if self.is_assigned() { Some(self.0) } else { None }
    }

    pub fn from_sql(value: Option<i64>) -> Self {
        RemoteId(value.unwrap_or(0))
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Local reference to the owning site (collection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(pub i64);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// A remote site that content is synchronized with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub url: String,
}

impl Site {
    pub fn new(id: SiteId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
        }
    }
}

/// Kind of content an entity holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContentKind {
    Post,
    Page,
    Media,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Post => "post",
            ContentKind::Page => "page",
            ContentKind::Media => "media",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(ContentKind::Post),
            "page" => Ok(ContentKind::Page),
            "media" => Ok(ContentKind::Media),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

/// Returned when a persisted enum column holds an unknown value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError(pub String);

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl std::error::Error for ParseEnumError {}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Entity payload
///
/// Reconciliation never looks inside; the whole struct is replaced or kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentFields {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub geolocation: Option<Geolocation>,
    #[serde(default)]
    pub term_ids: Vec<i64>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl ContentFields {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Local copy of a piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub local_id: LocalId,
    pub remote_id: RemoteId,
    pub site_id: SiteId,
    pub kind: ContentKind,
    pub is_local_only: bool,
    pub is_locally_modified: bool,
    pub fields: ContentFields,
}

impl Entity {
    /// A draft that has never been sent to the server
    pub fn local_draft(site_id: SiteId, kind: ContentKind, fields: ContentFields) -> Self {
        Self {
            local_id: LocalId::UNASSIGNED,
            remote_id: RemoteId::NONE,
            site_id,
            kind,
            is_local_only: true,
            is_locally_modified: false,
            fields,
        }
    }

    /// Whether local state must not be silently discarded
    pub fn has_local_changes(&self) -> bool {
        self.is_local_only || self.is_locally_modified
    }
}

/// Server copy of a piece of content, as decoded by a network client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub remote_id: RemoteId,
    pub site_id: SiteId,
    pub kind: ContentKind,
    pub fields: ContentFields,
}

impl RemoteRecord {
    pub fn new(
        site_id: SiteId,
        remote_id: RemoteId,
        kind: ContentKind,
        fields: ContentFields,
    ) -> Self {
        Self {
            remote_id,
            site_id,
            kind,
            fields,
        }
    }
}

/// Parameters of a remote list fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFilter {
    pub kind: ContentKind,
    pub statuses: Vec<String>,
    pub offset: usize,
    pub limit: usize,
}

impl ContentFilter {
    pub fn first_page(kind: ContentKind, limit: usize) -> Self {
        Self {
            kind,
            statuses: Vec::new(),
            offset: 0,
            limit,
        }
    }

    pub fn next_page(&self) -> Self {
        Self {
            offset: self.offset + self.limit,
            ..self.clone()
        }
    }
}

/// Which remote operation an upload record tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadOperation {
    Push,
    Delete,
}

impl UploadOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadOperation::Push => "push",
            UploadOperation::Delete => "delete",
        }
    }
}

impl FromStr for UploadOperation {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(UploadOperation::Push),
            "delete" => Ok(UploadOperation::Delete),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

/// Upload record states
///
/// ```text
/// (none) -> Pending -> Uploading -> Completed
///                   \           \-> Failed | Cancelled
///                    \-> Cancelled
/// Pending | Failed | Cancelled -> Pending          (retry)
/// Deleting -> Deleted | Failed                     (removal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UploadState {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
    Deleting,
    Deleted,
}

impl UploadState {
    pub const ALL: [UploadState; 7] = [
        UploadState::Pending,
        UploadState::Uploading,
        UploadState::Completed,
        UploadState::Failed,
        UploadState::Cancelled,
        UploadState::Deleting,
        UploadState::Deleted,
    ];

    /// States from which a fresh push or delete request may supersede the record
    pub const REQUESTABLE: [UploadState; 4] = [
        UploadState::Pending,
        UploadState::Failed,
        UploadState::Cancelled,
        UploadState::Completed,
    ];

    pub const RETRYABLE: [UploadState; 3] = [
        UploadState::Pending,
        UploadState::Failed,
        UploadState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Pending => "PENDING",
            UploadState::Uploading => "UPLOADING",
            UploadState::Completed => "COMPLETED",
            UploadState::Failed => "FAILED",
            UploadState::Cancelled => "CANCELLED",
            UploadState::Deleting => "DELETING",
            UploadState::Deleted => "DELETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Deleted)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, UploadState::Uploading | UploadState::Deleting)
    }

    pub fn is_retryable(&self) -> bool {
        Self::RETRYABLE.contains(self)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for UploadState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEnumError(s.to_string()))
    }
}

/// Outcome of a push/delete attempt as tracked separately from entity content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub local_id: LocalId,
    pub operation: UploadOperation,
    pub state: UploadState,
    pub progress: f32,
    pub last_error: Option<SyncError>,
    pub attempts: u32,
}

impl UploadRecord {
    pub fn new(local_id: LocalId, operation: UploadOperation, state: UploadState) -> Self {
        Self {
            local_id,
            operation,
            state,
            progress: 0.0,
            last_error: None,
            attempts: 0,
        }
    }
}

/// Result reported for an upload by whoever performed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UploadOutcome {
    Completed,
    Failed(SyncError),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_id_sql_mapping() {
        assert_eq!(RemoteId::NONE.to_sql(), None);
        assert_eq!(RemoteId(42).to_sql(), Some(42));
        assert_eq!(RemoteId::from_sql(None), RemoteId::NONE);
        assert_eq!(RemoteId::from_sql(Some(7)), RemoteId(7));
    }

    #[test]
    fn test_local_draft_flags() {
        let draft = Entity::local_draft(SiteId(1), ContentKind::Post, ContentFields::titled("hi"));
        assert!(draft.is_local_only);
        assert!(!draft.is_locally_modified);
        assert!(!draft.remote_id.is_assigned());
        assert!(!draft.local_id.is_assigned());
        assert!(draft.has_local_changes());
    }

    #[test]
    fn test_upload_state_roundtrip_string() {
        for state in UploadState::ALL {
            assert_eq!(UploadState::from_str(state.as_str()).unwrap(), state);
        }
        assert_eq!(UploadState::from_str("failed").unwrap(), UploadState::Failed);
        assert!(UploadState::from_str("bogus").is_err());
    }

    #[test]
    fn test_upload_state_classes() {
        assert!(UploadState::Completed.is_terminal());
        assert!(UploadState::Deleted.is_terminal());
        assert!(!UploadState::Failed.is_terminal());
        assert!(!UploadState::Cancelled.is_terminal());

        assert!(UploadState::Failed.is_retryable());
        assert!(UploadState::Cancelled.is_retryable());
        assert!(!UploadState::Uploading.is_retryable());
        assert!(!UploadState::Completed.is_retryable());

        assert!(UploadState::Uploading.is_in_flight());
        assert!(UploadState::Deleting.is_in_flight());
    }

    #[test]
    fn test_content_kind_parse() {
        assert_eq!(ContentKind::from_str("media").unwrap(), ContentKind::Media);
        assert!(ContentKind::from_str("Post").is_err());
    }

    #[test]
    fn test_filter_paging() {
        let first = ContentFilter::first_page(ContentKind::Page, 20);
        let second = first.next_page();
        assert_eq!(second.offset, 20);
        assert_eq!(second.limit, 20);
        assert_eq!(second.kind, ContentKind::Page);
    }

    #[test]
    fn test_fields_json_defaults() {
        let fields: ContentFields = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert_eq!(fields.title, "x");
        assert!(fields.term_ids.is_empty());
        assert!(fields.geolocation.is_none());
    }
}
