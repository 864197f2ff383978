use crate::types::{LocalId, RemoteId, SiteId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors observed while talking to the server or merging its data
///
/// These travel inside response actions and change events, so they are
/// plain data: cloneable, comparable and serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SyncError {
    /// Network unreachable, timeout
    #[error("transport error: {0}")]
    Transport(String),
    /// Malformed or unexpected response shape
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("authorization error: {0}")]
    Authorization(String),
    /// Duplicate remote id detected during merge
    #[error("conflict: {0}")]
    Conflict(String),
    /// Remote entity vanished
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Generic(String),
}

/// Stable discriminant of a [`SyncError`], persisted alongside upload records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Authorization,
    Conflict,
    NotFound,
    Generic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Generic => "generic",
        }
    }

    /// Unknown kinds decode as `Generic` so old rows stay readable
    pub fn parse(s: &str) -> Self {
        match s {
            "transport" => ErrorKind::Transport,
            "protocol" => ErrorKind::Protocol,
            "authorization" => ErrorKind::Authorization,
            "conflict" => ErrorKind::Conflict,
            "not_found" => ErrorKind::NotFound,
            _ => ErrorKind::Generic,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::Protocol(_) => ErrorKind::Protocol,
            SyncError::Authorization(_) => ErrorKind::Authorization,
            SyncError::Conflict(_) => ErrorKind::Conflict,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::Generic(_) => ErrorKind::Generic,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SyncError::Transport(m)
            | SyncError::Protocol(m)
            | SyncError::Authorization(m)
            | SyncError::Conflict(m)
            | SyncError::NotFound(m)
            | SyncError::Generic(m) => m,
        }
    }

    pub fn from_parts(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Transport => SyncError::Transport(message),
            ErrorKind::Protocol => SyncError::Protocol(message),
            ErrorKind::Authorization => SyncError::Authorization(message),
            ErrorKind::Conflict => SyncError::Conflict(message),
            ErrorKind::NotFound => SyncError::NotFound(message),
            ErrorKind::Generic => SyncError::Generic(message),
        }
    }
}

/// Errors raised by the record store and the merge logic on top of it
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("remote record for site {0} carries no remote id")]
    MissingRemoteId(SiteId),
    #[error("remote id {remote_id} on site {site_id} is held by locally modified entity {holder}")]
    Conflict {
        site_id: SiteId,
        remote_id: RemoteId,
        holder: LocalId,
    },
    #[error("server answered for site {actual} about an entity of site {expected}")]
    SiteMismatch { expected: SiteId, actual: SiteId },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { .. } => SyncError::Conflict(err.to_string()),
            StorageError::MissingRemoteId(_) | StorageError::SiteMismatch { .. } => {
                SyncError::Protocol(err.to_string())
            }
            other => SyncError::Generic(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        let errors = [
            SyncError::Transport("timeout".into()),
            SyncError::Protocol("bad json".into()),
            SyncError::Authorization("denied".into()),
            SyncError::Conflict("dup".into()),
            SyncError::NotFound("gone".into()),
            SyncError::Generic("oops".into()),
        ];
        for err in errors {
            let kind = ErrorKind::parse(err.kind().as_str());
            assert_eq!(SyncError::from_parts(kind, err.message()), err);
        }
    }

    #[test]
    fn test_unknown_kind_is_generic() {
        assert_eq!(ErrorKind::parse("something_new"), ErrorKind::Generic);
    }

    #[test]
    fn test_storage_conflict_maps_to_conflict() {
        let err = StorageError::Conflict {
            site_id: SiteId(1),
            remote_id: RemoteId(42),
            holder: LocalId(3),
        };
        let sync: SyncError = err.into();
        assert_eq!(sync.kind(), ErrorKind::Conflict);
        assert!(sync.message().contains("R42"));
    }
}
