//! Error types for outline operations.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Coarse classification callers map to status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    PermissionDenied,
    Conflict,
    Internal,
}

/// Errors that can occur during outline operations.
///
/// Validation and lookup errors carry the offending field or id so the
/// request can be fixed. Conflict and internal errors display generically;
/// their detail goes to the log.
#[derive(Error, Debug)]
pub enum FolioError {
    /// Malformed request: bad enum value, blank block, cross-scope selection, cycle.
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    /// A referenced item does not resolve within the expected scope.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// Raised by the access-control collaborator, never by the engine itself.
    #[error("permission denied")]
    PermissionDenied,

    /// Another writer held the database lock past the busy timeout.
    #[error("conflicting concurrent update, retry")]
    Conflict(#[source] rusqlite::Error),

    /// Store failure.
    #[error("internal storage error")]
    Internal(#[source] rusqlite::Error),

    /// Filesystem failure while preparing the database location.
    #[error("internal storage error")]
    Io(#[from] std::io::Error),
}

/// Result alias for outline operations.
pub type FolioResult<T> = Result<T, FolioError>;

impl FolioError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        FolioError::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(what: &'static str, id: impl ToString) -> Self {
        FolioError::NotFound {
            what,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FolioError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            FolioError::NotFound { .. } => ErrorKind::NotFound,
            FolioError::PermissionDenied => ErrorKind::PermissionDenied,
            FolioError::Conflict(_) => ErrorKind::Conflict,
            FolioError::Internal(_) | FolioError::Io(_) => ErrorKind::Internal,
        }
    }
}

impl From<rusqlite::Error> for FolioError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => FolioError::Conflict(e),
            _ => FolioError::Internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_maps_to_conflict() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert_eq!(FolioError::from(busy).kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_other_store_errors_are_internal() {
        let err = FolioError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.to_string(), "internal storage error");
    }

    #[test]
    fn test_validation_errors_name_the_field() {
        let err = FolioError::invalid("style_type", "unknown value 'checkbox'");
        assert_eq!(err.to_string(), "invalid style_type: unknown value 'checkbox'");
        let err = FolioError::not_found("parent block", "abc");
        assert_eq!(err.to_string(), "parent block not found: abc");
    }
}
