//! Error taxonomy
//!
//! A single `thiserror`-derived enum, one variant per kind in the error
//! handling design: `Validation`, `Conflict`, `NotFound`, `Referential`,
//! `StoreUnavailable`, `Rendering`, `BackupFailed`, `FilesystemFailed`,
//! `ResolverUnavailable`, `ResolverRejectedConfig`, `Timeout`,
//! `RollbackSucceeded`, `Fatal`, `RateLimited`, `PermissionDenied`.
//!
//! The HTTP surface is a Non-goal, so this type stays plain
//! `std::error::Error` — no `IntoResponse` impl, ungated on any web
//! framework.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// A single field-level validation failure, surfaced to callers instead of
/// logged — validation failures are expected input, not service faults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
    pub suggestion: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.reason, self.suggestion)
    }
}

/// The failed phase of a projection transaction, carried by `Error::Fatal`
/// and logged alongside the backup id needed for manual recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionPhase {
    Validating,
    Backup,
    Writing,
    Reloading,
    Verifying,
    RollingBack,
}

impl std::fmt::Display for ProjectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validating => "validating",
            Self::Backup => "backup",
            Self::Writing => "writing",
            Self::Reloading => "reloading",
            Self::Verifying => "verifying",
            Self::RollingBack => "rolling_back",
        };
        write!(f, "{s}")
    }
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/parsing failed.
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// One or more fields failed validation (§C2). Never logged at warn level.
    #[error("validation failed: {0:?}")]
    Validation(Vec<FieldError>),

    /// A uniqueness constraint was violated (e.g. duplicate `(rpz_zone, domain)`).
    #[error("conflict on {field}: {message}")]
    Conflict { field: String, message: String },

    /// The requested entity does not exist.
    #[error("not found: {entity_type} {entity_id}")]
    NotFound { entity_type: String, entity_id: String },

    /// A referential invariant was violated (e.g. deleting a zone with records).
    #[error("referential error: {parent} referenced by {child}")]
    Referential { parent: String, child: String },

    /// The model store is unreachable or its connection pool is exhausted.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Rendering the model to resolver file bytes failed.
    #[error("rendering failed: {0}")]
    Rendering(String),

    /// Creating or verifying a backup failed.
    #[error("backup failed: {0}")]
    BackupFailed(String),

    /// A filesystem operation (write, rename, fsync) failed.
    #[error("filesystem operation failed: {0}")]
    FilesystemFailed(#[from] std::io::Error),

    /// The resolver's control channel is unreachable.
    #[error("resolver unavailable: {0}")]
    ResolverUnavailable(String),

    /// The resolver's config-check command rejected the rendered configuration.
    #[error("resolver rejected config: {0}")]
    ResolverRejectedConfig(String),

    /// An external call (probe, resolver control, feed fetch, store query) timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A projection transaction failed but rollback succeeded; model and
    /// files are unchanged.
    #[error("transaction {transaction_id} failed at {phase}, rollback succeeded")]
    RollbackSucceeded {
        transaction_id: String,
        phase: ProjectionPhase,
    },

    /// Rollback itself failed. Escalates as a critical event; manual
    /// recovery is required using `backup_id`.
    #[error("fatal: transaction {transaction_id} rollback failed, backup {backup_id} needed for recovery")]
    Fatal {
        transaction_id: String,
        backup_id: String,
    },

    /// A client exceeded its configured rate limit.
    #[error("rate limited")]
    RateLimited,

    /// The caller lacks permission for the requested operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl Error {
    /// Whether retrying the same operation might succeed without any change
    /// in caller behaviour.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::Timeout(_) | Error::ResolverUnavailable(_)
        )
    }

    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Error::NotFound {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    pub fn conflict(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Conflict {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn validation(errors: Vec<FieldError>) -> Self {
        Error::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("zone", "internal.local");
        assert_eq!(err.to_string(), "not found: zone internal.local");
    }

    #[test]
    fn test_retriable_kinds() {
        assert!(Error::StoreUnavailable("down".into()).is_retriable());
        assert!(Error::Timeout("probe".into()).is_retriable());
        assert!(!Error::Conflict {
            field: "name".into(),
            message: "dup".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_field_error_display() {
        let fe = FieldError::new("name", "CNAME at zone apex", "use A/AAAA at @");
        assert_eq!(fe.to_string(), "name: CNAME at zone apex (use A/AAAA at @)");
    }
}
