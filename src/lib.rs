//! # Taweret
//!
//! Retention enforcement for Kanister backups.
//!
//! Backups are recorded in the cluster as `ActionSet` custom resources. For
//! each configured backup schedule, taweret works out which backups still
//! count against the schedule's retention limit, deletes the oldest ones that
//! exceed it, and publishes gauges describing backup health.
//!
//! ## Layout
//!
//! - [`models`]: backup records, status buckets and the `ActionSet` wire shapes
//! - [`config`]: process configuration and per-schedule retention policies
//! - [`retention`]: classification, enforcement, the deletion protocol and metrics reporting
//! - [`store`]: collaborator traits plus the cluster and in-memory resource stores
//! - [`observability`]: logging and Prometheus exporter setup
//!
//! ## Example
//!
//! ```rust,ignore
//! use taweret::retention::{Evaluator, PollConfig};
//! use taweret::store::memory::InMemoryStore;
//! use taweret::observability::RecordingSink;
//!
//! let store = InMemoryStore::new();
//! let sink = RecordingSink::new();
//! let evaluator = Evaluator::new(&store, &store, &sink, PollConfig::default());
//! let report = evaluator.run_cycle(&store)?;
//! println!("{}", report.summary());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod retention;
pub mod store;

pub use config::{MaxAge, RetentionConfig, TaweretConfig};
pub use models::{BackupCounts, BackupRecord, BackupStatus, ClassifiedSet};
pub use retention::{CycleReport, Evaluator, PollConfig, ScheduleOutcome};
pub use store::{ConfigProvider, DeletionClient, MetricsSink, RecordLister};

/// Error type for taweret operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Scope |
/// |---------|-------------|-------|
/// | `InvalidInput` | Bad CLI or process config values | process |
/// | `OperationFailed` | Transport or I/O failure talking to a collaborator | caller decides |
/// | `NotFound` | The resource store has no object with that name | caller decides |
/// | `Decode` | A resource is missing a required field or has the wrong shape | schedule |
/// | `ConfigParse` | A retention document cannot be decoded | process |
/// | `List` | Backups for a schedule cannot be enumerated | schedule |
/// | `DeletionRequest` | A deletion request cannot be submitted or observed | schedule |
/// | `DeletionTimeout` | A deletion request did not finish within the poll budget | schedule |
/// | `FinalizeDelete` | The original backup resource cannot be removed | schedule |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation against a collaborator failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The named resource does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Resource kind, e.g. `actionset`.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// A resource failed typed decoding at the ingestion boundary.
    #[error("cannot decode field '{field}': {cause}")]
    Decode {
        /// Dotted path of the offending field.
        field: String,
        /// What was wrong with it.
        cause: String,
    },

    /// A retention configuration document could not be parsed.
    #[error("invalid retention config in {source_name}: {cause}")]
    ConfigParse {
        /// Where the document came from (configmap or file name).
        source_name: String,
        /// The underlying cause.
        cause: String,
    },

    /// Backups for a schedule could not be listed.
    #[error("cannot list backups for schedule '{schedule}': {cause}")]
    List {
        /// Schedule being evaluated.
        schedule: String,
        /// The underlying cause.
        cause: String,
    },

    /// A deletion request could not be submitted or its status fetched.
    #[error("deletion request for backup '{backup}' failed: {cause}")]
    DeletionRequest {
        /// Backup being deleted.
        backup: String,
        /// The underlying cause.
        cause: String,
    },

    /// A deletion request did not reach a terminal state in time.
    #[error("deletion request '{request}' still running after {waited_ms}ms")]
    DeletionTimeout {
        /// Name of the deletion request.
        request: String,
        /// Total time spent waiting.
        waited_ms: u64,
    },

    /// The original backup resource could not be removed.
    #[error("cannot remove backup resource '{backup}': {cause}")]
    FinalizeDelete {
        /// Backup whose resource could not be removed.
        backup: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns `true` for [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short stable label used for metrics and structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::OperationFailed { .. } => "operation_failed",
            Self::NotFound { .. } => "not_found",
            Self::Decode { .. } => "decode",
            Self::ConfigParse { .. } => "config_parse",
            Self::List { .. } => "list",
            Self::DeletionRequest { .. } => "deletion_request",
            Self::DeletionTimeout { .. } => "deletion_timeout",
            Self::FinalizeDelete { .. } => "finalize_delete",
        }
    }
}

/// Result type alias for taweret operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("bad port".to_string());
        assert_eq!(err.to_string(), "invalid input: bad port");

        let err = Error::DeletionTimeout {
            request: "delete-backup-1".to_string(),
            waited_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "deletion request 'delete-backup-1' still running after 1500ms"
        );

        let err = Error::Decode {
            field: "metadata.name".to_string(),
            cause: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "cannot decode field 'metadata.name': missing");
    }

    #[test]
    fn test_error_kind_and_not_found() {
        let err = Error::NotFound {
            kind: "actionset".to_string(),
            name: "delete-x".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.kind(), "not_found");

        let err = Error::FinalizeDelete {
            backup: "x".to_string(),
            cause: "503".to_string(),
        };
        assert!(!err.is_not_found());
        assert_eq!(err.kind(), "finalize_delete");
    }
}
