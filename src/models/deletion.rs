//! Deletion requests and their observed state.

use crate::config::RetentionConfig;
use crate::models::BackupRecord;
use std::fmt;

/// Prefix used when naming deletion requests.
pub const DEFAULT_DELETION_PREFIX: &str = "delete-";

/// A request to the action executor to delete one backup's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRequest {
    /// Deterministic request name, derived from the backup name.
    pub name: String,
    /// Namespace the request is created in (and the object it targets).
    pub namespace: String,
    /// Backup being deleted.
    pub backup_name: String,
    /// Blueprint that implements the delete action.
    pub blueprint: String,
    /// Artifact location, forwarded only when the backup reported one.
    pub storage_location_key: Option<String>,
    /// Location profile, forwarded only when configured.
    pub profile: Option<String>,
}

impl DeletionRequest {
    /// Builds the request for `backup` under the schedule's policy.
    #[must_use]
    pub fn for_backup(backup: &BackupRecord, config: &RetentionConfig, prefix: &str) -> Self {
        Self {
            name: request_name(prefix, &backup.name),
            namespace: config.namespace.clone(),
            backup_name: backup.name.clone(),
            blueprint: config.blueprint_ref.clone(),
            storage_location_key: backup.storage_location_key.clone(),
            profile: Some(config.profile_ref.clone()).filter(|p| !p.is_empty()),
        }
    }
}

/// Name of the deletion request for a backup.
#[must_use]
pub fn request_name(prefix: &str, backup_name: &str) -> String {
    format!("{prefix}{backup_name}")
}

/// Observed state of a deletion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionState {
    /// Not yet picked up.
    Pending,
    /// In progress.
    Running,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed {
        /// Error message reported by the executor, if any.
        message: Option<String>,
    },
    /// Any other executor state; treated as still in flight.
    Other(String),
}

impl DeletionState {
    /// Builds a state from the executor's state string and error message.
    #[must_use]
    pub fn from_parts(state: &str, message: Option<String>) -> Self {
        match state {
            "pending" | "" => Self::Pending,
            "running" => Self::Running,
            "complete" => Self::Complete,
            "failed" => Self::Failed { message },
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether polling can stop.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }
}

impl fmt::Display for DeletionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Complete => f.write_str("complete"),
            Self::Failed { .. } => f.write_str("failed"),
            Self::Other(s) => f.write_str(s),
        }
    }
}
