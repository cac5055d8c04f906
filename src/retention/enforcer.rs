//! Bringing a schedule back under its retention limit.

use crate::config::RetentionConfig;
use crate::models::{BackupCounts, BackupRecord, ClassifiedSet};
use crate::retention::classifier::classify;
use crate::retention::deletion::{DeletionOutcome, DeletionProtocol};
use crate::store::RecordLister;
use crate::Error;
use chrono::Utc;
use tracing::info;

/// State of a schedule after enforcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementResult {
    /// In-use backups, oldest first.
    pub classified: ClassifiedSet,
    /// Tally of backups that are not in use.
    pub counts: BackupCounts,
    /// Deletions performed, in order.
    pub deleted: Vec<DeletionOutcome>,
}

/// Enforcement that stopped early.
///
/// Deletions that finished before the failure are real removals from the
/// cluster, so they travel with the error.
#[derive(Debug)]
pub struct EnforcementError {
    /// What stopped enforcement.
    pub error: Error,
    /// Deletions completed before the failure, in order.
    pub deleted: Vec<DeletionOutcome>,
}

impl EnforcementError {
    /// Names of the backups deleted before the failure.
    #[must_use]
    pub fn deleted_names(&self) -> Vec<String> {
        self.deleted.iter().map(|d| d.backup.clone()).collect()
    }
}

impl From<Error> for EnforcementError {
    fn from(error: Error) -> Self {
        Self {
            error,
            deleted: Vec::new(),
        }
    }
}

/// Backups that exceed the limit: the oldest `len - max_backups`.
///
/// Returns an empty slice when the schedule is within its limit.
#[must_use]
pub fn deletion_candidates<'s>(
    classified: &'s ClassifiedSet,
    config: &RetentionConfig,
) -> &'s [BackupRecord] {
    let keep = usize::try_from(config.max_backups).unwrap_or(usize::MAX);
    let excess = classified.len().saturating_sub(keep);
    &classified.as_slice()[..excess]
}

/// Deletes the oldest in-use backups until at most `max_backups` remain.
///
/// Deletions run one at a time, oldest first, each waiting for its request
/// to finish before the next starts. When anything was deleted the schedule
/// is listed and classified again, since the in-memory set does not reflect
/// the removals. Within the limit, the inputs are returned unchanged.
///
/// # Errors
///
/// Stops at the first failed deletion and returns its error along with the
/// deletions already completed. Returns [`Error::List`] the same way if the
/// re-listing fails.
pub fn enforce(
    mut classified: ClassifiedSet,
    counts: BackupCounts,
    config: &RetentionConfig,
    protocol: &DeletionProtocol<'_>,
    lister: &dyn RecordLister,
) -> std::result::Result<EnforcementResult, EnforcementError> {
    classified.sort();
    let candidates = deletion_candidates(&classified, config);
    if candidates.is_empty() {
        return Ok(EnforcementResult {
            classified,
            counts,
            deleted: Vec::new(),
        });
    }

    info!(
        schedule = %config.name,
        excess = candidates.len(),
        in_use = classified.len(),
        max_backups = config.max_backups,
        "schedule over retention limit"
    );

    let mut deleted = Vec::with_capacity(candidates.len());
    for backup in candidates {
        match protocol.delete(backup, config) {
            Ok(outcome) => deleted.push(outcome),
            Err(error) => return Err(EnforcementError { error, deleted }),
        }
    }

    let records = match lister.list(&config.namespace) {
        Ok(records) => records,
        Err(e) => {
            return Err(EnforcementError {
                error: Error::List {
                    schedule: config.name.clone(),
                    cause: e.to_string(),
                },
                deleted,
            });
        },
    };
    let (classified, counts) = classify(&records, config, Utc::now());

    Ok(EnforcementResult {
        classified,
        counts,
        deleted,
    })
}
