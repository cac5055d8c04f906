//! Backup records and per-status tallies.

use chrono::{DateTime, Utc};
use std::fmt;

/// Status of a backup as reported by the action executor.
///
/// Parsing is an exact, case-sensitive match against the executor's state
/// string. Anything else is kept verbatim in [`BackupStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackupStatus {
    /// Queued, not yet started.
    Pending,
    /// Currently running.
    Running,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
    /// A single attempt failed; the executor may retry.
    AttemptFailed,
    /// Skipped by the executor.
    Skipped,
    /// Being deleted.
    Deleting,
    /// Unrecognized state string.
    Other(String),
}

impl BackupStatus {
    /// Parses an executor state string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "complete" => Self::Complete,
            "failed" => Self::Failed,
            "attemptFailed" => Self::AttemptFailed,
            "skipped" => Self::Skipped,
            "deleting" => Self::Deleting,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the executor state string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::AttemptFailed => "attemptFailed",
            Self::Skipped => "skipped",
            Self::Deleting => "deleting",
            Self::Other(s) => s,
        }
    }

    /// Whether the backup has finished, successfully or not.
    ///
    /// Only finished backups can count against a retention limit.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// The tally bucket for a backup that is not in use.
    ///
    /// `attemptFailed` folds into `failed`. `complete` and unrecognized
    /// states have no bucket.
    #[must_use]
    pub const fn bucket(&self) -> Option<StatusBucket> {
        match self {
            Self::Pending => Some(StatusBucket::Pending),
            Self::Running => Some(StatusBucket::Running),
            Self::Failed | Self::AttemptFailed => Some(StatusBucket::Failed),
            Self::Skipped => Some(StatusBucket::Skipped),
            Self::Deleting => Some(StatusBucket::Deleting),
            Self::Complete | Self::Other(_) => None,
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Buckets for backups that do not count against the retention limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusBucket {
    /// Pending backups.
    Pending,
    /// Running backups.
    Running,
    /// Failed or attempt-failed backups.
    Failed,
    /// Skipped backups.
    Skipped,
    /// Backups being deleted.
    Deleting,
}

impl StatusBucket {
    /// All buckets, in reporting order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Running,
        Self::Failed,
        Self::Skipped,
        Self::Deleting,
    ];

    /// Metric label for this bucket.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Deleting => "deleting",
        }
    }
}

/// One observed backup attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// Resource name, unique within the namespace.
    pub name: String,
    /// Schedule the backup belongs to.
    pub schedule_name: String,
    /// Executor status.
    pub status: BackupStatus,
    /// Creation time. Unknown timestamps are the Unix epoch.
    pub created_at: DateTime<Utc>,
    /// Artifact location handed to the delete action, if the backup produced one.
    pub storage_location_key: Option<String>,
    /// Set by classification when the backup counts against the limit.
    pub in_use: bool,
}

impl BackupRecord {
    /// Creates a record with no storage location.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        schedule_name: impl Into<String>,
        status: BackupStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule_name: schedule_name.into(),
            status,
            created_at,
            storage_location_key: None,
            in_use: false,
        }
    }

    /// Sets the storage location. Empty strings mean "no artifact".
    #[must_use]
    pub fn with_storage_location(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.storage_location_key = if key.is_empty() { None } else { Some(key) };
        self
    }
}

/// Tally of backups that are not in use, by status bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupCounts {
    /// Pending backups.
    pub pending: usize,
    /// Running backups.
    pub running: usize,
    /// Failed and attempt-failed backups.
    pub failed: usize,
    /// Skipped backups.
    pub skipped: usize,
    /// Backups being deleted.
    pub deleting: usize,
}

impl BackupCounts {
    /// Counts one backup. Statuses without a bucket are ignored.
    pub fn record(&mut self, status: &BackupStatus) {
        let Some(bucket) = status.bucket() else {
            return;
        };
        match bucket {
            StatusBucket::Pending => self.pending += 1,
            StatusBucket::Running => self.running += 1,
            StatusBucket::Failed => self.failed += 1,
            StatusBucket::Skipped => self.skipped += 1,
            StatusBucket::Deleting => self.deleting += 1,
        }
    }

    /// Returns the count for a bucket.
    #[must_use]
    pub const fn get(&self, bucket: StatusBucket) -> usize {
        match bucket {
            StatusBucket::Pending => self.pending,
            StatusBucket::Running => self.running,
            StatusBucket::Failed => self.failed,
            StatusBucket::Skipped => self.skipped,
            StatusBucket::Deleting => self.deleting,
        }
    }

    /// Total across all buckets.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.running + self.failed + self.skipped + self.deleting
    }
}

/// In-use backups for one schedule, oldest first.
///
/// Sorting is stable: backups with equal `created_at` keep their input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedSet {
    backups: Vec<BackupRecord>,
}

impl ClassifiedSet {
    /// Builds a set from backups in any order.
    #[must_use]
    pub fn from_unsorted(mut backups: Vec<BackupRecord>) -> Self {
        backups.sort_by_key(|backup| backup.created_at);
        Self { backups }
    }

    /// Number of in-use backups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backups.len()
    }

    /// Returns `true` if there are no in-use backups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }

    /// The oldest in-use backup.
    #[must_use]
    pub fn oldest(&self) -> Option<&BackupRecord> {
        self.backups.first()
    }

    /// The newest in-use backup.
    #[must_use]
    pub fn newest(&self) -> Option<&BackupRecord> {
        self.backups.last()
    }

    /// Backups, oldest first.
    #[must_use]
    pub fn as_slice(&self) -> &[BackupRecord] {
        &self.backups
    }

    /// Iterates backups, oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, BackupRecord> {
        self.backups.iter()
    }

    /// Backup names, oldest first.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.backups.iter().map(|b| b.name.as_str()).collect()
    }

    /// Re-sorts in place, oldest first.
    pub fn sort(&mut self) {
        self.backups.sort_by_key(|backup| backup.created_at);
    }
}

impl<'a> IntoIterator for &'a ClassifiedSet {
    type Item = &'a BackupRecord;
    type IntoIter = std::slice::Iter<'a, BackupRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.backups.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    #[test_case("pending", Some(StatusBucket::Pending); "pending")]
    #[test_case("running", Some(StatusBucket::Running); "running")]
    #[test_case("failed", Some(StatusBucket::Failed); "failed")]
    #[test_case("attemptFailed", Some(StatusBucket::Failed); "attempt failed folds into failed")]
    #[test_case("skipped", Some(StatusBucket::Skipped); "skipped")]
    #[test_case("deleting", Some(StatusBucket::Deleting); "deleting")]
    #[test_case("complete", None; "complete has no bucket")]
    #[test_case("Pending", None; "match is case sensitive")]
    #[test_case("", None; "empty state")]
    fn test_status_bucket(raw: &str, expected: Option<StatusBucket>) {
        assert_eq!(BackupStatus::parse(raw).bucket(), expected);
    }

    #[test]
    fn test_status_roundtrip_keeps_unknown_text() {
        let status = BackupStatus::parse("cancelled");
        assert_eq!(status, BackupStatus::Other("cancelled".to_string()));
        assert_eq!(status.as_str(), "cancelled");
        assert!(!status.is_finished());
        assert!(BackupStatus::Complete.is_finished());
        assert!(BackupStatus::Failed.is_finished());
        assert!(!BackupStatus::AttemptFailed.is_finished());
    }

    #[test]
    fn test_counts_record() {
        let mut counts = BackupCounts::default();
        for raw in ["pending", "pending", "attemptFailed", "failed", "complete", "bogus"] {
            counts.record(&BackupStatus::parse(raw));
        }
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.get(StatusBucket::Running), 0);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_empty_storage_location_is_none() {
        let at = Utc.timestamp_opt(0, 0).single().unwrap_or_default();
        let record = BackupRecord::new("b", "daily", BackupStatus::Complete, at)
            .with_storage_location("");
        assert!(record.storage_location_key.is_none());

        let record = record.with_storage_location("s3://bucket/key");
        assert_eq!(record.storage_location_key.as_deref(), Some("s3://bucket/key"));
    }

    #[test]
    fn test_classified_set_sorts_stably() {
        let t = |secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_default();
        let set = ClassifiedSet::from_unsorted(vec![
            BackupRecord::new("c", "s", BackupStatus::Complete, t(30)),
            BackupRecord::new("a1", "s", BackupStatus::Complete, t(10)),
            BackupRecord::new("b", "s", BackupStatus::Failed, t(20)),
            BackupRecord::new("a2", "s", BackupStatus::Complete, t(10)),
        ]);

        assert_eq!(set.names(), vec!["a1", "a2", "b", "c"]);
        assert_eq!(set.oldest().map(|b| b.name.as_str()), Some("a1"));
        assert_eq!(set.newest().map(|b| b.name.as_str()), Some("c"));
    }
}
