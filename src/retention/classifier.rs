//! Splits a schedule's backups into in-use records and status tallies.

use crate::config::RetentionConfig;
use crate::models::{BackupCounts, BackupRecord, ClassifiedSet};
use chrono::{DateTime, Utc};

/// Classifies `records` against `config` as of `now`.
///
/// Records belonging to other schedules are ignored, so the input may be
/// either a whole namespace listing or a pre-filtered set. A record is in
/// use when it was created strictly after the cutoff and has finished
/// (`complete` or `failed`). Every other record is tallied by status bucket;
/// statuses without a bucket are dropped.
///
/// The returned set is sorted oldest first. Backups created at the same
/// instant keep their input order.
#[must_use]
pub fn classify(
    records: &[BackupRecord],
    config: &RetentionConfig,
    now: DateTime<Utc>,
) -> (ClassifiedSet, BackupCounts) {
    let cutoff = config.cutoff(now);
    let mut in_use = Vec::new();
    let mut counts = BackupCounts::default();

    for record in records.iter().filter(|r| r.schedule_name == config.name) {
        if record.created_at > cutoff && record.status.is_finished() {
            let mut record = record.clone();
            record.in_use = true;
            in_use.push(record);
        } else {
            counts.record(&record.status);
        }
    }

    (ClassifiedSet::from_unsorted(in_use), counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaxAge;
    use crate::models::BackupStatus;
    use chrono::{Duration, TimeZone};
    use test_case::test_case;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn daily() -> RetentionConfig {
        RetentionConfig::new("daily", "kanister")
            .with_max_backups(2)
            .with_max_age(MaxAge::days(7))
    }

    fn backup(name: &str, days_ago: i64, status: BackupStatus) -> BackupRecord {
        BackupRecord::new(name, "daily", status, now() - Duration::days(days_ago))
    }

    #[test]
    fn test_example_scenario() {
        let records = vec![
            backup("a", 10, BackupStatus::Complete),
            backup("b", 3, BackupStatus::Complete),
            backup("c", 2, BackupStatus::Complete),
            backup("d", 1, BackupStatus::Pending),
        ];

        let (classified, counts) = classify(&records, &daily(), now());

        assert_eq!(classified.names(), vec!["b", "c"]);
        assert!(classified.iter().all(|b| b.in_use));
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total(), 1);
    }

    #[test_case(BackupStatus::Complete, true ; "complete is in use")]
    #[test_case(BackupStatus::Failed, true ; "failed is in use")]
    #[test_case(BackupStatus::Pending, false ; "pending is not")]
    #[test_case(BackupStatus::Running, false ; "running is not")]
    #[test_case(BackupStatus::AttemptFailed, false ; "attempt failed is not")]
    #[test_case(BackupStatus::Skipped, false ; "skipped is not")]
    #[test_case(BackupStatus::Deleting, false ; "deleting is not")]
    fn test_recent_backup_in_use_by_status(status: BackupStatus, expected: bool) {
        let (classified, _) = classify(&[backup("x", 1, status)], &daily(), now());
        assert_eq!(classified.len() == 1, expected);
    }

    #[test]
    fn test_old_complete_backup_is_neither_in_use_nor_counted() {
        let (classified, counts) =
            classify(&[backup("old", 30, BackupStatus::Complete)], &daily(), now());

        assert!(classified.is_empty());
        assert_eq!(counts, BackupCounts::default());
    }

    #[test]
    fn test_old_pending_backup_is_counted() {
        let (classified, counts) =
            classify(&[backup("old", 30, BackupStatus::Pending)], &daily(), now());

        assert!(classified.is_empty());
        assert_eq!(counts.pending, 1);
    }

    #[test]
    fn test_attempt_failed_folds_into_failed() {
        let records = vec![
            backup("x", 1, BackupStatus::AttemptFailed),
            backup("y", 1, BackupStatus::Other("weird".to_string())),
            backup("z", 1, BackupStatus::Other(String::new())),
        ];

        let (_, counts) = classify(&records, &daily(), now());

        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 1);
    }

    #[test]
    fn test_cutoff_is_exclusive() {
        let exactly = BackupRecord::new(
            "edge",
            "daily",
            BackupStatus::Complete,
            now() - Duration::days(7),
        );

        let (classified, _) = classify(&[exactly], &daily(), now());
        assert!(classified.is_empty());
    }

    #[test]
    fn test_other_schedules_are_ignored() {
        let records = vec![
            backup("mine", 1, BackupStatus::Complete),
            BackupRecord::new("theirs", "weekly", BackupStatus::Pending, now()),
        ];

        let (classified, counts) = classify(&records, &daily(), now());

        assert_eq!(classified.names(), vec!["mine"]);
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn test_output_sorted_with_stable_ties() {
        let same = now() - Duration::hours(1);
        let records = vec![
            BackupRecord::new("late", "daily", BackupStatus::Complete, now()),
            BackupRecord::new("tie-1", "daily", BackupStatus::Complete, same),
            BackupRecord::new("tie-2", "daily", BackupStatus::Failed, same),
        ];

        let (classified, _) = classify(&records, &daily(), now());

        assert_eq!(classified.names(), vec!["tie-1", "tie-2", "late"]);
    }

    #[test]
    fn test_zero_window_keeps_nothing_in_use() {
        let config = RetentionConfig::new("daily", "kanister").with_max_backups(3);

        let (classified, _) = classify(&[backup("x", 0, BackupStatus::Complete)], &config, now());

        assert!(classified.is_empty());
    }
}
