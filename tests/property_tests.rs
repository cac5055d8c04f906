//! Property-based tests for classification and enforcement.
//!
//! Uses proptest to verify invariants across random backup sets:
//! - Classification is idempotent
//! - Pending backups never count as in use
//! - Deletion candidates are exactly the oldest excess backups
//! - A successful cycle leaves at most `max_backups` in use

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::time::Duration as StdDuration;
use taweret::models::{BackupRecord, BackupStatus};
use taweret::observability::RecordingSink;
use taweret::retention::{Evaluator, PollConfig, classify, deletion_candidates};
use taweret::store::RecordLister;
use taweret::store::memory::InMemoryStore;
use taweret::{MaxAge, RetentionConfig};

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

fn status_strategy() -> impl Strategy<Value = BackupStatus> {
    prop::sample::select(vec![
        BackupStatus::Pending,
        BackupStatus::Running,
        BackupStatus::Complete,
        BackupStatus::Failed,
        BackupStatus::AttemptFailed,
        BackupStatus::Skipped,
        BackupStatus::Deleting,
        BackupStatus::Other("unknown".to_string()),
    ])
}

/// Backups spread over the last 14 days, with hour granularity so ties occur.
fn backups_strategy(max: usize) -> impl Strategy<Value = Vec<BackupRecord>> {
    prop::collection::vec((0i64..14 * 24, status_strategy()), 0..max).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (hours_ago, status))| {
                BackupRecord::new(
                    format!("backup-{i}"),
                    "daily",
                    status,
                    fixed_now() - Duration::hours(hours_ago),
                )
            })
            .collect()
    })
}

fn policy(max_backups: u32) -> RetentionConfig {
    RetentionConfig::new("daily", "kanister")
        .with_blueprint("bp")
        .with_max_backups(max_backups)
        .with_max_age(MaxAge::days(7))
}

proptest! {
    /// Property: classifying the same input twice gives identical results.
    #[test]
    fn prop_classification_is_idempotent(backups in backups_strategy(40)) {
        let first = classify(&backups, &policy(3), fixed_now());
        let second = classify(&backups, &policy(3), fixed_now());
        prop_assert_eq!(first, second);
    }

    /// Property: pending backups are never in use, regardless of age.
    #[test]
    fn prop_pending_never_in_use(backups in backups_strategy(40)) {
        let (classified, _) = classify(&backups, &policy(3), fixed_now());
        prop_assert!(classified.iter().all(|b| b.status != BackupStatus::Pending));
    }

    /// Property: every backup is either in use, tallied, or has no bucket.
    #[test]
    fn prop_every_backup_accounted_for(backups in backups_strategy(40)) {
        let config = policy(3);
        let cutoff = config.cutoff(fixed_now());
        let (classified, counts) = classify(&backups, &config, fixed_now());

        let dropped = backups
            .iter()
            .filter(|b| !(b.created_at > cutoff && b.status.is_finished()))
            .filter(|b| b.status.bucket().is_none())
            .count();

        prop_assert_eq!(classified.len() + counts.total() + dropped, backups.len());
    }

    /// Property: the classified set is sorted oldest first, ties in input order.
    #[test]
    fn prop_classified_sorted_stably(backups in backups_strategy(40)) {
        let (classified, _) = classify(&backups, &policy(3), fixed_now());
        let index = |name: &str| backups.iter().position(|b| b.name == name).unwrap();

        for pair in classified.as_slice().windows(2) {
            prop_assert!(pair[0].created_at <= pair[1].created_at);
            if pair[0].created_at == pair[1].created_at {
                prop_assert!(index(&pair[0].name) < index(&pair[1].name));
            }
        }
    }

    /// Property: candidates are exactly the `len - max` oldest in-use backups.
    #[test]
    fn prop_candidates_are_oldest_excess(backups in backups_strategy(40), max in 0u32..10) {
        let config = policy(max);
        let (classified, _) = classify(&backups, &config, fixed_now());
        let candidates = deletion_candidates(&classified, &config);

        let expected = classified.len().saturating_sub(max as usize);
        prop_assert_eq!(candidates.len(), expected);
        prop_assert_eq!(candidates, &classified.as_slice()[..expected]);

        if let Some(youngest_deleted) = candidates.last() {
            let kept = &classified.as_slice()[expected..];
            prop_assert!(kept.iter().all(|b| b.created_at >= youngest_deleted.created_at));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: after a successful cycle at most `max_backups` remain in use.
    #[test]
    fn prop_cycle_enforces_retention_bound(
        offsets in prop::collection::vec((0i64..10 * 24, status_strategy()), 0..12),
        max in 0u32..5,
    ) {
        let now = Utc::now();
        let store = InMemoryStore::new();
        for (i, (hours_ago, status)) in offsets.into_iter().enumerate() {
            store.insert_backup(
                "kanister",
                BackupRecord::new(format!("b{i}"), "daily", status, now - Duration::hours(hours_ago)),
            );
        }
        let config = policy(max);
        store.set_configs(vec![config.clone()]);
        let sink = RecordingSink::new();
        let poll = PollConfig {
            initial_delay: StdDuration::ZERO,
            max_delay: StdDuration::ZERO,
            multiplier: 1,
            max_wait: StdDuration::from_millis(10),
        };
        let evaluator = Evaluator::new(&store, &store, &sink, poll);

        let report = evaluator.run_cycle(&store).unwrap();
        prop_assert!(report.is_success());

        let remaining = store.list("kanister").unwrap();
        let (classified, _) = classify(&remaining, &config, Utc::now());
        prop_assert!(classified.len() <= max as usize);
        prop_assert!(report.outcomes[0].in_use <= max as usize);
    }
}
