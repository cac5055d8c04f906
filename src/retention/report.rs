//! Backup health gauges.
//!
//! [`report`] is a pure function over one schedule's classification. The
//! resulting [`GaugeSet`] is handed to a [`MetricsSink`], which overwrites the
//! previous values for that schedule.

use crate::models::{BackupCounts, ClassifiedSet, StatusBucket};
use crate::store::MetricsSink;

/// Backups per status.
pub const BACKUP_COUNT: &str = "backup_count";
/// Creation time of the oldest in-use backup (Unix seconds, 0 if none).
pub const OLDEST_BACKUP_TIMESTAMP: &str = "oldest_backup_timestamp";
/// Creation time of the newest in-use backup (Unix seconds, 0 if none).
pub const NEWEST_BACKUP_TIMESTAMP: &str = "newest_backup_timestamp";

/// Label carrying the schedule name.
pub const SCHEDULE_LABEL: &str = "backup_config_name";
/// Label carrying the status bucket.
pub const STATUS_LABEL: &str = "backup_status";
/// Status label value for in-use backups.
pub const COMPLETED_STATUS: &str = "completed";

/// One gauge update.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeValue {
    /// Metric name.
    pub name: &'static str,
    /// Label pairs.
    pub labels: Vec<(&'static str, String)>,
    /// Value to set.
    pub value: f64,
}

/// All gauge updates for one schedule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaugeSet {
    gauges: Vec<GaugeValue>,
}

impl GaugeSet {
    /// Gauge updates in emission order.
    #[must_use]
    pub fn as_slice(&self) -> &[GaugeValue] {
        &self.gauges
    }

    /// Looks up a gauge by name and the value of its status label, if any.
    #[must_use]
    pub fn value(&self, name: &str, status: Option<&str>) -> Option<f64> {
        self.gauges
            .iter()
            .find(|gauge| {
                gauge.name == name
                    && status.is_none_or(|s| {
                        gauge
                            .labels
                            .iter()
                            .any(|(key, value)| *key == STATUS_LABEL && value == s)
                    })
            })
            .map(|gauge| gauge.value)
    }

    /// Writes every gauge to the sink.
    pub fn publish(&self, sink: &dyn MetricsSink) {
        for gauge in &self.gauges {
            sink.set_gauge(gauge);
        }
    }

    fn push(&mut self, name: &'static str, labels: Vec<(&'static str, String)>, value: f64) {
        self.gauges.push(GaugeValue {
            name,
            labels,
            value,
        });
    }
}

/// Converts a count to a gauge value, capping at `u32::MAX`.
#[inline]
fn count_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Converts Unix seconds to a gauge value.
#[allow(clippy::cast_precision_loss)]
#[inline]
fn timestamp_to_f64(secs: i64) -> f64 {
    secs as f64
}

/// Derives the gauges for one schedule.
#[must_use]
pub fn report(classified: &ClassifiedSet, counts: &BackupCounts, schedule: &str) -> GaugeSet {
    let mut set = GaugeSet::default();
    let schedule_label = || vec![(SCHEDULE_LABEL, schedule.to_string())];

    let oldest = classified.oldest().map_or(0, |b| b.created_at.timestamp());
    let newest = classified.newest().map_or(0, |b| b.created_at.timestamp());
    set.push(OLDEST_BACKUP_TIMESTAMP, schedule_label(), timestamp_to_f64(oldest));
    set.push(NEWEST_BACKUP_TIMESTAMP, schedule_label(), timestamp_to_f64(newest));

    let status_labels = |status: &str| {
        vec![
            (SCHEDULE_LABEL, schedule.to_string()),
            (STATUS_LABEL, status.to_string()),
        ]
    };
    set.push(
        BACKUP_COUNT,
        status_labels(COMPLETED_STATUS),
        count_to_f64(classified.len()),
    );
    for bucket in StatusBucket::ALL {
        set.push(
            BACKUP_COUNT,
            status_labels(bucket.as_str()),
            count_to_f64(counts.get(bucket)),
        );
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackupRecord, BackupStatus};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_empty_set_reports_zero_timestamps() {
        let gauges = report(&ClassifiedSet::default(), &BackupCounts::default(), "daily");

        assert_eq!(gauges.value(OLDEST_BACKUP_TIMESTAMP, None), Some(0.0));
        assert_eq!(gauges.value(NEWEST_BACKUP_TIMESTAMP, None), Some(0.0));
        assert_eq!(gauges.value(BACKUP_COUNT, Some(COMPLETED_STATUS)), Some(0.0));
        assert_eq!(gauges.as_slice().len(), 8);
    }

    #[test]
    fn test_values_follow_classification() {
        let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        let classified = ClassifiedSet::from_unsorted(vec![
            BackupRecord::new("b", "daily", BackupStatus::Complete, at(2_000)),
            BackupRecord::new("a", "daily", BackupStatus::Failed, at(1_000)),
        ]);
        let counts = BackupCounts {
            pending: 1,
            running: 2,
            failed: 3,
            skipped: 4,
            deleting: 5,
        };

        let gauges = report(&classified, &counts, "daily");

        assert_eq!(gauges.value(OLDEST_BACKUP_TIMESTAMP, None), Some(1_000.0));
        assert_eq!(gauges.value(NEWEST_BACKUP_TIMESTAMP, None), Some(2_000.0));
        assert_eq!(gauges.value(BACKUP_COUNT, Some("completed")), Some(2.0));
        assert_eq!(gauges.value(BACKUP_COUNT, Some("pending")), Some(1.0));
        assert_eq!(gauges.value(BACKUP_COUNT, Some("running")), Some(2.0));
        assert_eq!(gauges.value(BACKUP_COUNT, Some("failed")), Some(3.0));
        assert_eq!(gauges.value(BACKUP_COUNT, Some("skipped")), Some(4.0));
        assert_eq!(gauges.value(BACKUP_COUNT, Some("deleting")), Some(5.0));
        assert!(gauges.as_slice().iter().all(|g| g
            .labels
            .contains(&(SCHEDULE_LABEL, "daily".to_string()))));
    }
}
