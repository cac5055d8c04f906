//! Evaluation of every configured schedule.
//!
//! One cycle walks the schedules in order. Each schedule is listed,
//! classified, brought under its limit and reported. A schedule that fails
//! is logged and recorded in the [`CycleReport`], its gauges are left at their
//! previous values, and the cycle moves on to the next schedule.

use crate::config::RetentionConfig;
use crate::models::BackupCounts;
use crate::retention::classifier::classify;
use crate::retention::deletion::{DeletionProtocol, PollConfig};
use crate::retention::enforcer::{EnforcementError, enforce};
use crate::retention::report::report;
use crate::store::{ConfigProvider, DeletionClient, MetricsSink, RecordLister};
use crate::{Error, Result};
use chrono::Utc;
use std::fmt::Write as _;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// Result of evaluating one schedule.
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// Schedule name.
    pub schedule: String,
    /// Backups deleted during this evaluation, oldest first.
    pub deleted: Vec<String>,
    /// In-use backups after enforcement.
    pub in_use: usize,
    /// Tally of backups that are not in use.
    pub counts: BackupCounts,
    /// Why the evaluation stopped, if it did.
    pub error: Option<Error>,
}

impl ScheduleOutcome {
    fn failed(schedule: &str, error: Error, deleted: Vec<String>) -> Self {
        Self {
            schedule: schedule.to_string(),
            deleted,
            in_use: 0,
            counts: BackupCounts::default(),
            error: Some(error),
        }
    }

    /// Returns `true` if the schedule was evaluated without error.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcomes of one evaluation cycle, in schedule order.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Per-schedule outcomes.
    pub outcomes: Vec<ScheduleOutcome>,
}

impl CycleReport {
    /// Outcomes that ended in an error.
    pub fn failed(&self) -> impl Iterator<Item = &ScheduleOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Returns `true` if every schedule succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ScheduleOutcome::is_success)
    }

    /// Looks up a schedule's outcome.
    #[must_use]
    pub fn outcome(&self, schedule: &str) -> Option<&ScheduleOutcome> {
        self.outcomes.iter().find(|o| o.schedule == schedule)
    }

    /// Total backups deleted across all schedules.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.deleted.len()).sum()
    }

    /// One-line human summary followed by a line per failed schedule.
    #[must_use]
    pub fn summary(&self) -> String {
        let failed = self.failed().count();
        let mut out = format!(
            "evaluated {} schedule(s): {} ok, {} failed, {} backup(s) deleted",
            self.outcomes.len(),
            self.outcomes.len() - failed,
            failed,
            self.deleted_count()
        );
        for outcome in self.failed() {
            if let Some(err) = &outcome.error {
                let _ = write!(out, "\n  {}: {err}", outcome.schedule);
            }
        }
        out
    }
}

/// Runs retention evaluations against a set of collaborators.
pub struct Evaluator<'a> {
    lister: &'a dyn RecordLister,
    protocol: DeletionProtocol<'a>,
    sink: &'a dyn MetricsSink,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator.
    #[must_use]
    pub fn new(
        lister: &'a dyn RecordLister,
        client: &'a dyn DeletionClient,
        sink: &'a dyn MetricsSink,
        poll: PollConfig,
    ) -> Self {
        Self {
            lister,
            protocol: DeletionProtocol::new(client, poll),
            sink,
        }
    }

    /// Overrides the deletion request name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.protocol = self.protocol.with_prefix(prefix);
        self
    }

    /// Evaluates one schedule and publishes its gauges.
    ///
    /// A failure is recorded in the returned outcome's `error`: listing
    /// failed ([`Error::List`]) or a deletion stopped enforcement. Backups
    /// deleted before the failure are still reported in `deleted`. Gauges are
    /// only written on success.
    #[instrument(
        name = "taweret.retention.evaluate",
        skip(self, config),
        fields(schedule = %config.name, namespace = %config.namespace)
    )]
    pub fn evaluate(&self, config: &RetentionConfig) -> ScheduleOutcome {
        match self.try_evaluate(config) {
            Ok(outcome) => outcome,
            Err(halted) => {
                let deleted = halted.deleted_names();
                error!(
                    error = %halted.error,
                    kind = halted.error.kind(),
                    deleted = ?deleted,
                    "schedule evaluation failed"
                );
                ScheduleOutcome::failed(&config.name, halted.error, deleted)
            },
        }
    }

    fn try_evaluate(
        &self,
        config: &RetentionConfig,
    ) -> std::result::Result<ScheduleOutcome, EnforcementError> {
        let records = self
            .lister
            .list(&config.namespace)
            .map_err(|e| Error::List {
                schedule: config.name.clone(),
                cause: e.to_string(),
            })?;

        let (classified, counts) = classify(&records, config, Utc::now());
        debug!(
            listed = records.len(),
            in_use = classified.len(),
            not_in_use = counts.total(),
            cutoff = %config.cutoff(Utc::now()),
            "classified backups"
        );

        let result = enforce(classified, counts, config, &self.protocol, self.lister)?;
        report(&result.classified, &result.counts, &config.name).publish(self.sink);

        info!(
            in_use = result.classified.len(),
            deleted = result.deleted.len(),
            "backup evaluation complete"
        );

        Ok(ScheduleOutcome {
            schedule: config.name.clone(),
            deleted: result.deleted.into_iter().map(|d| d.backup).collect(),
            in_use: result.classified.len(),
            counts: result.counts,
            error: None,
        })
    }

    /// Evaluates `configs` in order, isolating failures per schedule.
    ///
    /// With `only` set, every other schedule is skipped.
    pub fn run_configs(&self, configs: &[RetentionConfig], only: Option<&str>) -> CycleReport {
        let mut cycle = CycleReport::default();

        for config in configs
            .iter()
            .filter(|c| only.is_none_or(|name| c.name == name))
        {
            let start = Instant::now();
            let outcome = self.evaluate(config);
            let label = if outcome.is_success() { "success" } else { "failure" };
            metrics::counter!("taweret_evaluations_total", "outcome" => label).increment(1);
            metrics::histogram!("taweret_evaluation_duration_ms")
                .record(start.elapsed().as_secs_f64() * 1000.0);
            cycle.outcomes.push(outcome);
        }

        info!(
            schedules = cycle.outcomes.len(),
            failed = cycle.failed().count(),
            "backup config evaluations complete"
        );
        cycle
    }

    /// Loads the retention configs and evaluates all of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the configs cannot be loaded. Schedule failures
    /// are reported in the [`CycleReport`] instead.
    pub fn run_cycle(&self, provider: &dyn ConfigProvider) -> Result<CycleReport> {
        self.run_cycle_for(provider, None)
    }

    /// Like [`Self::run_cycle`], restricted to one schedule when `schedule`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the configs cannot be loaded, or
    /// [`Error::NotFound`] if the named schedule is not configured.
    pub fn run_cycle_for(
        &self,
        provider: &dyn ConfigProvider,
        schedule: Option<&str>,
    ) -> Result<CycleReport> {
        let configs = provider.retention_configs()?;
        if let Some(name) = schedule
            && !configs.iter().any(|c| c.name == name)
        {
            return Err(Error::NotFound {
                kind: "schedule".to_string(),
                name: name.to_string(),
            });
        }
        Ok(self.run_configs(&configs, schedule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaxAge;
    use crate::models::{BackupRecord, BackupStatus};
    use crate::observability::RecordingSink;
    use crate::retention::report::{BACKUP_COUNT, NEWEST_BACKUP_TIMESTAMP};
    use crate::store::memory::{FailurePoint, InMemoryStore};
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn fast_poll() -> PollConfig {
        PollConfig {
            initial_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(1),
            multiplier: 1,
            max_wait: StdDuration::from_millis(50),
        }
    }

    fn schedule(name: &str, namespace: &str, max_backups: u32) -> RetentionConfig {
        RetentionConfig::new(name, namespace)
            .with_blueprint("bp")
            .with_max_backups(max_backups)
            .with_max_age(MaxAge::days(7))
    }

    fn seed(store: &InMemoryStore, namespace: &str, schedule: &str, count: i64) {
        for i in 0..count {
            store.insert_backup(
                namespace,
                BackupRecord::new(
                    format!("{schedule}-{i}"),
                    schedule,
                    BackupStatus::Complete,
                    Utc::now() - Duration::hours(count - i),
                ),
            );
        }
    }

    #[test]
    fn test_evaluate_publishes_gauges() {
        let store = InMemoryStore::new();
        seed(&store, "kanister", "daily", 3);
        let sink = RecordingSink::new();
        let evaluator = Evaluator::new(&store, &store, &sink, fast_poll());

        let outcome = evaluator.evaluate(&schedule("daily", "kanister", 2));

        assert!(outcome.is_success());
        assert_eq!(outcome.deleted, vec!["daily-0".to_string()]);
        assert_eq!(outcome.in_use, 2);
        assert_eq!(sink.value(BACKUP_COUNT, "daily", Some("completed")), Some(2.0));
    }

    #[test]
    fn test_failed_schedule_does_not_stop_siblings() {
        let store = InMemoryStore::new();
        seed(&store, "team-a", "a", 3);
        seed(&store, "team-b", "b", 3);
        store.fail_list_for("team-a");
        store.set_configs(vec![schedule("a", "team-a", 1), schedule("b", "team-b", 1)]);
        let sink = RecordingSink::new();
        let evaluator = Evaluator::new(&store, &store, &sink, fast_poll());

        let cycle = evaluator.run_cycle(&store).unwrap();

        assert!(!cycle.is_success());
        assert_eq!(cycle.failed().count(), 1);
        assert_eq!(cycle.outcome("a").and_then(|o| o.error.as_ref()).map(Error::kind), Some("list"));
        assert_eq!(cycle.outcome("b").map(|o| o.deleted.len()), Some(2));
        assert!(sink.value(NEWEST_BACKUP_TIMESTAMP, "a", None).is_none());
        assert!(cycle.summary().contains("1 failed"));
    }

    #[test]
    fn test_failed_schedule_keeps_previous_gauges() {
        let store = InMemoryStore::new();
        seed(&store, "kanister", "daily", 2);
        let sink = RecordingSink::new();
        let evaluator = Evaluator::new(&store, &store, &sink, fast_poll());
        let config = schedule("daily", "kanister", 5);

        assert!(evaluator.evaluate(&config).is_success());
        let before = sink.value(BACKUP_COUNT, "daily", Some("completed"));
        store.fail_at(FailurePoint::List);
        let cycle = evaluator.run_configs(std::slice::from_ref(&config), None);

        assert!(!cycle.is_success());
        assert_eq!(sink.value(BACKUP_COUNT, "daily", Some("completed")), before);
    }

    #[test]
    fn test_schedule_filter() {
        let store = InMemoryStore::new();
        store.set_configs(vec![
            schedule("a", "kanister", 1),
            schedule("b", "kanister", 1),
        ]);
        let sink = RecordingSink::new();
        let evaluator = Evaluator::new(&store, &store, &sink, fast_poll());

        let cycle = evaluator.run_cycle_for(&store, Some("b")).unwrap();
        assert_eq!(cycle.outcomes.len(), 1);
        assert_eq!(cycle.outcomes[0].schedule, "b");

        let err = evaluator.run_cycle_for(&store, Some("missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_config_failure_fails_cycle() {
        let store = InMemoryStore::new();
        store.fail_at(FailurePoint::Configs);
        let sink = RecordingSink::new();
        let evaluator = Evaluator::new(&store, &store, &sink, fast_poll());

        assert!(evaluator.run_cycle(&store).is_err());
    }
}
