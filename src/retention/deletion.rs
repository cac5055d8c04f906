//! Deleting a single backup.
//!
//! A deletion runs through four steps:
//!
//! 1. **Existence check**: look for a deletion request already named after the
//!    backup. If one exists, a previous attempt got as far as submitting it and
//!    creation is skipped.
//! 2. **Request**: submit a delete action for the backup's artifacts.
//! 3. **Poll**: wait for the request to reach `complete` or `failed`, backing
//!    off exponentially up to a bounded total wait.
//! 4. **Finalize**: remove the original backup resource so it drops out of
//!    future listings.
//!
//! A `failed` delete action still finalizes. The failure is logged with the
//! executor's message before the backup resource is removed.

use crate::config::RetentionConfig;
use crate::models::{BackupRecord, DEFAULT_DELETION_PREFIX, DeletionRequest, DeletionState};
use crate::store::DeletionClient;
use crate::{Error, Result};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Poll schedule for deletion requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay before the first status check.
    pub initial_delay: Duration,
    /// Upper bound on a single delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each check.
    pub multiplier: u32,
    /// Total time to wait before giving up.
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
            max_wait: Duration::from_secs(3600),
        }
    }
}

impl PollConfig {
    /// Delay before the given status check (1-based).
    ///
    /// Formula: `initial_delay * multiplier^(attempt - 1)`, capped at
    /// `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay.max(self.initial_delay))
    }
}

/// What a completed deletion did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionOutcome {
    /// Backup that was deleted.
    pub backup: String,
    /// Name of the deletion request.
    pub request: String,
    /// Whether this call submitted the request (false if it already existed).
    pub created: bool,
    /// Terminal state the request reached.
    pub state: DeletionState,
    /// Number of status checks made.
    pub polls: u32,
}

/// Drives deletions through a [`DeletionClient`].
pub struct DeletionProtocol<'a> {
    client: &'a dyn DeletionClient,
    poll: PollConfig,
    prefix: String,
}

impl<'a> DeletionProtocol<'a> {
    /// Creates a protocol using the default request name prefix.
    #[must_use]
    pub fn new(client: &'a dyn DeletionClient, poll: PollConfig) -> Self {
        Self {
            client,
            poll,
            prefix: DEFAULT_DELETION_PREFIX.to_string(),
        }
    }

    /// Overrides the deletion request name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Deletes `backup` under `config`, blocking until the backup resource is
    /// gone.
    ///
    /// # Errors
    ///
    /// - [`Error::DeletionRequest`] if the existence check, submission or a
    ///   status check fails.
    /// - [`Error::DeletionTimeout`] if the request is still in flight after
    ///   the poll budget.
    /// - [`Error::FinalizeDelete`] if the backup resource cannot be removed.
    #[instrument(
        name = "taweret.retention.delete",
        skip(self, backup, config),
        fields(schedule = %config.name, backup = %backup.name)
    )]
    pub fn delete(&self, backup: &BackupRecord, config: &RetentionConfig) -> Result<DeletionOutcome> {
        let request = DeletionRequest::for_backup(backup, config, &self.prefix);
        let request_error = |cause: &Error| Error::DeletionRequest {
            backup: backup.name.clone(),
            cause: cause.to_string(),
        };

        let existing = self
            .client
            .exists(&request.namespace, &request.name)
            .map_err(|e| request_error(&e))?;

        let created = if existing {
            info!(request = %request.name, "deletion request already exists, resuming");
            false
        } else {
            let name = self.client.create(&request).map_err(|e| request_error(&e))?;
            info!(request = %name, "created deletion request");
            true
        };

        let (state, polls) = self.wait_for_terminal(&request, backup)?;

        if let DeletionState::Failed { message } = &state {
            warn!(
                request = %request.name,
                message = message.as_deref().unwrap_or(""),
                "delete action failed, removing backup resource anyway"
            );
        } else {
            info!(request = %request.name, polls, "delete action completed");
        }

        self.finalize(backup, &request.namespace)?;
        metrics::counter!(
            "taweret_backups_deleted_total",
            "backup_config_name" => config.name.clone()
        )
        .increment(1);

        Ok(DeletionOutcome {
            backup: backup.name.clone(),
            request: request.name,
            created,
            state,
            polls,
        })
    }

    fn wait_for_terminal(
        &self,
        request: &DeletionRequest,
        backup: &BackupRecord,
    ) -> Result<(DeletionState, u32)> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let remaining = self.poll.max_wait.saturating_sub(started.elapsed());
            let delay = self.poll.delay_for_attempt(attempt).min(remaining);
            debug!(
                request = %request.name,
                attempt,
                delay_ms = duration_ms(delay),
                "waiting for deletion request"
            );
            std::thread::sleep(delay);

            let state = self
                .client
                .get_status(&request.namespace, &request.name)
                .map_err(|e| Error::DeletionRequest {
                    backup: backup.name.clone(),
                    cause: e.to_string(),
                })?;

            if state.is_terminal() {
                return Ok((state, attempt));
            }
            let waited = started.elapsed();
            if waited >= self.poll.max_wait {
                return Err(Error::DeletionTimeout {
                    request: request.name.clone(),
                    waited_ms: duration_ms(waited),
                });
            }
            debug!(request = %request.name, state = %state, "deletion request still in flight");
        }
    }

    fn finalize(&self, backup: &BackupRecord, namespace: &str) -> Result<()> {
        match self.client.delete_resource(namespace, &backup.name) {
            Ok(()) => {
                info!("removed backup resource");
                Ok(())
            },
            Err(e) if e.is_not_found() => {
                warn!("backup resource already removed");
                Ok(())
            },
            Err(e) => Err(Error::FinalizeDelete {
                backup: backup.name.clone(),
                cause: e.to_string(),
            }),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
