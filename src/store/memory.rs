//! In-process resource store.
//!
//! [`InMemoryStore`] implements every collaborator trait over plain
//! collections. Deletion requests move through a scripted sequence of states
//! (by default `running` then `complete`), and individual calls can be made to
//! fail, which makes it suitable for exercising the retention engine without a
//! cluster.

use crate::config::{RetentionConfig, ensure_unique_names};
use crate::models::{BackupRecord, DeletionRequest, DeletionState};
use crate::store::{ConfigProvider, DeletionClient, RecordLister};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// A call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// [`RecordLister::list`] for every namespace.
    List,
    /// [`DeletionClient::exists`].
    Exists,
    /// [`DeletionClient::create`].
    Create,
    /// [`DeletionClient::get_status`].
    Status,
    /// [`DeletionClient::delete_resource`].
    Finalize,
    /// [`ConfigProvider::retention_configs`].
    Configs,
}

impl FailurePoint {
    const fn operation(self) -> &'static str {
        match self {
            Self::List => "list_backups",
            Self::Exists => "get_deletion_request",
            Self::Create => "create_deletion_request",
            Self::Status => "get_deletion_status",
            Self::Finalize => "delete_resource",
            Self::Configs => "list_retention_configs",
        }
    }
}

#[derive(Debug)]
struct State {
    backups: BTreeMap<String, Vec<BackupRecord>>,
    /// Status checks made per request, keyed by namespace and name.
    requests: BTreeMap<(String, String), usize>,
    configs: Vec<RetentionConfig>,
    script: Vec<DeletionState>,
    failures: HashSet<FailurePoint>,
    failing_namespaces: HashSet<String>,
    created: Vec<DeletionRequest>,
    deleted: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            backups: BTreeMap::new(),
            requests: BTreeMap::new(),
            configs: Vec::new(),
            script: vec![DeletionState::Running, DeletionState::Complete],
            failures: HashSet::new(),
            failing_namespaces: HashSet::new(),
            created: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl State {
    fn check(&self, point: FailurePoint) -> Result<()> {
        if self.failures.contains(&point) {
            return Err(Error::OperationFailed {
                operation: point.operation().to_string(),
                cause: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Resource store backed by in-process collections.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("in-memory store mutex was poisoned, recovering");
                poisoned.into_inner()
            },
        }
    }

    /// Adds a backup to `namespace`. Listing returns backups in insertion order.
    pub fn insert_backup(&self, namespace: &str, backup: BackupRecord) {
        self.lock()
            .backups
            .entry(namespace.to_string())
            .or_default()
            .push(backup);
    }

    /// Adds a deletion request as if an earlier run had submitted it.
    pub fn insert_deletion_request(&self, request: DeletionRequest) {
        let key = (request.namespace.clone(), request.name.clone());
        self.lock().requests.insert(key, 0);
    }

    /// Replaces the retention configs.
    pub fn set_configs(&self, configs: Vec<RetentionConfig>) {
        self.lock().configs = configs;
    }

    /// Sets the states every deletion request reports, one per status check.
    ///
    /// The last state repeats once the sequence is exhausted. An empty
    /// sequence reports `pending` forever.
    pub fn script_deletion_states(&self, states: Vec<DeletionState>) {
        self.lock().script = states;
    }

    /// Makes every subsequent call at `point` fail.
    pub fn fail_at(&self, point: FailurePoint) {
        self.lock().failures.insert(point);
    }

    /// Makes listing `namespace` fail.
    pub fn fail_list_for(&self, namespace: &str) {
        self.lock().failing_namespaces.insert(namespace.to_string());
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failures.clear();
        state.failing_namespaces.clear();
    }

    /// Deletion requests submitted through [`DeletionClient::create`].
    #[must_use]
    pub fn created_requests(&self) -> Vec<DeletionRequest> {
        self.lock().created.clone()
    }

    /// Names of backups removed through [`DeletionClient::delete_resource`].
    #[must_use]
    pub fn deleted_resources(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// Backups currently stored in `namespace`.
    #[must_use]
    pub fn backups(&self, namespace: &str) -> Vec<BackupRecord> {
        self.lock()
            .backups
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }
}

impl RecordLister for InMemoryStore {
    fn list(&self, namespace: &str) -> Result<Vec<BackupRecord>> {
        let state = self.lock();
        state.check(FailurePoint::List)?;
        if state.failing_namespaces.contains(namespace) {
            return Err(Error::OperationFailed {
                operation: FailurePoint::List.operation().to_string(),
                cause: format!("namespace '{namespace}' unavailable"),
            });
        }
        Ok(state.backups.get(namespace).cloned().unwrap_or_default())
    }
}

impl DeletionClient for InMemoryStore {
    fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let state = self.lock();
        state.check(FailurePoint::Exists)?;
        let is_request = state
            .requests
            .contains_key(&(namespace.to_string(), name.to_string()));
        let is_backup = state
            .backups
            .get(namespace)
            .is_some_and(|backups| backups.iter().any(|b| b.name == name));
        Ok(is_request || is_backup)
    }

    fn create(&self, request: &DeletionRequest) -> Result<String> {
        let mut state = self.lock();
        state.check(FailurePoint::Create)?;
        let key = (request.namespace.clone(), request.name.clone());
        if state.requests.contains_key(&key) {
            return Err(Error::OperationFailed {
                operation: FailurePoint::Create.operation().to_string(),
                cause: format!("'{}' already exists", request.name),
            });
        }
        state.requests.insert(key, 0);
        state.created.push(request.clone());
        Ok(request.name.clone())
    }

    fn get_status(&self, namespace: &str, name: &str) -> Result<DeletionState> {
        let mut state = self.lock();
        state.check(FailurePoint::Status)?;
        let script = state.script.clone();
        let polls = state
            .requests
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::NotFound {
                kind: "actionset".to_string(),
                name: name.to_string(),
            })?;

        let index = (*polls).min(script.len().saturating_sub(1));
        *polls += 1;
        Ok(script.get(index).cloned().unwrap_or(DeletionState::Pending))
    }

    fn delete_resource(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.check(FailurePoint::Finalize)?;

        let removed = state.backups.get_mut(namespace).and_then(|backups| {
            let pos = backups.iter().position(|b| b.name == name)?;
            Some(backups.remove(pos))
        });
        if removed.is_some() {
            state.deleted.push(name.to_string());
            return Ok(());
        }

        let key = (namespace.to_string(), name.to_string());
        if state.requests.remove(&key).is_some() {
            return Ok(());
        }

        Err(Error::NotFound {
            kind: "actionset".to_string(),
            name: name.to_string(),
        })
    }
}

impl ConfigProvider for InMemoryStore {
    fn retention_configs(&self) -> Result<Vec<RetentionConfig>> {
        let state = self.lock();
        state.check(FailurePoint::Configs)?;
        ensure_unique_names(&state.configs)?;
        Ok(state.configs.clone())
    }
}
