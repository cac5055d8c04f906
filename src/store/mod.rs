//! Collaborators the retention engine talks to.
//!
//! The engine never touches the cluster directly. It lists backups through a
//! [`RecordLister`], drives deletions through a [`DeletionClient`], reads
//! policies from a [`ConfigProvider`] and writes gauges to a [`MetricsSink`].
//!
//! Two implementations ship with the crate:
//!
//! | Store | Use |
//! |-------|-----|
//! | [`kubernetes::KubeClient`] | Talks to the Kubernetes API server over HTTPS |
//! | [`memory::InMemoryStore`] | Scriptable in-process store for tests and dry runs |

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeClient;
pub use memory::InMemoryStore;

use crate::Result;
use crate::config::RetentionConfig;
use crate::models::{BackupRecord, DeletionRequest, DeletionState};
use crate::retention::report::GaugeValue;

/// Enumerates backup records in a namespace.
pub trait RecordLister: Send + Sync {
    /// Returns every backup record in `namespace`, across all schedules.
    ///
    /// Resources that are not backups are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be fetched or decoded.
    fn list(&self, namespace: &str) -> Result<Vec<BackupRecord>>;
}

/// Submits and observes deletion requests.
pub trait DeletionClient: Send + Sync {
    /// Returns `true` if a resource named `name` exists in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached. A missing resource is
    /// not an error.
    fn exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Submits a deletion request and returns the name it was created under.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is rejected.
    fn create(&self, request: &DeletionRequest) -> Result<String>;

    /// Fetches the current state of a deletion request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be read.
    fn get_status(&self, namespace: &str, name: &str) -> Result<DeletionState>;

    /// Removes the resource `name` from `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if the resource is already gone, or
    /// another error if the removal fails.
    fn delete_resource(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Supplies the retention policies to enforce.
pub trait ConfigProvider: Send + Sync {
    /// Returns every configured retention policy.
    ///
    /// # Errors
    ///
    /// Returns an error if any policy cannot be loaded or names collide.
    fn retention_configs(&self) -> Result<Vec<RetentionConfig>>;
}

/// Receives gauge updates.
pub trait MetricsSink: Send + Sync {
    /// Overwrites the gauge identified by name and labels.
    fn set_gauge(&self, gauge: &GaugeValue);
}
