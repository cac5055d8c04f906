//! Data models for taweret.
//!
//! Backup records and tallies live in [`backup`], deletion requests in
//! [`deletion`], and the `ActionSet` wire shapes in [`actionset`].

pub mod actionset;
mod backup;
mod deletion;

pub use actionset::{ActionSet, ActionSetList};
pub use backup::{BackupCounts, BackupRecord, BackupStatus, ClassifiedSet, StatusBucket};
pub use deletion::{DEFAULT_DELETION_PREFIX, DeletionRequest, DeletionState, request_name};
