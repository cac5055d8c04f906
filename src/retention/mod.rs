//! Retention evaluation.
//!
//! For each schedule the pipeline is:
//!
//! ```text
//! list ─► classify ─► enforce ─► report
//!                       │
//!                       └─► delete (oldest first) ─► re-list ─► classify
//! ```
//!
//! | Stage | Module |
//! |-------|--------|
//! | Split backups into in-use records and tallies | [`classifier`] |
//! | Delete the oldest backups over the limit | [`enforcer`] |
//! | Drive one deletion to completion | [`deletion`] |
//! | Derive gauges | [`report`] |
//! | Run every schedule with failure isolation | [`evaluator`] |

pub mod classifier;
pub mod deletion;
pub mod enforcer;
pub mod evaluator;
pub mod report;

pub use classifier::classify;
pub use deletion::{DeletionOutcome, DeletionProtocol, PollConfig};
pub use enforcer::{EnforcementError, EnforcementResult, deletion_candidates, enforce};
pub use evaluator::{CycleReport, Evaluator, ScheduleOutcome};
pub use report::{GaugeSet, GaugeValue, report};
