//! Batch jobs: registry, scheduling and the per-job progress model.
//!
//! - `JobStore`: registry of job snapshots that pollers read
//! - `BatchEngine`: runs a job group by group and finalizes its archive
//! - `BatchService`: object-safe surface for the transport layer

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{BatchEngine, BatchService, BatchSettings, EngineError, JobError, RecordInput};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{BatchSummary, JobId, JobSnapshot, JobStatus, RecordFailure, RecordOutcome};
