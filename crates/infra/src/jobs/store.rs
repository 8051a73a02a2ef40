//! Job registry: the single source of truth that pollers read.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::types::{JobId, JobSnapshot, JobStatus};

/// Job registry abstraction.
///
/// Every mutation is a single linearized step; concurrent record tasks can
/// report outcomes without losing increments.
pub trait JobStore: Send + Sync {
    /// Register a newly accepted job in `parsing`.
    fn create(&self, job_id: JobId) -> Result<JobSnapshot, JobStoreError>;

    /// Get a snapshot of a job.
    fn get(&self, job_id: JobId) -> Result<Option<JobSnapshot>, JobStoreError>;

    /// Move to `processing` with the number of records to expect.
    fn begin_processing(&self, job_id: JobId, total: u64) -> Result<(), JobStoreError>;

    /// Count one record as succeeded or failed, then as processed.
    fn record_outcome(&self, job_id: JobId, success: bool) -> Result<JobSnapshot, JobStoreError>;

    /// Mark the job completed. Every record must already be processed.
    fn complete(
        &self,
        job_id: JobId,
        archive_location: String,
    ) -> Result<JobSnapshot, JobStoreError>;

    /// Mark the job failed. Records that never ran are counted as failed.
    fn fail(&self, job_id: JobId, reason: String) -> Result<JobSnapshot, JobStoreError>;
}

/// Job registry error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("job {id}: outcomes can only be recorded while processing (status is {status})")]
    NotProcessing { id: JobId, status: JobStatus },
    #[error("job {0}: every record is already processed")]
    Overflow(JobId),
    #[error("job {id}: {remaining} records still pending")]
    Incomplete { id: JobId, remaining: u64 },
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job registry.
///
/// Entries are never expired here; retention is up to the owner.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobSnapshot>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, JobSnapshot>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job registry lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, JobSnapshot>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job registry lock poisoned".into()))
    }

    fn mutate<F>(&self, job_id: JobId, f: F) -> Result<JobSnapshot, JobStoreError>
    where
        F: FnOnce(&mut JobSnapshot) -> Result<(), JobStoreError>,
    {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        f(job)?;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }
}

fn transition(job: &mut JobSnapshot, to: JobStatus) -> Result<(), JobStoreError> {
    if !job.status.can_transition_to(to) {
        return Err(JobStoreError::InvalidTransition {
            id: job.id,
            from: job.status,
            to,
        });
    }
    job.status = to;
    Ok(())
}

impl JobStore for InMemoryJobStore {
    fn create(&self, job_id: JobId) -> Result<JobSnapshot, JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job_id) {
            return Err(JobStoreError::AlreadyExists(job_id));
        }
        let snapshot = JobSnapshot::accepted(job_id);
        jobs.insert(job_id, snapshot.clone());
        Ok(snapshot)
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobSnapshot>, JobStoreError> {
        Ok(self.read()?.get(&job_id).cloned())
    }

    fn begin_processing(&self, job_id: JobId, total: u64) -> Result<(), JobStoreError> {
        self.mutate(job_id, |job| {
            transition(job, JobStatus::Processing)?;
            job.total = total;
            Ok(())
        })
        .map(|_| ())
    }

    fn record_outcome(&self, job_id: JobId, success: bool) -> Result<JobSnapshot, JobStoreError> {
        self.mutate(job_id, |job| {
            if job.status != JobStatus::Processing {
                return Err(JobStoreError::NotProcessing {
                    id: job.id,
                    status: job.status,
                });
            }
            if job.processed >= job.total {
                return Err(JobStoreError::Overflow(job.id));
            }
            if success {
                job.success += 1;
            } else {
                job.failed += 1;
            }
            job.processed += 1;
            Ok(())
        })
    }

    fn complete(
        &self,
        job_id: JobId,
        archive_location: String,
    ) -> Result<JobSnapshot, JobStoreError> {
        self.mutate(job_id, |job| {
            let remaining = job.remaining();
            if remaining > 0 {
                return Err(JobStoreError::Incomplete {
                    id: job.id,
                    remaining,
                });
            }
            transition(job, JobStatus::Completed)?;
            job.archive_location = Some(archive_location);
            Ok(())
        })
    }

    fn fail(&self, job_id: JobId, reason: String) -> Result<JobSnapshot, JobStoreError> {
        self.mutate(job_id, |job| {
            transition(job, JobStatus::Error)?;
            let remaining = job.remaining();
            job.failed += remaining;
            job.processed += remaining;
            job.archive_location = None;
            job.error = Some(reason);
            Ok(())
        })
    }
}

impl JobStore for Arc<InMemoryJobStore> {
    fn create(&self, job_id: JobId) -> Result<JobSnapshot, JobStoreError> {
        (**self).create(job_id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobSnapshot>, JobStoreError> {
        (**self).get(job_id)
    }

    fn begin_processing(&self, job_id: JobId, total: u64) -> Result<(), JobStoreError> {
        (**self).begin_processing(job_id, total)
    }

    fn record_outcome(&self, job_id: JobId, success: bool) -> Result<JobSnapshot, JobStoreError> {
        (**self).record_outcome(job_id, success)
    }

    fn complete(
        &self,
        job_id: JobId,
        archive_location: String,
    ) -> Result<JobSnapshot, JobStoreError> {
        (**self).complete(job_id, archive_location)
    }

    fn fail(&self, job_id: JobId, reason: String) -> Result<JobSnapshot, JobStoreError> {
        (**self).fail(job_id, reason)
    }
}
