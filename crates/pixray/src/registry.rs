//! Concurrent registry of in-flight generation jobs.
//!
//! The registry is the only shared mutable state in the orchestration
//! layer. Every read and write goes through its atomic operations; the
//! underlying map is never exposed, so no caller can read-modify-write
//! a record outside the registry's own synchronization. No operation
//! touches the network.

use std::collections::HashMap;

use easel_core::error::CoreError;
use easel_core::job::JobRecord;
use easel_core::types::JobId;
use tokio::sync::RwLock;

/// Concurrency-safe map of job id to job record.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A record with this id is already tracked.
    #[error("Job {0} is already registered")]
    DuplicateJob(JobId),

    /// No record with this id is tracked.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// A mutation was rejected by the record's own invariants.
    #[error(transparent)]
    Rejected(#[from] CoreError),
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly-submitted job.
    pub async fn insert(&self, record: JobRecord) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&record.id) {
            return Err(RegistryError::DuplicateJob(record.id));
        }
        jobs.insert(record.id.clone(), record);
        Ok(())
    }

    /// Atomically apply a mutation to a tracked record and return the
    /// updated snapshot.
    ///
    /// If the mutator rejects the change, the stored record is left
    /// untouched -- the mutation is all-or-nothing.
    pub async fn update(
        &self,
        id: &str,
        mutator: impl FnOnce(&mut JobRecord) -> Result<(), CoreError>,
    ) -> Result<JobRecord, RegistryError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| RegistryError::JobNotFound(id.to_string()))?;

        let mut updated = entry.clone();
        mutator(&mut updated)?;
        *entry = updated.clone();
        Ok(updated)
    }

    /// Current snapshot of a tracked record.
    pub async fn get(&self, id: &str) -> Result<JobRecord, RegistryError> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::JobNotFound(id.to_string()))
    }

    /// Stop tracking a job. Idempotent; returns the record if it was
    /// still present.
    pub async fn remove(&self, id: &str) -> Option<JobRecord> {
        self.jobs.write().await.remove(id)
    }

    /// Point-in-time snapshot of every tracked record.
    ///
    /// Mutations made after this call are not visible through the
    /// returned vector.
    pub async fn list(&self) -> Vec<JobRecord> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Number of tracked jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether any jobs are tracked.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
