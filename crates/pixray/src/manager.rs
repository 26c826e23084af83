//! Generation job manager.
//!
//! [`GenerationManager`] is the public face of the orchestration layer.
//! It submits prompts to the remote service, tracks every in-flight job
//! in the [`JobRegistry`], runs one polling task per job, downloads
//! finished artifacts, and broadcasts [`JobEvent`]s. Create one at
//! startup via [`GenerationManager::start`]; the returned `Arc` is
//! cheap to clone into whatever front end drives it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use easel_core::job::{JobRecord, JobStatus};
use easel_core::types::JobId;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::api::PixrayApiError;
use crate::artifact;
use crate::backend::GenerationBackend;
use crate::events::JobEvent;
use crate::poller::{poll_job, JobOutcome, PollPolicy};
use crate::registry::JobRegistry;

/// Broadcast channel capacity for job events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each poll task to stop.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Orchestrates the full lifecycle of remote generation jobs.
pub struct GenerationManager {
    backend: Arc<dyn GenerationBackend>,
    registry: Arc<JobRegistry>,
    /// Poll tasks indexed by job id.
    jobs: Arc<RwLock<HashMap<JobId, ManagedJob>>>,
    event_tx: broadcast::Sender<JobEvent>,
    policy: PollPolicy,
    output_dir: PathBuf,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

/// Internal bookkeeping for a single in-flight job.
struct ManagedJob {
    task_handle: tokio::task::JoinHandle<()>,
    /// Per-job cancellation token (child of the master token).
    cancel: CancellationToken,
}

/// Errors that can occur when interacting with the manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The creation call failed; no job was registered.
    #[error("Failed to submit generation job: {0}")]
    SubmitFailed(#[from] PixrayApiError),

    /// The remote service accepted the request but reported an error
    /// in the creation response; no job was registered.
    #[error("Remote service rejected the job: {0}")]
    Rejected(String),

    /// No tracked job has this id.
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// The remote service reissued an id that is still tracked.
    #[error("Job {0} is already tracked")]
    AlreadyTracked(JobId),
}

impl GenerationManager {
    /// Create a manager around a generation backend.
    ///
    /// Returns a shared handle that is safe to clone into the caller's
    /// front end.
    pub fn start(
        backend: Arc<dyn GenerationBackend>,
        policy: PollPolicy,
        output_dir: PathBuf,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            backend,
            registry: Arc::new(JobRegistry::new()),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            policy,
            output_dir,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Submit a prompt for generation.
    ///
    /// Returns as soon as the remote service has accepted the job and
    /// the polling task is running -- it never waits for generation.
    /// Any creation failure is propagated synchronously and leaves
    /// nothing registered.
    pub async fn submit(&self, prompt: &str, requester: &str) -> Result<JobId, ManagerError> {
        let response = self.backend.submit(prompt).await?;

        if let Some(error) = response.error {
            return Err(ManagerError::Rejected(error));
        }
        let status = JobStatus::from_wire(&response.status)
            .map_err(|e| PixrayApiError::Protocol(e.to_string()))?;
        let id = response.uuid;

        let record = JobRecord::new(id.clone(), prompt, requester, status);
        if self.registry.insert(record).await.is_err() {
            return Err(ManagerError::AlreadyTracked(id));
        }

        tracing::info!(job_id = %id, status = %status, "Generation job submitted");
        let _ = self.event_tx.send(JobEvent::Submitted {
            id: id.clone(),
            prompt: prompt.to_string(),
            requester: requester.to_string(),
            status,
        });

        self.spawn_poll_task(id.clone()).await;
        Ok(id)
    }

    /// Current snapshot of a tracked job.
    pub async fn status(&self, id: &str) -> Result<JobRecord, ManagerError> {
        self.registry
            .get(id)
            .await
            .map_err(|_| ManagerError::JobNotFound(id.to_string()))
    }

    /// Point-in-time snapshot of every job still in flight.
    pub async fn list_active(&self) -> Vec<JobRecord> {
        self.registry.list().await
    }

    /// Abort an in-flight job.
    ///
    /// The job resolves as failed ("cancelled") and emits its terminal
    /// event like any other failure.
    pub async fn cancel(&self, id: &str) -> Result<(), ManagerError> {
        let jobs = self.jobs.read().await;
        match jobs.get(id) {
            Some(managed) => {
                tracing::info!(job_id = %id, "Cancelling job");
                managed.cancel.cancel();
                Ok(())
            }
            None => Err(ManagerError::JobNotFound(id.to_string())),
        }
    }

    /// Gracefully stop all poll tasks.
    ///
    /// Cancels the master token, then waits up to 5 seconds per task
    /// for a clean exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down generation manager");
        self.cancel.cancel();

        // Drain first, then join: the tasks themselves remove their own
        // entries and would deadlock against a held write lock.
        let drained: Vec<(JobId, ManagedJob)> =
            self.jobs.write().await.drain().collect();
        for (id, managed) in drained {
            managed.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, managed.task_handle)
                .await
                .is_err()
            {
                tracing::warn!(job_id = %id, "Poll task did not stop in time");
            }
        }

        tracing::info!("Generation manager shut down");
    }

    // ---- private helpers ----

    /// Spawn the polling task that owns this job until resolution.
    async fn spawn_poll_task(&self, id: JobId) {
        let backend = Arc::clone(&self.backend);
        let registry = Arc::clone(&self.registry);
        let jobs = Arc::clone(&self.jobs);
        let event_tx = self.event_tx.clone();
        let policy = self.policy.clone();
        let output_dir = self.output_dir.clone();
        let job_cancel = self.cancel.child_token();
        let task_cancel = job_cancel.clone();
        let task_id = id.clone();

        // Hold the map lock across the spawn so the task's own cleanup
        // cannot run before its entry exists.
        let mut jobs_guard = self.jobs.write().await;
        let task_handle = tokio::spawn(async move {
            run_job(
                backend, registry, jobs, event_tx, policy, output_dir, task_id, task_cancel,
            )
            .await;
        });
        jobs_guard.insert(
            id,
            ManagedJob {
                task_handle,
                cancel: job_cancel,
            },
        );
    }
}

/// Poll a job to resolution, handle its terminal state, clean up.
///
/// Success resolves into an artifact download; a download failure is
/// surfaced as its own event kind so the caller knows the artifact
/// exists remotely but was not retrieved. Exactly one terminal event is
/// emitted, after which the record leaves the registry.
#[allow(clippy::too_many_arguments)]
async fn run_job(
    backend: Arc<dyn GenerationBackend>,
    registry: Arc<JobRegistry>,
    jobs: Arc<RwLock<HashMap<JobId, ManagedJob>>>,
    event_tx: broadcast::Sender<JobEvent>,
    policy: PollPolicy,
    output_dir: PathBuf,
    id: JobId,
    cancel: CancellationToken,
) {
    let outcome = poll_job(backend.as_ref(), &registry, &id, &policy, &cancel).await;

    let (prompt, requester) = match registry.get(&id).await {
        Ok(record) => (record.prompt, record.requester),
        Err(_) => Default::default(),
    };

    let event = match outcome {
        JobOutcome::Succeeded { output_reference } => {
            match artifact::download(backend.as_ref(), &id, &output_reference, &output_dir).await {
                Ok(artifact_path) => JobEvent::Completed {
                    id: id.clone(),
                    prompt,
                    requester,
                    artifact_path,
                },
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Artifact download failed");
                    JobEvent::ArtifactFetchFailed {
                        id: id.clone(),
                        prompt,
                        requester,
                        output_reference,
                        error: e.to_string(),
                    }
                }
            }
        }
        JobOutcome::Failed { detail } => {
            tracing::info!(job_id = %id, error = %detail, "Job failed");
            JobEvent::Failed {
                id: id.clone(),
                prompt,
                requester,
                error: detail,
            }
        }
    };

    let _ = event_tx.send(event);
    registry.remove(&id).await;
    jobs.write().await.remove(&id);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;
    use assert_matches::assert_matches;

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 50,
            max_duration: Duration::from_secs(5),
        }
    }

    fn start(backend: FakeBackend, output_dir: PathBuf) -> (Arc<GenerationManager>, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let manager = GenerationManager::start(
            Arc::clone(&backend) as Arc<dyn GenerationBackend>,
            fast_policy(),
            output_dir,
        );
        (manager, backend)
    }

    /// Receive events until a terminal one arrives.
    async fn recv_terminal(events: &mut broadcast::Receiver<JobEvent>) -> JobEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("timed out waiting for a terminal event")
                .expect("event channel closed");
            if event.is_terminal() {
                return event;
            }
        }
    }

    /// Wait for terminal handling to finish removing the record.
    async fn wait_until_empty(manager: &GenerationManager) {
        for _ in 0..200 {
            if manager.list_active().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("registry never emptied");
    }

    #[tokio::test]
    async fn lifecycle_queued_processing_success() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new()
            .submit_ok("abc", "queued")
            .poll_ok("processing")
            .poll_success("abc.png")
            .artifact_chunks(vec![Ok(b"PNGDATA".to_vec())]);
        let (manager, backend) = start(backend, dir.path().to_path_buf());
        let mut events = manager.subscribe();

        let id = manager.submit("a cat in a hat", "user-1").await.unwrap();
        assert_eq!(id, "abc");

        // Immediate acknowledgement, then exactly one terminal event.
        assert_matches!(events.recv().await.unwrap(), JobEvent::Submitted { .. });
        let terminal = recv_terminal(&mut events).await;
        match terminal {
            JobEvent::Completed {
                id,
                prompt,
                requester,
                artifact_path,
            } => {
                assert_eq!(id, "abc");
                assert_eq!(prompt, "a cat in a hat");
                assert_eq!(requester, "user-1");
                assert_eq!(tokio::fs::read(&artifact_path).await.unwrap(), b"PNGDATA");
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        wait_until_empty(&manager).await;
        assert_matches!(
            manager.status("abc").await,
            Err(ManagerError::JobNotFound(_))
        );
        assert_eq!(backend.fetch_call_count(), 1);
    }

    #[tokio::test]
    async fn remote_error_mid_run_fails_without_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new()
            .submit_ok("abc", "queued")
            .poll_with("processing", Some("OOM"), None);
        let (manager, backend) = start(backend, dir.path().to_path_buf());
        let mut events = manager.subscribe();

        manager.submit("a cat in a hat", "user-1").await.unwrap();

        let terminal = recv_terminal(&mut events).await;
        assert_matches!(
            terminal,
            JobEvent::Failed { id, error, .. } if id == "abc" && error == "OOM"
        );
        assert_eq!(backend.fetch_call_count(), 0);
        wait_until_empty(&manager).await;
    }

    #[tokio::test]
    async fn transient_poll_failure_still_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new()
            .submit_ok("abc", "queued")
            .poll_err(PixrayApiError::Transport("connection reset".into()))
            .poll_success("abc.png")
            .artifact_chunks(vec![Ok(b"DATA".to_vec())]);
        let (manager, _backend) = start(backend, dir.path().to_path_buf());
        let mut events = manager.subscribe();

        manager.submit("a cat in a hat", "user-1").await.unwrap();

        assert_matches!(recv_terminal(&mut events).await, JobEvent::Completed { .. });
    }

    #[tokio::test]
    async fn identical_prompts_resolve_independently() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new()
            .submit_ok("abc", "queued")
            .submit_ok("def", "queued")
            .idle_poll("processing");
        let (manager, _backend) = start(backend, dir.path().to_path_buf());

        let first = manager.submit("same prompt", "user-1").await.unwrap();
        let second = manager.submit("same prompt", "user-1").await.unwrap();

        assert_ne!(first, second);
        let active = manager.list_active().await;
        assert_eq!(active.len(), 2);

        // Cancelling one leaves the other in flight.
        let mut events = manager.subscribe();
        manager.cancel(&first).await.unwrap();
        let terminal = recv_terminal(&mut events).await;
        assert_matches!(
            terminal,
            JobEvent::Failed { id, error, .. } if id == first && error == "cancelled"
        );
        assert!(manager.status(&second).await.is_ok());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _backend) = start(FakeBackend::new(), dir.path().to_path_buf());

        assert_matches!(
            manager.status("never-submitted").await,
            Err(ManagerError::JobNotFound(_))
        );
        assert_matches!(
            manager.cancel("never-submitted").await,
            Err(ManagerError::JobNotFound(_))
        );
    }

    #[tokio::test]
    async fn submit_failure_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let backend =
            FakeBackend::new().submit_err(PixrayApiError::Transport("unreachable".into()));
        let (manager, _backend) = start(backend, dir.path().to_path_buf());

        let result = manager.submit("a cat in a hat", "user-1").await;

        assert_matches!(result, Err(ManagerError::SubmitFailed(_)));
        assert!(manager.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn creation_time_remote_error_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new().submit_rejected("abc", "queued", "quota exceeded");
        let (manager, _backend) = start(backend, dir.path().to_path_buf());

        let result = manager.submit("a cat in a hat", "user-1").await;

        assert_matches!(result, Err(ManagerError::Rejected(e)) if e == "quota exceeded");
        assert!(manager.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_initial_status_fails_submission() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new().submit_ok("abc", "warming");
        let (manager, _backend) = start(backend, dir.path().to_path_buf());

        let result = manager.submit("a cat in a hat", "user-1").await;

        assert_matches!(
            result,
            Err(ManagerError::SubmitFailed(PixrayApiError::Protocol(_)))
        );
        assert!(manager.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn artifact_fetch_failure_is_its_own_event() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new()
            .submit_ok("abc", "queued")
            .poll_success("abc.png")
            .artifact_error(PixrayApiError::Transport("connection reset".into()));
        let (manager, _backend) = start(backend, dir.path().to_path_buf());
        let mut events = manager.subscribe();

        manager.submit("a cat in a hat", "user-1").await.unwrap();

        let terminal = recv_terminal(&mut events).await;
        assert_matches!(
            terminal,
            JobEvent::ArtifactFetchFailed { id, output_reference, .. }
                if id == "abc" && output_reference == "abc.png"
        );
        wait_until_empty(&manager).await;
    }

    #[tokio::test]
    async fn timeout_cap_fails_a_wedged_job() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::new().submit_ok("abc", "queued").idle_poll("processing"));
        let manager = GenerationManager::start(
            Arc::clone(&backend) as Arc<dyn GenerationBackend>,
            PollPolicy {
                interval: Duration::from_millis(1),
                max_attempts: 3,
                max_duration: Duration::from_secs(5),
            },
            dir.path().to_path_buf(),
        );
        let mut events = manager.subscribe();

        manager.submit("a cat in a hat", "user-1").await.unwrap();

        let terminal = recv_terminal(&mut events).await;
        assert_matches!(
            terminal,
            JobEvent::Failed { error, .. } if error.contains("Timed out")
        );
        wait_until_empty(&manager).await;
    }

    #[tokio::test]
    async fn shutdown_stops_in_flight_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new()
            .submit_ok("abc", "queued")
            .idle_poll("processing");
        let (manager, _backend) = start(backend, dir.path().to_path_buf());

        manager.submit("a cat in a hat", "user-1").await.unwrap();
        manager.shutdown().await;

        // The poll task is gone; the job resolved as cancelled.
        assert!(manager.jobs.read().await.is_empty());
    }
}
