//! Per-job status polling loop.
//!
//! Each in-flight job is driven by one [`poll_job`] task: sleep, query
//! the remote, update the registry, repeat until the job resolves. The
//! interval is fixed rather than adaptive; every job carries attempt
//! and wall-clock caps so a wedged remote prediction cannot pin a task
//! forever.
//!
//! Fault policy: transport and protocol failures while polling are
//! transient (logged, retried next interval); only an error the remote
//! itself reports for the job is terminal.

use std::time::Duration;

use easel_core::config::PixrayConfig;
use easel_core::job::{JobRecord, JobStatus};
use tokio_util::sync::CancellationToken;

use crate::api::PixrayApiError;
use crate::backend::GenerationBackend;
use crate::messages::PollSnapshot;
use crate::registry::JobRegistry;

/// Tunable parameters for the polling loop.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay between status polls.
    pub interval: Duration,
    /// Poll attempts allowed before the job is forced to fail.
    pub max_attempts: u32,
    /// Wall-clock time allowed before the job is forced to fail.
    pub max_duration: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 720,
            max_duration: Duration::from_secs(3600),
        }
    }
}

impl From<&PixrayConfig> for PollPolicy {
    fn from(config: &PixrayConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            max_attempts: config.max_poll_attempts,
            max_duration: Duration::from_secs(config.job_deadline_secs),
        }
    }
}

/// What one poll result means for the job.
#[derive(Debug, PartialEq)]
pub enum StepAction {
    /// Transient fault -- leave the job as-is and retry next interval.
    Retry { reason: String },
    /// Still working -- record the reported status and keep polling.
    Continue { status: JobStatus },
    /// Generation finished; resolve with the artifact reference.
    Succeed { output_reference: String },
    /// Terminal failure with a diagnostic detail.
    Fail { detail: String },
}

/// How a job's polling ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded { output_reference: String },
    Failed { detail: String },
}

/// Interpret one poll result.
///
/// Pure so the whole fault policy is table-testable: transient errors
/// never terminate, a remote-reported error always does, and a success
/// without an artifact reference is a terminal fault of its own.
pub fn decide(result: Result<PollSnapshot, PixrayApiError>) -> StepAction {
    let snapshot = match result {
        Ok(snapshot) => snapshot,
        Err(e) => {
            return StepAction::Retry {
                reason: e.to_string(),
            }
        }
    };

    let status = match JobStatus::from_wire(&snapshot.status) {
        Ok(status) => status,
        Err(e) => {
            return StepAction::Retry {
                reason: e.to_string(),
            }
        }
    };

    // A fault the remote recorded for the job wins over whatever the
    // status field claims.
    if let Some(error) = snapshot.error {
        return StepAction::Fail { detail: error };
    }

    match status {
        JobStatus::Succeeded => match snapshot.output_file {
            Some(reference) => StepAction::Succeed {
                output_reference: reference,
            },
            None => StepAction::Fail {
                detail: "Remote reported success without an output file".into(),
            },
        },
        JobStatus::Failed => StepAction::Fail {
            detail: "Remote reported failure".into(),
        },
        status => StepAction::Continue { status },
    }
}

/// Drive one job to resolution.
///
/// The registry record is updated after every poll; the returned
/// outcome mirrors the record's terminal state. Cancellation is
/// honored at both suspension points (the inter-poll sleep and the
/// in-flight status call) and resolves the job as failed.
pub async fn poll_job(
    backend: &dyn GenerationBackend,
    registry: &JobRegistry,
    id: &str,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> JobOutcome {
    let started = tokio::time::Instant::now();

    loop {
        let current = match registry.get(id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Job vanished from registry");
                return JobOutcome::Failed {
                    detail: "Job is no longer tracked".into(),
                };
            }
        };

        if let Some(outcome) = terminal_outcome(&current) {
            return outcome;
        }

        if current.attempts >= policy.max_attempts {
            let detail = format!("Timed out after {} status checks", current.attempts);
            return fail_job(registry, id, detail).await;
        }
        if started.elapsed() >= policy.max_duration {
            let detail = format!(
                "Timed out after {}s ({} status checks)",
                started.elapsed().as_secs(),
                current.attempts
            );
            return fail_job(registry, id, detail).await;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %id, "Polling cancelled");
                return fail_job(registry, id, "cancelled".into()).await;
            }
            _ = tokio::time::sleep(policy.interval) => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(job_id = %id, "Polling cancelled");
                return fail_job(registry, id, "cancelled".into()).await;
            }
            result = backend.poll(id) => result,
        };

        match decide(result) {
            StepAction::Retry { reason } => {
                tracing::warn!(
                    job_id = %id,
                    attempt = current.attempts + 1,
                    reason = %reason,
                    "Transient poll failure",
                );
                record_attempt(registry, id).await;
            }
            StepAction::Continue { status } => {
                tracing::debug!(job_id = %id, status = %status, "Job still working");
                if let Err(e) = registry
                    .update(id, |rec| {
                        rec.record_attempt();
                        rec.advance(status);
                        Ok(())
                    })
                    .await
                {
                    tracing::error!(job_id = %id, error = %e, "Failed to record job progress");
                }
            }
            StepAction::Succeed { output_reference } => {
                let reference = output_reference.clone();
                match registry
                    .update(id, move |rec| {
                        rec.record_attempt();
                        rec.succeed(reference)
                    })
                    .await
                {
                    Ok(_) => {
                        tracing::info!(job_id = %id, output = %output_reference, "Job succeeded");
                        return JobOutcome::Succeeded { output_reference };
                    }
                    Err(e) => {
                        tracing::error!(job_id = %id, error = %e, "Failed to record job success");
                        return JobOutcome::Failed {
                            detail: e.to_string(),
                        };
                    }
                }
            }
            StepAction::Fail { detail } => {
                return fail_job(registry, id, detail).await;
            }
        }
    }
}

/// Map an already-terminal record to its outcome, if any.
fn terminal_outcome(record: &JobRecord) -> Option<JobOutcome> {
    match record.status {
        JobStatus::Succeeded => Some(match &record.output_reference {
            Some(reference) => JobOutcome::Succeeded {
                output_reference: reference.clone(),
            },
            None => JobOutcome::Failed {
                detail: "Remote reported success without an output file".into(),
            },
        }),
        JobStatus::Failed => Some(JobOutcome::Failed {
            detail: record
                .error_detail
                .clone()
                .unwrap_or_else(|| "Remote reported failure".into()),
        }),
        _ => None,
    }
}

async fn record_attempt(registry: &JobRegistry, id: &str) {
    if let Err(e) = registry
        .update(id, |rec| {
            rec.record_attempt();
            Ok(())
        })
        .await
    {
        tracing::error!(job_id = %id, error = %e, "Failed to record poll attempt");
    }
}

async fn fail_job(registry: &JobRegistry, id: &str, detail: String) -> JobOutcome {
    let recorded = detail.clone();
    if let Err(e) = registry.update(id, move |rec| rec.fail(recorded)).await {
        tracing::error!(job_id = %id, error = %e, "Failed to record job failure");
    }
    JobOutcome::Failed { detail }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
