//! Job lifecycle types: the status state machine and the per-job record.
//!
//! A job moves `Queued -> Processing -> {Succeeded, Failed}` (or straight
//! from `Queued` to a terminal state) and never backward. The record
//! methods are the only way to reach a terminal state, so the
//! forward-only rule and the error/output mutual exclusion hold by
//! construction.

use serde::Serialize;

use crate::error::CoreError;
use crate::types::{JobId, RequesterId, Timestamp};

// ---------------------------------------------------------------------------
// Wire status strings
// ---------------------------------------------------------------------------

/// Remote wire string for a queued job.
pub const WIRE_STATUS_QUEUED: &str = "queued";
/// Remote wire string for a job being processed.
pub const WIRE_STATUS_PROCESSING: &str = "processing";
/// Remote wire string for a completed job.
pub const WIRE_STATUS_SUCCESS: &str = "success";
/// Remote wire string for a failed job.
pub const WIRE_STATUS_FAILED: &str = "failed";

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a generation job.
///
/// `Succeeded` and `Failed` are terminal (absorbing); `Queued` and
/// `Processing` are collectively "working".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Parse a status string as reported by the remote service.
    ///
    /// Unknown strings are rejected -- a caller that treats the wire as
    /// authoritative must surface these as protocol faults.
    pub fn from_wire(s: &str) -> Result<Self, CoreError> {
        match s {
            WIRE_STATUS_QUEUED => Ok(Self::Queued),
            WIRE_STATUS_PROCESSING => Ok(Self::Processing),
            WIRE_STATUS_SUCCESS => Ok(Self::Succeeded),
            WIRE_STATUS_FAILED => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown job status '{other}'"
            ))),
        }
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether the job is still waiting on the remote service.
    pub fn is_working(self) -> bool {
        !self.is_terminal()
    }

    /// Position in the forward order `Queued < Processing < terminal`.
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Processing => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => WIRE_STATUS_QUEUED,
            Self::Processing => WIRE_STATUS_PROCESSING,
            Self::Succeeded => WIRE_STATUS_SUCCESS,
            Self::Failed => WIRE_STATUS_FAILED,
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// One submitted generation request and its current lifecycle snapshot.
///
/// Identity fields (`id`, `prompt`, `requester`, `submitted_at`) are set
/// once at creation. The mutable fields only ever move forward: use
/// [`advance`](Self::advance) for working-state updates and
/// [`succeed`](Self::succeed) / [`fail`](Self::fail) for terminal ones.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    /// Identifier issued by the remote service.
    pub id: JobId,
    /// Original query text supplied by the caller.
    pub prompt: String,
    /// Calling context the result is routed back to.
    pub requester: RequesterId,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Diagnostic detail, present only once the job has failed.
    pub error_detail: Option<String>,
    /// Remote artifact locator, present only once the job has succeeded.
    pub output_reference: Option<String>,
    /// When the job was accepted by the remote service (UTC).
    pub submitted_at: Timestamp,
    /// Completed status-poll attempts.
    pub attempts: u32,
}

impl JobRecord {
    /// Create a fresh record in the initial state the remote reported.
    pub fn new(
        id: impl Into<JobId>,
        prompt: impl Into<String>,
        requester: impl Into<RequesterId>,
        initial: JobStatus,
    ) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            requester: requester.into(),
            status: initial,
            error_detail: None,
            output_reference: None,
            submitted_at: chrono::Utc::now(),
            attempts: 0,
        }
    }

    /// Whether the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Count one completed poll attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Move to a later *working* state.
    ///
    /// Backward moves and no-ops are ignored (the remote occasionally
    /// re-reports an earlier state; the record holds its ground), as are
    /// terminal targets -- those go through [`succeed`](Self::succeed)
    /// and [`fail`](Self::fail). Returns whether the status changed.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() || next.is_terminal() {
            return false;
        }
        if next.rank() > self.status.rank() {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Resolve the job as succeeded with its remote artifact locator.
    pub fn succeed(&mut self, output_reference: impl Into<String>) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidTransition(format!(
                "job {} is already {}",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Succeeded;
        self.output_reference = Some(output_reference.into());
        Ok(())
    }

    /// Resolve the job as failed with a diagnostic detail.
    pub fn fail(&mut self, detail: impl Into<String>) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidTransition(format!(
                "job {} is already {}",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Failed;
        self.error_detail = Some(detail.into());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
