//! Notifications emitted by the orchestration layer.
//!
//! Broadcast to whoever drives the manager (a chat front end, an
//! operator console). Every submitted job produces exactly one terminal
//! event; `Submitted` is an immediate acknowledgement, not a terminal.

use std::path::PathBuf;

use easel_core::job::JobStatus;
use easel_core::types::{JobId, RequesterId};
use serde::Serialize;

/// A job lifecycle notification.
#[derive(Debug, Clone, Serialize)]
pub enum JobEvent {
    /// The remote service accepted the job; polling has started.
    Submitted {
        id: JobId,
        prompt: String,
        requester: RequesterId,
        status: JobStatus,
    },

    /// Generation finished and the artifact was downloaded.
    Completed {
        id: JobId,
        prompt: String,
        requester: RequesterId,
        /// Where the artifact landed locally.
        artifact_path: PathBuf,
    },

    /// Generation finished but the artifact download failed.
    ///
    /// Distinct from [`Failed`](Self::Failed): the artifact still
    /// exists remotely, it just was not retrieved.
    ArtifactFetchFailed {
        id: JobId,
        prompt: String,
        requester: RequesterId,
        /// Remote locator the download was attempted from.
        output_reference: String,
        error: String,
    },

    /// The job resolved as failed (remote fault, timeout, or
    /// cancellation).
    Failed {
        id: JobId,
        prompt: String,
        requester: RequesterId,
        error: String,
    },
}

impl JobEvent {
    /// Job id the event concerns.
    pub fn job_id(&self) -> &str {
        match self {
            Self::Submitted { id, .. }
            | Self::Completed { id, .. }
            | Self::ArtifactFetchFailed { id, .. }
            | Self::Failed { id, .. } => id,
        }
    }

    /// Whether this event ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted { .. })
    }
}
