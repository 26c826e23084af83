//! Wire-format types for the pixray prediction API.
//!
//! The remote service answers submission with a flat
//! `{"uuid", "status", "error"}` object and status queries with the
//! same fields (plus `output_file`) nested under `"prediction"`. Status
//! strings stay raw here; [`easel_core::job::JobStatus::from_wire`]
//! interprets them at the decision layer.

use serde::Deserialize;

/// Response returned by the submit endpoint after accepting a job.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the prediction.
    pub uuid: String,
    /// Initial lifecycle status, e.g. `"queued"`.
    pub status: String,
    /// Error reported at creation time, if any.
    #[serde(default)]
    pub error: Option<String>,
}

/// Envelope returned by the status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PollResponse {
    pub prediction: PollSnapshot,
}

/// Point-in-time view of a prediction's progress.
#[derive(Debug, Clone, Deserialize)]
pub struct PollSnapshot {
    /// Current lifecycle status string.
    pub status: String,
    /// Error the service has recorded for the job, if any.
    #[serde(default)]
    pub error: Option<String>,
    /// Name of the finished artifact, present once generation succeeds.
    #[serde(default)]
    pub output_file: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
