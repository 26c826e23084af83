//! The generation-backend seam.
//!
//! [`GenerationBackend`] abstracts the three remote operations the
//! orchestration layer needs, so the poll loop and manager can be
//! exercised against scripted in-memory backends in tests. The real
//! HTTP implementation is [`crate::api::PixrayApi`].

use std::pin::Pin;

use futures::Stream;

use crate::api::PixrayApiError;
use crate::messages::{PollSnapshot, SubmitResponse};

/// Chunked byte stream of a finished artifact.
pub type ArtifactStream =
    Pin<Box<dyn Stream<Item = Result<Vec<u8>, PixrayApiError>> + Send>>;

/// Remote operations of an asynchronously-completing generation service.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Submit a prompt for generation.
    ///
    /// Either returns the full creation response or fails -- a partial
    /// identity is never surfaced.
    async fn submit(&self, prompt: &str) -> Result<SubmitResponse, PixrayApiError>;

    /// Query the current status of a prediction.
    ///
    /// No side effects beyond the network call.
    async fn poll(&self, id: &str) -> Result<PollSnapshot, PixrayApiError>;

    /// Open a streaming read of a finished artifact.
    ///
    /// Connection loss mid-stream surfaces as an error item in the
    /// stream; discarding any partial local write is the caller's job.
    async fn fetch_artifact(&self, reference: &str) -> Result<ArtifactStream, PixrayApiError>;
}
