//! Scripted in-memory [`GenerationBackend`] for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::api::PixrayApiError;
use crate::backend::{ArtifactStream, GenerationBackend};
use crate::messages::{PollSnapshot, SubmitResponse};

/// One scripted artifact fetch: fail to open, or a chunk sequence.
type FetchScript = Result<Vec<Result<Vec<u8>, PixrayApiError>>, PixrayApiError>;

/// Backend that replays queued responses in order.
///
/// Build with the chained `submit_*` / `poll_*` / `artifact_*` methods.
/// When the poll queue runs dry the `idle_poll` snapshot (if set) is
/// repeated, which keeps a job "working" indefinitely for cancellation
/// and timeout tests.
#[derive(Default)]
pub(crate) struct FakeBackend {
    submits: Mutex<VecDeque<Result<SubmitResponse, PixrayApiError>>>,
    polls: Mutex<VecDeque<Result<PollSnapshot, PixrayApiError>>>,
    idle_poll: Option<PollSnapshot>,
    fetches: Mutex<VecDeque<FetchScript>>,
    poll_calls: AtomicU32,
    fetch_calls: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit_ok(self, uuid: &str, status: &str) -> Self {
        self.push_submit(Ok(SubmitResponse {
            uuid: uuid.into(),
            status: status.into(),
            error: None,
        }))
    }

    pub fn submit_rejected(self, uuid: &str, status: &str, error: &str) -> Self {
        self.push_submit(Ok(SubmitResponse {
            uuid: uuid.into(),
            status: status.into(),
            error: Some(error.into()),
        }))
    }

    pub fn submit_err(self, error: PixrayApiError) -> Self {
        self.push_submit(Err(error))
    }

    pub fn poll_ok(self, status: &str) -> Self {
        self.push_poll(Ok(snapshot(status, None, None)))
    }

    pub fn poll_with(self, status: &str, error: Option<&str>, output_file: Option<&str>) -> Self {
        self.push_poll(Ok(snapshot(status, error, output_file)))
    }

    pub fn poll_success(self, output_file: &str) -> Self {
        self.push_poll(Ok(snapshot("success", None, Some(output_file))))
    }

    pub fn poll_err(self, error: PixrayApiError) -> Self {
        self.push_poll(Err(error))
    }

    /// Snapshot repeated once the scripted polls are exhausted.
    pub fn idle_poll(mut self, status: &str) -> Self {
        self.idle_poll = Some(snapshot(status, None, None));
        self
    }

    pub fn artifact_chunks(self, chunks: Vec<Result<Vec<u8>, PixrayApiError>>) -> Self {
        self.push_fetch(Ok(chunks))
    }

    pub fn artifact_error(self, error: PixrayApiError) -> Self {
        self.push_fetch(Err(error))
    }

    pub fn poll_call_count(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_call_count(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn push_submit(self, response: Result<SubmitResponse, PixrayApiError>) -> Self {
        self.submits.lock().unwrap().push_back(response);
        self
    }

    fn push_poll(self, response: Result<PollSnapshot, PixrayApiError>) -> Self {
        self.polls.lock().unwrap().push_back(response);
        self
    }

    fn push_fetch(self, script: FetchScript) -> Self {
        self.fetches.lock().unwrap().push_back(script);
        self
    }
}

#[async_trait::async_trait]
impl GenerationBackend for FakeBackend {
    async fn submit(&self, _prompt: &str) -> Result<SubmitResponse, PixrayApiError> {
        self.submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PixrayApiError::Protocol("no scripted submit".into())))
    }

    async fn poll(&self, _id: &str) -> Result<PollSnapshot, PixrayApiError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.polls.lock().unwrap().pop_front() {
            return next;
        }
        match &self.idle_poll {
            Some(snapshot) => Ok(snapshot.clone()),
            None => Err(PixrayApiError::Protocol("no scripted poll".into())),
        }
    }

    async fn fetch_artifact(&self, _reference: &str) -> Result<ArtifactStream, PixrayApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .fetches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PixrayApiError::Protocol("no scripted fetch".into())));
        let chunks = script?;
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Shorthand for a poll snapshot literal.
pub(crate) fn snapshot(
    status: &str,
    error: Option<&str>,
    output_file: Option<&str>,
) -> PollSnapshot {
    PollSnapshot {
        status: status.into(),
        error: error.map(Into::into),
        output_file: output_file.map(Into::into),
    }
}
