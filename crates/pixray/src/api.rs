//! HTTP client for the pixray prediction API.
//!
//! Wraps the three remote endpoints (submit, status, files) using
//! [`reqwest`]. Endpoint URLs, the bearer credential, and the fixed
//! generation parameters all come from
//! [`PixrayConfig`](easel_core::config::PixrayConfig).

use easel_core::config::PixrayConfig;
use futures::StreamExt;

use crate::backend::{ArtifactStream, GenerationBackend};
use crate::messages::{PollResponse, PollSnapshot, SubmitResponse};

/// HTTP client for a single pixray deployment.
pub struct PixrayApi {
    client: reqwest::Client,
    config: PixrayConfig,
}

/// Errors from the pixray HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum PixrayApiError {
    /// The request itself failed (connection, DNS, TLS, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response body was malformed or unexpected.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The service returned a non-2xx status code.
    #[error("Remote API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl PixrayApi {
    /// Create a new API client from deployment configuration.
    pub fn new(config: PixrayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: PixrayConfig) -> Self {
        Self { client, config }
    }

    /// Attach the bearer credential when one is configured.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Build the submit body: the configured fixed parameters plus the
    /// caller's prompt.
    fn submit_body(&self, prompt: &str) -> serde_json::Value {
        let mut settings = self.config.settings.clone();
        settings.insert(
            "prompt".into(),
            serde_json::Value::String(prompt.to_string()),
        );
        serde_json::json!({ "settings": settings })
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or [`PixrayApiError::Api`] with
    /// the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, PixrayApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PixrayApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// Decode failures are protocol faults, not transport faults.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, PixrayApiError> {
        let response = Self::ensure_success(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PixrayApiError::Protocol(e.to_string()))
    }
}

#[async_trait::async_trait]
impl GenerationBackend for PixrayApi {
    async fn submit(&self, prompt: &str) -> Result<SubmitResponse, PixrayApiError> {
        let response = self
            .authorize(self.client.post(&self.config.submit_url))
            .json(&self.submit_body(prompt))
            .send()
            .await
            .map_err(|e| PixrayApiError::Transport(e.to_string()))?;

        Self::parse_response(response).await
    }

    async fn poll(&self, id: &str) -> Result<PollSnapshot, PixrayApiError> {
        let url = format!("{}/{}", self.config.submit_url.trim_end_matches('/'), id);
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| PixrayApiError::Transport(e.to_string()))?;

        let envelope: PollResponse = Self::parse_response(response).await?;
        Ok(envelope.prediction)
    }

    async fn fetch_artifact(&self, reference: &str) -> Result<ArtifactStream, PixrayApiError> {
        let url = format!(
            "{}/{}",
            self.config.files_url.trim_end_matches('/'),
            reference
        );
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| PixrayApiError::Transport(e.to_string()))?;

        let response = Self::ensure_success(response).await?;
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| PixrayApiError::Transport(e.to_string()))
        });
        Ok(Box::pin(stream))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PixrayConfig {
        PixrayConfig::from_lookup(|name| match name {
            "PIXRAY_SUBMIT_URL" => Some("https://api.example/predictions/".into()),
            "PIXRAY_FILES_URL" => Some("https://api.example/files".into()),
            "PIXRAY_SETTINGS" => Some(r#"{"quality": "best"}"#.into()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn submit_body_merges_prompt_into_settings() {
        let api = PixrayApi::new(config());
        let body = api.submit_body("a cat in a hat");
        assert_eq!(body["settings"]["prompt"], "a cat in a hat");
        assert_eq!(body["settings"]["quality"], "best");
    }

    #[test]
    fn submit_body_prompt_wins_over_fixed_parameter() {
        let mut config = config();
        config
            .settings
            .insert("prompt".into(), serde_json::Value::String("stale".into()));
        let api = PixrayApi::new(config);
        let body = api.submit_body("fresh");
        assert_eq!(body["settings"]["prompt"], "fresh");
    }
}
