//! Artifact retrieval: stream a finished job's output to local storage.
//!
//! Downloads are per-job (the file name is prefixed with the job id),
//! so concurrent jobs never contend for the same path. A failed
//! download removes its partial file before reporting the error; no
//! retry is attempted here.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::api::PixrayApiError;
use crate::backend::{ArtifactStream, GenerationBackend};

/// Errors from artifact retrieval.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The remote read failed (opening the stream or mid-stream).
    #[error(transparent)]
    Remote(#[from] PixrayApiError),

    /// Writing the local file failed.
    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream a finished artifact into `output_dir`.
///
/// Returns the path the artifact landed at. On any failure the partial
/// file is removed before the error is returned, so a caller never
/// observes a truncated artifact on disk.
pub async fn download(
    backend: &dyn GenerationBackend,
    job_id: &str,
    reference: &str,
    output_dir: &Path,
) -> Result<PathBuf, ArtifactError> {
    let path = output_dir.join(format!("{}-{}", job_id, file_name_for(reference)));
    let stream = backend.fetch_artifact(reference).await?;

    match write_stream(&path, stream).await {
        Ok(bytes) => {
            tracing::info!(job_id, path = %path.display(), bytes, "Artifact downloaded");
            Ok(path)
        }
        Err(e) => {
            // Discard the partial write.
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    job_id,
                    path = %path.display(),
                    error = %cleanup,
                    "Failed to remove partial artifact",
                );
            }
            Err(e)
        }
    }
}

/// Reduce a remote reference to a safe local file name.
///
/// References may carry path components (`outputs/abc.png`); only the
/// final component is used.
fn file_name_for(reference: &str) -> &str {
    reference
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("artifact")
}

async fn write_stream(path: &Path, mut stream: ArtifactStream) -> Result<u64, ArtifactError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        file.write_all(&bytes).await?;
        written += bytes.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
