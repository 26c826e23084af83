//! `easel-worker` -- interactive driver for remote generation jobs.
//!
//! Reads prompts from stdin (one per line), submits each to the
//! configured pixray deployment, and prints lifecycle events as the
//! jobs resolve. Stands in for the chat front end during development
//! and operations.
//!
//! # Commands
//!
//! | Input          | Effect                                   |
//! |----------------|------------------------------------------|
//! | `<any text>`   | Submit the line as a generation prompt   |
//! | `status <id>`  | Print the current snapshot of a job      |
//! | `cancel <id>`  | Abort an in-flight job                   |
//! | `list`         | Print all in-flight jobs                 |
//! | `quit`         | Shut down and exit                       |
//!
//! # Environment variables
//!
//! See [`PixrayConfig::from_env`] for the full table; at minimum
//! `PIXRAY_SUBMIT_URL` and `PIXRAY_FILES_URL` must be set.

use std::sync::Arc;

use easel_core::config::PixrayConfig;
use easel_pixray::api::PixrayApi;
use easel_pixray::events::JobEvent;
use easel_pixray::manager::GenerationManager;
use easel_pixray::poller::PollPolicy;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_worker=info,easel_pixray=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match PixrayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        submit_url = %config.submit_url,
        poll_interval_secs = config.poll_interval_secs,
        output_dir = %config.output_dir.display(),
        "Starting easel-worker",
    );

    let policy = PollPolicy::from(&config);
    let output_dir = config.output_dir.clone();
    let backend = Arc::new(PixrayApi::new(config));
    let manager = GenerationManager::start(backend, policy, output_dir);

    let events = manager.subscribe();
    let printer = tokio::spawn(print_events(events));

    run_console(&manager).await?;

    manager.shutdown().await;
    printer.abort();
    Ok(())
}

/// Read commands from stdin until EOF or `quit`.
async fn run_console(manager: &GenerationManager) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "quit" || line == "exit" {
            break;
        } else if line == "list" {
            for record in manager.list_active().await {
                println!(
                    "  {} [{}] attempts={} prompt={:?}",
                    record.id, record.status, record.attempts, record.prompt
                );
            }
        } else if let Some(id) = line.strip_prefix("status ") {
            match manager.status(id.trim()).await {
                Ok(record) => println!(
                    "  {} [{}] attempts={} prompt={:?}",
                    record.id, record.status, record.attempts, record.prompt
                ),
                Err(e) => println!("  {e}"),
            }
        } else if let Some(id) = line.strip_prefix("cancel ") {
            match manager.cancel(id.trim()).await {
                Ok(()) => println!("  cancelling {}", id.trim()),
                Err(e) => println!("  {e}"),
            }
        } else {
            match manager.submit(line, "console").await {
                Ok(id) => println!("  submitted as {id}"),
                Err(e) => println!("  submission failed: {e}"),
            }
        }
    }

    Ok(())
}

/// Print job lifecycle events as they arrive.
async fn print_events(mut events: broadcast::Receiver<JobEvent>) {
    loop {
        match events.recv().await {
            Ok(JobEvent::Submitted { id, status, .. }) => {
                println!("* {id}: accepted ({status})");
            }
            Ok(JobEvent::Completed {
                id, artifact_path, ..
            }) => {
                println!("* {id}: done -> {}", artifact_path.display());
            }
            Ok(JobEvent::ArtifactFetchFailed {
                id,
                output_reference,
                error,
                ..
            }) => {
                println!("* {id}: generated {output_reference}, but the download failed: {error}");
            }
            Ok(JobEvent::Failed { id, error, .. }) => {
                println!("* {id}: failed: {error}");
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Event printer lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
