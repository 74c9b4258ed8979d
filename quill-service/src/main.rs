//! QUILL CLI Entry Point
//!
//! Reads lines from stdin and prints each line corrected word by word.
//!
//! ```text
//! quill [--config <path>] [--probe | --health]
//! ```

use std::sync::Arc;

use quill_core::{QuillConfig, QuillError, QuillResult, StorageError};
use quill_service::{init_tracing, CorrectionService};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> QuillResult<()> {
    init_tracing()?;

    let config = QuillConfig::load()?;
    let probe_timeout = config.probe.timeout;
    let probe_on_start = config.probe.enabled;
    let service = Arc::new(CorrectionService::start(config)?);

    if has_flag("--probe") {
        let ok = service.probe_connection(probe_timeout).await;
        service.shutdown().await;
        if !ok {
            return Err(QuillError::ServiceUnavailable {
                service: service.orchestrator().route().name().to_string(),
            });
        }
        return Ok(());
    }

    if has_flag("--health") {
        let report = service.health();
        let json = serde_json::to_string_pretty(&report).map_err(|e| StorageError::Serialization {
            reason: format!("Failed to render health report: {}", e),
        })?;
        println!("{}", json);
        service.shutdown().await;
        return Ok(());
    }

    if probe_on_start {
        let probe = Arc::clone(&service);
        tokio::spawn(async move {
            probe.probe_connection(probe_timeout).await;
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.map_err(|e| io_failed("stdin", e))? else {
                    break;
                };
                let corrected = service.correct_line(&line).await?;
                stdout
                    .write_all(format!("{}\n", corrected).as_bytes())
                    .await
                    .map_err(|e| io_failed("stdout", e))?;
                stdout.flush().await.map_err(|e| io_failed("stdout", e))?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

fn has_flag(flag: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == flag)
}

fn io_failed(path: &str, e: std::io::Error) -> QuillError {
    StorageError::Io {
        path: path.to_string(),
        reason: e.to_string(),
    }
    .into()
}
