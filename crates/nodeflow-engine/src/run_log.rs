use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use nodeflow_core::event::EventBus;
use nodeflow_core::types::EngineEvent;

/// JSONL run archive.
///
/// Subscribes to the EventBus and writes one JSON object per line to
/// `{log_dir}/{run_id}.jsonl`, opening a new file on every `RunStarted`.
/// Each line is flushed as it is written, so a crash mid-run leaves every
/// earlier line intact.
pub struct RunLogger {
    log_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    /// Subscribe now and write in a background task until `cancel` fires or
    /// the bus closes. Subscribing before spawning means no event published
    /// after this call returns is missed.
    pub fn spawn(self, event_bus: Arc<EventBus>, cancel: CancellationToken) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, cancel))
    }

    async fn run(self, mut rx: tokio::sync::broadcast::Receiver<EngineEvent>, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, path = %self.log_dir.display(), "Failed to create log directory");
            return;
        }

        let mut writer: Option<BufWriter<tokio::fs::File>> = None;
        let mut run_id = String::new();

        loop {
            // Queued events are drained before cancellation is observed.
            let event = tokio::select! {
                biased;
                result = rx.recv() => match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "RunLogger lagged, skipped events");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        debug!("EventBus closed, RunLogger stopping");
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
            };

            if let EngineEvent::RunStarted { run_id: id, .. } = &event {
                if let Some(mut previous) = writer.take() {
                    previous.flush().await.ok();
                }
                run_id = id.0.clone();
                let path = self.log_dir.join(format!("{}.jsonl", run_id));
                match tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                {
                    Ok(file) => {
                        info!(path = %path.display(), "Archiving run");
                        writer = Some(BufWriter::new(file));
                    }
                    Err(e) => {
                        error!(error = %e, path = %path.display(), "Failed to open run log");
                        continue;
                    }
                }
            }

            let Some(w) = writer.as_mut() else {
                continue;
            };
            let entry = event_to_entry(&run_id, &event);
            if let Ok(json) = serde_json::to_string(&entry) {
                let line = format!("{}\n", json);
                if let Err(e) = w.write_all(line.as_bytes()).await {
                    error!(error = %e, "Failed to write log entry");
                    writer = None;
                    continue;
                }
                if let Err(e) = w.flush().await {
                    error!(error = %e, "Failed to flush log");
                }
            }

            if matches!(
                event,
                EngineEvent::RunCompleted { .. }
                    | EngineEvent::RunFailed { .. }
                    | EngineEvent::RunCancelled { .. }
            ) {
                writer = None;
            }
        }

        if let Some(mut w) = writer {
            w.flush().await.ok();
        }
        debug!("RunLogger finished");
    }
}

fn event_to_entry(run_id: &str, event: &EngineEvent) -> LogEntry {
    let (event_type, node_id, detail) = match event {
        EngineEvent::RunStarted { input, .. } => (
            "run_started",
            None,
            Some(serde_json::json!({ "input": truncate_str(input, 500) })),
        ),
        EngineEvent::NodeStarted { node_id, node_type } => (
            "node_started",
            Some(node_id.clone()),
            Some(serde_json::json!({ "node_type": node_type })),
        ),
        EngineEvent::NodeCompleted {
            node_id,
            output,
            elapsed_ms,
        } => (
            "node_completed",
            Some(node_id.clone()),
            Some(serde_json::json!({
                "elapsed_ms": elapsed_ms,
                "output_preview": truncate_str(output, 200),
            })),
        ),
        EngineEvent::NodeFailed { node_id, error } => (
            "node_failed",
            Some(node_id.clone()),
            Some(serde_json::json!({ "error": error })),
        ),
        EngineEvent::ToolInvoked {
            node_id,
            tool_type,
            output,
        } => (
            "tool_invoked",
            Some(node_id.clone()),
            Some(serde_json::json!({
                "tool": tool_type,
                "is_error": output.is_error,
                "content_preview": truncate_str(&output.content, 200),
            })),
        ),
        EngineEvent::RunCompleted {
            final_output,
            steps,
            ..
        } => (
            "run_completed",
            None,
            Some(serde_json::json!({
                "steps": steps,
                "final_output": final_output.as_deref().map(|s| truncate_str(s, 500)),
            })),
        ),
        EngineEvent::RunFailed { error, .. } => (
            "run_failed",
            None,
            Some(serde_json::json!({ "error": error })),
        ),
        EngineEvent::RunCancelled { .. } => ("run_cancelled", None, None),
    };

    LogEntry {
        timestamp: Utc::now().to_rfc3339(),
        run_id: run_id.to_string(),
        event_type,
        node_id,
        detail,
    }
}

/// Truncate on a char boundary at or below `max_len` bytes.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
