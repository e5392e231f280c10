use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use strand_core::event::EventBus;
use strand_core::types::{ExecutionEvent, RunId};

/// JSONL run logger.
///
/// Subscribes to the EventBus and appends one JSON object per line to
/// `{log_dir}/{run_id}.jsonl`. Each line is flushed as it is written, so a
/// crash loses at most the event in flight.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
    only: Option<RunId>,
}

#[derive(Serialize)]
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
    /// `level` controls verbosity: 1 = run summary, 2 = per node,
    /// 3 = per edge and condition.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self {
            log_dir,
            level,
            only: None,
        }
    }

    /// Log a single run and stop once it pauses, completes or fails.
    pub fn only(mut self, run_id: RunId) -> Self {
        self.only = Some(run_id);
        self
    }

    pub fn log_path(&self, run_id: &RunId) -> PathBuf {
        self.log_dir.join(format!("{}.jsonl", run_id))
    }

    /// Run the logger until cancelled, the bus closes, or (with
    /// [`only`](Self::only)) the watched run stops.
    pub async fn run(self, event_bus: Arc<EventBus>, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, dir = %self.log_dir.display(), "Failed to create log directory");
            return;
        }
        info!(dir = %self.log_dir.display(), level = self.level, "RunLogger started");

        let mut rx = event_bus.subscribe();
        let mut writers: HashMap<RunId, BufWriter<File>> = HashMap::new();

        loop {
            // Drain buffered events before honouring cancellation.
            tokio::select! {
                biased;
                received = rx.recv() => {
                    let event = match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                            continue;
                        }
                        Err(RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    };

                    let run_id = event.run_id().clone();
                    if self.only.as_ref().is_some_and(|only| *only != run_id) {
                        continue;
                    }

                    if let Some(entry) = self.event_to_entry(&event) {
                        if let Err(e) = self.append(&mut writers, &run_id, &entry).await {
                            error!(run_id = %run_id, error = %e, "Failed to write log entry");
                        }
                    }

                    if event.is_final() {
                        if let Some(mut writer) = writers.remove(&run_id) {
                            writer.flush().await.ok();
                        }
                        if self.only.is_some() {
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
            }
        }

        for writer in writers.values_mut() {
            writer.flush().await.ok();
        }
        debug!("RunLogger finished");
    }

    async fn append(
        &self,
        writers: &mut HashMap<RunId, BufWriter<File>>,
        run_id: &RunId,
        entry: &LogEntry,
    ) -> std::io::Result<()> {
        if !writers.contains_key(run_id) {
            let file = open_append(&self.log_path(run_id)).await?;
            writers.insert(run_id.clone(), BufWriter::new(file));
        }
        let Some(writer) = writers.get_mut(run_id) else {
            return Ok(());
        };
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }

    /// Convert an event to a log entry, or `None` if filtered by level.
    fn event_to_entry(&self, event: &ExecutionEvent) -> Option<LogEntry> {
        let (level, event_type, node_id, detail) = match event {
            // L1: run summary
            ExecutionEvent::RunStarted {
                entry_point,
                node_id,
                ..
            } => (
                1,
                "run_started",
                Some(node_id),
                Some(serde_json::json!({ "entry_point": entry_point })),
            ),
            ExecutionEvent::RunPaused { node_id, .. } => (1, "run_paused", Some(node_id), None),
            ExecutionEvent::RunCompleted {
                steps,
                total_tokens,
                total_cost_usd,
                ..
            } => (
                1,
                "run_completed",
                None,
                Some(serde_json::json!({
                    "steps": steps,
                    "total_tokens": total_tokens,
                    "total_cost_usd": total_cost_usd,
                })),
            ),
            ExecutionEvent::RunFailed { error, .. } => (
                1,
                "run_failed",
                None,
                Some(serde_json::json!({ "error": error })),
            ),

            // L2: per node
            ExecutionEvent::NodeCompleted {
                node_id,
                success,
                attempts,
                latency_ms,
                ..
            } => (
                2,
                "node_completed",
                Some(node_id),
                Some(serde_json::json!({
                    "success": success,
                    "attempts": attempts,
                    "latency_ms": latency_ms,
                })),
            ),
            ExecutionEvent::NodeRetry {
                node_id,
                attempt,
                error,
                ..
            } => (
                2,
                "node_retry",
                Some(node_id),
                Some(serde_json::json!({ "attempt": attempt, "error": error })),
            ),

            // L3: per attempt, edge and condition
            ExecutionEvent::NodeStarted {
                node_id, attempt, ..
            } => (
                3,
                "node_started",
                Some(node_id),
                Some(serde_json::json!({ "attempt": attempt })),
            ),
            ExecutionEvent::EdgeTraversed {
                edge_id,
                source,
                target,
                ..
            } => (
                3,
                "edge_traversed",
                Some(source),
                Some(serde_json::json!({ "edge_id": edge_id, "target": target })),
            ),
            ExecutionEvent::ConditionError {
                edge_id,
                expr,
                error,
                ..
            } => (
                3,
                "condition_error",
                None,
                Some(serde_json::json!({
                    "edge_id": edge_id,
                    "expr": truncate_str(expr, 200),
                    "error": error,
                })),
            ),
        };

        if level > self.level {
            return None;
        }
        Some(LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id().to_string(),
            event_type,
            node_id: node_id.cloned(),
            detail,
        })
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
