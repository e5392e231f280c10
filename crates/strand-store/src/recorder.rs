use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use strand_core::error::Result;
use strand_core::traits::DecisionRecorder;
use strand_core::types::{Decision, RunId};

use crate::fs::checked_id;

/// Appends each decision as a JSON line to `{dir}/{run_id}.jsonl`.
pub struct JsonlDecisionRecorder {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlDecisionRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: &RunId) -> Result<PathBuf> {
        Ok(self
            .dir
            .join(format!("{}.jsonl", checked_id(run_id.as_str())?)))
    }

    /// Decisions recorded for a run, oldest first. Unparseable lines are skipped.
    pub async fn read(&self, run_id: &RunId) -> Result<Vec<Decision>> {
        let path = self.path_for(run_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(decision) => Some(decision),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping bad decision line");
                    None
                }
            })
            .collect())
    }

    async fn append(&self, decision: Decision) -> Result<()> {
        let path = self.path_for(&decision.run_id)?;
        let mut line = serde_json::to_string(&decision)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

impl DecisionRecorder for JsonlDecisionRecorder {
    fn record(&self, decision: &Decision) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.append(decision.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::types::DecisionKind;

    fn edge(run: &RunId, step: usize, target: &str) -> Decision {
        Decision::new(
            run.clone(),
            step,
            DecisionKind::EdgeTraversed {
                edge_id: format!("a->{}", target),
                source: "a".into(),
                target: target.into(),
            },
        )
    }

    #[tokio::test]
    async fn test_appends_in_order_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonlDecisionRecorder::new(dir.path().join("decisions"));
        let run = RunId::from_string("r1");
        let other = RunId::from_string("r2");

        recorder.record(&edge(&run, 1, "b")).await.unwrap();
        recorder.record(&edge(&other, 1, "x")).await.unwrap();
        recorder.record(&edge(&run, 2, "c")).await.unwrap();

        let decisions = recorder.read(&run).await.unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0], edge_with_time(&decisions[0], &run, 1, "b"));
        assert_eq!(decisions[1].step, 2);
        assert_eq!(recorder.read(&other).await.unwrap().len(), 1);

        let raw = std::fs::read_to_string(recorder.path_for(&run).unwrap()).unwrap();
        let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["type"], "edge_traversed");
        assert_eq!(first["target"], "b");
    }

    fn edge_with_time(seen: &Decision, run: &RunId, step: usize, target: &str) -> Decision {
        let mut expected = edge(run, step, target);
        expected.timestamp = seen.timestamp;
        expected
    }

    #[tokio::test]
    async fn test_read_missing_run_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = JsonlDecisionRecorder::new(dir.path());
        assert!(recorder
            .read(&RunId::from_string("none"))
            .await
            .unwrap()
            .is_empty());
    }
}
