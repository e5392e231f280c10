use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use strand_core::config::StorageConfig;
use strand_core::error::Result;
use strand_core::graph::GraphSpec;
use strand_core::traits::RunStore;
use strand_core::types::{RunId, RunRecord};

use crate::fs::{checked_id, read_json, write_atomic};
use crate::lock::LockFile;
use crate::recorder::JsonlDecisionRecorder;

/// JSON-file `RunStore`.
///
/// Run records are written under a per-run lock file, so two processes
/// saving the same run serialise instead of interleaving.
pub struct FileStore {
    root: PathBuf,
    lock_timeout: Duration,
    stale_after: Duration,
}

impl FileStore {
    /// Open (and create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in ["graphs", "runs", "decisions"] {
            std::fs::create_dir_all(root.join(sub))?;
        }
        debug!(root = %root.display(), "File store opened");
        Ok(Self {
            root,
            lock_timeout: Duration::from_secs(5),
            stale_after: Duration::from_secs(300),
        })
    }

    /// Open a store at `root` using the `[storage]` lock settings.
    pub fn from_config(root: impl Into<PathBuf>, config: &StorageConfig) -> Result<Self> {
        Ok(Self::open(root)?
            .with_lock_timeout(Duration::from_millis(config.lock_timeout_ms))
            .with_stale_after(Duration::from_secs(config.stale_lock_secs)))
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Decision recorder writing into this store's `decisions/` directory.
    pub fn decision_recorder(&self) -> JsonlDecisionRecorder {
        JsonlDecisionRecorder::new(self.root.join("decisions"))
    }

    fn graph_path(&self, graph_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("graphs")
            .join(format!("{}.json", checked_id(graph_id)?)))
    }

    fn run_path(&self, run_id: &RunId) -> Result<PathBuf> {
        Ok(self
            .root
            .join("runs")
            .join(format!("{}.json", checked_id(run_id.as_str())?)))
    }

    fn run_lock(&self, run_id: &RunId) -> Result<LockFile> {
        let path = self
            .root
            .join("runs")
            .join(format!("{}.lock", checked_id(run_id.as_str())?));
        Ok(LockFile::new(path)
            .with_timeout(self.lock_timeout)
            .with_stale_after(self.stale_after))
    }

    async fn save_run_locked(&self, record: RunRecord) -> Result<()> {
        let path = self.run_path(&record.run_id)?;
        let lock = self.run_lock(&record.run_id)?;
        let _guard = lock.acquire().await?;
        write_atomic(&path, serde_json::to_vec_pretty(&record)?)?;
        debug!(run_id = %record.run_id, status = %record.status, "Run saved");
        Ok(())
    }

    fn read_runs(&self) -> Result<Vec<RunRecord>> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(self.root.join("runs"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<RunRecord>(&path) {
                Ok(Some(record)) => runs.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run"),
            }
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }
}

impl RunStore for FileStore {
    fn save_graph(&self, graph: &GraphSpec) -> BoxFuture<'_, Result<()>> {
        let graph = graph.clone();
        Box::pin(async move {
            let path = self.graph_path(&graph.id)?;
            write_atomic(&path, serde_json::to_vec_pretty(&graph)?)?;
            debug!(graph_id = %graph.id, "Graph saved");
            Ok(())
        })
    }

    fn load_graph(&self, graph_id: &str) -> BoxFuture<'_, Result<Option<GraphSpec>>> {
        let path = self.graph_path(graph_id);
        Box::pin(async move { read_json(&path?) })
    }

    fn save_run(&self, record: &RunRecord) -> BoxFuture<'_, Result<()>> {
        let record = record.clone();
        Box::pin(self.save_run_locked(record))
    }

    fn load_run(&self, run_id: &RunId) -> BoxFuture<'_, Result<Option<RunRecord>>> {
        let path = self.run_path(run_id);
        Box::pin(async move { read_json(&path?) })
    }

    fn list_runs(&self) -> BoxFuture<'_, Result<Vec<RunRecord>>> {
        Box::pin(async move { self.read_runs() })
    }
}
