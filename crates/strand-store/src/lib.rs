//! File-backed persistence.
//!
//! Layout under the storage root:
//!
//! ```text
//! graphs/{graph_id}.json
//! runs/{run_id}.json
//! runs/{run_id}.lock
//! decisions/{run_id}.jsonl
//! ```

pub mod fs;
pub mod lock;
pub mod recorder;
pub mod store;

pub use lock::{LockFile, LockGuard};
pub use recorder::JsonlDecisionRecorder;
pub use store::FileStore;
