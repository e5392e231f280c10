//! Graph execution: validation, per-run Shared Memory, edge selection and
//! the step loop that drives one run from a start node to a stopping point.
//!
//! A graph is checked once by [`ValidatedGraph::new`]; the executor only
//! accepts the validated form.

pub mod executor;
pub mod memory;
pub mod routing;
pub mod validate;

pub use executor::{ExecutorSettings, GraphExecutor, RunStart};
pub use memory::{KeyScope, MemoryView, SharedMemory};
pub use routing::{condition_context, select_edge, should_traverse};
pub use validate::{ValidatedGraph, ValidationReport};
