pub mod graph;
pub mod invoker;
pub mod run_log;
pub mod runtime;
pub mod sandbox;

pub use graph::{
    GraphExecutor, KeyScope, MemoryView, SharedMemory, ValidatedGraph, ValidationReport,
};
pub use invoker::{FunctionRegistry, NodeContext, NodeInvoker, NodeRouter, ScriptedInvoker};
pub use run_log::RunLogger;
pub use runtime::{GraphRuntime, RunHandle, TriggerRequest};
pub use sandbox::Sandbox;
