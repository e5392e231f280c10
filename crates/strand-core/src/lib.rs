pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, StrandError};
pub use event::EventBus;
pub use graph::{
    EdgeCondition, EdgeSpec, EntryPointSpec, GraphSpec, IsolationLevel, LoopConfig, NodeSpec,
    NodeType, TriggerType,
};
pub use types::*;
