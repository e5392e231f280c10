//! Static workflow description: nodes, edges, entry points.
//!
//! These are pure data. Structural validation and execution live in
//! `strand-agent`; nothing here touches Shared Memory or runs a node.

pub mod edge;
pub mod node;
pub mod spec;

pub use edge::{EdgeCondition, EdgeSpec};
pub use node::{NodeSpec, NodeType};
pub use spec::{EntryPointSpec, GraphSpec, IsolationLevel, LoopConfig, TriggerType};
