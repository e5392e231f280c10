use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrandError {
    // Graph definition errors
    #[error("Invalid graph: {}", .0.join("; "))]
    InvalidGraph(Vec<String>),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Entry point not found: {0}")]
    EntryPointNotFound(String),

    // Shared memory errors
    #[error("Permission denied: node '{node}' may not {access} key '{key}'")]
    Permission {
        node: String,
        key: String,
        access: MemoryAccess,
    },

    // Condition sandbox errors (never surfaced by the engine)
    #[error("Condition rejected: {0}")]
    Sandbox(String),

    // Execution errors
    #[error("Node '{node}' failed after {attempts} attempt(s): {message}")]
    NodeFailed {
        node: String,
        attempts: u32,
        message: String,
    },

    #[error("Dead end at node '{node}': no outgoing edge was satisfied")]
    DeadEnd { node: String },

    #[error("Loop limit exceeded at node '{node}': {limit} ({value} > {max})")]
    LoopLimit {
        node: String,
        limit: LoopLimitKind,
        value: usize,
        max: usize,
    },

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool '{tool}' is not declared on node '{node}'")]
    ToolNotDeclared { tool: String, node: String },

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Node logic errors
    #[error("Node invocation failed: {0}")]
    Invocation(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timed out acquiring lock: {0}")]
    LockTimeout(String),

    // Runtime errors
    #[error("Run task failed: {0}")]
    RunTask(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which direction of Shared Memory access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccess {
    Read,
    Write,
}

impl std::fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Which loop ceiling a run exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopLimitKind {
    Iterations,
    ToolCallsPerTurn,
    HistorySize,
}

impl std::fmt::Display for LoopLimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iterations => write!(f, "max_iterations"),
            Self::ToolCallsPerTurn => write!(f, "max_tool_calls_per_turn"),
            Self::HistorySize => write!(f, "max_history_size"),
        }
    }
}

/// Error buckets reported in a failed `ExecutionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    GraphDefinition,
    Permission,
    Sandbox,
    NodeFailure,
    DeadEnd,
    LoopLimit,
    Infrastructure,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GraphDefinition => "graph definition error",
            Self::Permission => "permission error",
            Self::Sandbox => "condition rejected",
            Self::NodeFailure => "node failure",
            Self::DeadEnd => "dead end",
            Self::LoopLimit => "loop limit exceeded",
            Self::Infrastructure => "infrastructure error",
        };
        f.write_str(s)
    }
}

impl StrandError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidGraph(_) | Self::NodeNotFound(_) | Self::EntryPointNotFound(_) => {
                ErrorCategory::GraphDefinition
            }
            Self::Permission { .. } => ErrorCategory::Permission,
            Self::Sandbox(_) => ErrorCategory::Sandbox,
            Self::NodeFailed { .. }
            | Self::Invocation(_)
            | Self::ToolNotFound(_)
            | Self::ToolNotDeclared { .. }
            | Self::ToolExecution { .. }
            | Self::ToolTimeout { .. } => ErrorCategory::NodeFailure,
            Self::DeadEnd { .. } => ErrorCategory::DeadEnd,
            Self::LoopLimit { .. } => ErrorCategory::LoopLimit,
            Self::Config(_)
            | Self::ConfigNotFound(_)
            | Self::Storage(_)
            | Self::LockTimeout(_)
            | Self::RunTask(_)
            | Self::Io(_)
            | Self::Json(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Whether the engine may retry the node that produced this error.
    ///
    /// Permission errors are fatal to the run and never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Permission { .. } | Self::InvalidGraph(_) | Self::LoopLimit { .. }
        )
    }

    /// Human-readable message prefixed with the error category.
    pub fn report(&self) -> String {
        format!("{}: {}", self.category(), self)
    }
}

pub type Result<T> = std::result::Result<T, StrandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_names_category_and_node() {
        let err = StrandError::DeadEnd {
            node: "review".into(),
        };
        let report = err.report();
        assert!(report.starts_with("dead end:"));
        assert!(report.contains("review"));
    }

    #[test]
    fn test_permission_not_retryable() {
        let err = StrandError::Permission {
            node: "a".into(),
            key: "y".into(),
            access: MemoryAccess::Read,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Permission);
        assert!(err.to_string().contains("may not read key 'y'"));
    }

    #[test]
    fn test_loop_limit_distinct_from_node_failure() {
        let limit = StrandError::LoopLimit {
            node: "a".into(),
            limit: LoopLimitKind::Iterations,
            value: 11,
            max: 10,
        };
        let failed = StrandError::NodeFailed {
            node: "a".into(),
            attempts: 3,
            message: "boom".into(),
        };
        assert_ne!(limit.category(), failed.category());
        assert!(limit.report().contains("max_iterations"));
    }

    #[test]
    fn test_invalid_graph_joins_messages() {
        let err = StrandError::InvalidGraph(vec!["one".into(), "two".into()]);
        assert_eq!(err.to_string(), "Invalid graph: one; two");
    }
}
