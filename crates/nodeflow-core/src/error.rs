use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeflowError {
    // Graph errors
    #[error("Workflow graph invalid: {0}")]
    GraphInvalid(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Run exceeded the iteration limit ({0}); the workflow probably contains a cycle")]
    RunLoopExceeded(usize),

    #[error("Run cancelled")]
    Cancelled,

    // Memory errors
    #[error("Conversation memory unavailable: {0}")]
    MemoryUnavailable(String),

    // Tool errors
    #[error("Tool not supported: {0}")]
    ToolNotSupported(String),

    #[error("Authorization required for {tool}: {message}")]
    AuthRequired { tool: String, message: String },

    #[error("Automation bridge unreachable: {0}")]
    BridgeUnreachable(String),

    #[error("Automation bridge rejected the token: {0}")]
    BridgeUnauthorized(String),

    #[error("Automation bridge timed out after {timeout_secs}s")]
    BridgeTimeout { timeout_secs: u64 },

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    // Model errors
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model rate limited: {0}")]
    RateLimited(String),

    #[error("Model credential rejected: {0}")]
    InvalidCredential(String),

    #[error("Model request failed: {0}")]
    ModelError(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeflowError {
    /// Whether a caller may reasonably retry the failed operation.
    ///
    /// The engine itself never retries; this flag is for hosts that
    /// implement their own retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::BridgeTimeout { .. } | Self::BridgeUnreachable(_)
        )
    }

    /// Whether the error is node-local: the owning handler converts it into
    /// output text and the run continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MemoryUnavailable(_)
                | Self::ToolNotSupported(_)
                | Self::AuthRequired { .. }
                | Self::BridgeUnreachable(_)
                | Self::BridgeUnauthorized(_)
                | Self::BridgeTimeout { .. }
                | Self::ToolExecution { .. }
        )
    }

    /// Stable, machine-readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GraphInvalid(_) => "GraphInvalid",
            Self::NodeNotFound(_) => "NotFound",
            Self::RunLoopExceeded(_) => "RunLoopExceeded",
            Self::Cancelled => "Cancelled",
            Self::MemoryUnavailable(_) => "MemoryUnavailable",
            Self::ToolNotSupported(_) => "ToolNotSupported",
            Self::AuthRequired { .. } => "AuthRequired",
            Self::BridgeUnreachable(_) => "BridgeUnreachable",
            Self::BridgeUnauthorized(_) => "BridgeUnauthorized",
            Self::BridgeTimeout { .. } => "BridgeTimeout",
            Self::ToolExecution { .. } => "ToolExecution",
            Self::ModelUnavailable(_) => "ModelUnavailable",
            Self::RateLimited(_) => "RateLimited",
            Self::InvalidCredential(_) => "InvalidCredential",
            Self::ModelError(_) => "ModelError",
            Self::Config(_) => "Config",
            Self::ConfigNotFound(_) => "ConfigNotFound",
            Self::Database(_) => "Database",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeflowError>;
