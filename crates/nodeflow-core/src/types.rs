use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one engine run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// A single turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// Capabilities the model backend runs itself, enabled per call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NativeCapability {
    GoogleSearch,
    CodeExecution,
    UrlContext,
    GoogleMaps,
}

/// A function the model may ask the engine to execute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the function's parameters.
    pub parameters: serde_json::Value,
}

/// A function call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A single model invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    pub model: String,
    /// Conversation history followed by the current prompt.
    pub contents: Vec<ConversationTurn>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub function_declarations: Vec<FunctionDeclaration>,
    #[serde(default)]
    pub native_capabilities: Vec<NativeCapability>,
}

impl ModelRequest {
    /// A plain single-prompt request.
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            contents: vec![ConversationTurn::user(prompt)],
            system_instruction: None,
            temperature: None,
            function_declarations: vec![],
            native_capabilities: vec![],
        }
    }

    /// Text of the last user turn, if any.
    pub fn last_prompt(&self) -> Option<&str> {
        self.contents
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }
}

/// The model's answer to a `ModelRequest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_calls: vec![],
            tokens_used: None,
        }
    }

    pub fn with_calls(calls: Vec<FunctionCall>) -> Self {
        Self {
            text: String::new(),
            function_calls: calls,
            tokens_used: None,
        }
    }
}

/// A tool execution request, built by the agent and tool handlers.
///
/// Transient: never persisted.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_type: String,
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Delegated user credential for GCP-backed tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Whether the token is non-empty, unexpired, and grants `scope`.
    ///
    /// The `cloud-platform` scope grants every GCP scope.
    pub fn is_valid_for(&self, scope: &str) -> bool {
        if self.token.trim().is_empty() {
            return false;
        }
        if self.expires_at.is_some_and(|exp| exp <= Utc::now()) {
            return false;
        }
        self.scopes
            .iter()
            .any(|s| s == scope || s.ends_with("/auth/cloud-platform"))
    }
}

/// Engine event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Run started.
    RunStarted { run_id: RunId, input: String },
    /// A node activation started.
    NodeStarted { node_id: String, node_type: String },
    /// A node activation finished.
    NodeCompleted {
        node_id: String,
        output: String,
        elapsed_ms: u64,
    },
    /// A node activation failed fatally.
    NodeFailed { node_id: String, error: String },
    /// A tool was executed on behalf of a node.
    ToolInvoked {
        node_id: String,
        tool_type: String,
        output: ToolOutput,
    },
    /// Run completed.
    RunCompleted {
        run_id: RunId,
        final_output: Option<String>,
        steps: usize,
    },
    /// Run failed.
    RunFailed { run_id: RunId, error: String },
    /// Run cancelled before completion.
    RunCancelled { run_id: RunId },
}
