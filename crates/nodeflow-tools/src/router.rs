use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{AccessTokenSource, AutomationBridge, ModelClient};
use nodeflow_core::types::{ModelRequest, ToolInvocation, ToolOutput};

use crate::bridge::flatten_config;
use crate::catalog::{ToolCategory, ToolKind};
use crate::gcp::GcpApiClient;

/// Decides where a tool invocation runs and executes it there.
pub struct ToolRouter {
    model: Arc<dyn ModelClient>,
    model_id: String,
    bridge: Option<Arc<dyn AutomationBridge>>,
    tokens: Option<Arc<dyn AccessTokenSource>>,
    gcp: GcpApiClient,
}

impl ToolRouter {
    pub fn new(model: Arc<dyn ModelClient>, model_id: impl Into<String>) -> Self {
        Self {
            model,
            model_id: model_id.into(),
            bridge: None,
            tokens: None,
            gcp: GcpApiClient::new(None),
        }
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn AutomationBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn AccessTokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_gcp_project(mut self, project_id: Option<String>) -> Self {
        self.gcp = GcpApiClient::new(project_id);
        self
    }

    /// Execute a tool invocation, propagating every error.
    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let kind = ToolKind::from_id(&invocation.tool_type)?;
        debug!(tool = kind.id(), category = ?kind.category(), "Routing tool invocation");

        let content = match kind.category() {
            ToolCategory::Native => self.execute_native(kind, &invocation.config).await?,
            ToolCategory::GcpApi => self.execute_gcp(kind, &invocation.config).await?,
            ToolCategory::Bridge => self.execute_bridge(kind, &invocation.config).await?,
        };
        Ok(ToolOutput::success(content))
    }

    /// Execute a tool invocation, turning node-local failures into error text.
    ///
    /// Only run-fatal errors (e.g. a missing model credential) are returned as `Err`.
    pub async fn execute_recoverable(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        match self.execute(invocation).await {
            Ok(output) => Ok(output),
            Err(e) if e.is_recoverable() => {
                warn!(tool = %invocation.tool_type, kind = e.kind(), error = %e, "Tool failed");
                Ok(ToolOutput::error(format!("[{}] {}", e.kind(), e)))
            }
            Err(e) => Err(e),
        }
    }

    /// Category A outside an agent: one model call with the capability enabled.
    async fn execute_native(&self, kind: ToolKind, config: &Map<String, Value>) -> Result<String> {
        let capability = kind
            .native_capability()
            .ok_or_else(|| NodeflowError::ToolNotSupported(kind.id().to_string()))?;

        let prompt = native_prompt(kind, config);
        let mut request = ModelRequest::prompt(self.model_id.clone(), prompt);
        request.native_capabilities = vec![capability];

        let response = self.model.generate(request).await.map_err(|e| match e {
            NodeflowError::ModelUnavailable(_) => e,
            other => NodeflowError::ToolExecution {
                tool: kind.id().to_string(),
                message: other.to_string(),
            },
        })?;
        Ok(response.text)
    }

    async fn execute_gcp(&self, kind: ToolKind, config: &Map<String, Value>) -> Result<String> {
        let scope = kind.required_scope().unwrap_or_default();
        let token = self
            .tokens
            .as_ref()
            .and_then(|source| source.access_token())
            .filter(|t| t.is_valid_for(scope))
            .ok_or_else(|| NodeflowError::AuthRequired {
                tool: kind.id().to_string(),
                message: format!(
                    "connect a Google account and grant {} access ({}) to use this tool",
                    kind.display_name(),
                    scope
                ),
            })?;

        self.gcp.execute(kind, &token, config).await
    }

    async fn execute_bridge(&self, kind: ToolKind, config: &Map<String, Value>) -> Result<String> {
        let bridge = self.bridge.as_ref().ok_or_else(|| {
            NodeflowError::BridgeUnreachable("no automation bridge configured".into())
        })?;

        let payload = json!({
            "toolType": kind.id(),
            "config": Value::Object(flatten_config(config)),
        });
        let data = bridge.call("tool.execute", payload).await?;

        Ok(match data {
            Value::String(s) => s,
            Value::Null => format!("{} completed.", kind.display_name()),
            other => other.to_string(),
        })
    }
}

fn native_prompt(kind: ToolKind, config: &Map<String, Value>) -> String {
    let field = |key: &str| config.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());
    let input = field("input").unwrap_or_default();

    match kind {
        ToolKind::UrlContext => match field("url") {
            Some(url) if input.is_empty() => format!("Summarise the content of {}", url),
            Some(url) => format!("{}\n\nURL: {}", input, url),
            None => input.to_string(),
        },
        _ => match field("query").or(field("instructions")) {
            Some(extra) if input.is_empty() => extra.to_string(),
            Some(extra) => format!("{}\n\n{}", extra, input),
            None => input.to_string(),
        },
    }
}
