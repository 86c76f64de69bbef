use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use nodeflow_core::config::BridgeConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::AutomationBridge;

/// HTTP client for the remote automation bridge.
///
/// Every call is a single POST whose body is the JSON envelope
/// `{token, action, payload}` sent as `text/plain`, so browsers hosting the
/// same contract never trigger a CORS preflight.
pub struct HttpBridge {
    http: Client,
    url: String,
    token: String,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct BridgeRequest<'a> {
    token: &'a str,
    action: &'a str,
    payload: &'a Value,
}

#[derive(Deserialize, Debug)]
struct BridgeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpBridge {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("nodeflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NodeflowError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: config.url.clone(),
            token: config.token.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> NodeflowError {
        if e.is_timeout() {
            NodeflowError::BridgeTimeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            NodeflowError::BridgeUnreachable(e.to_string())
        }
    }
}

/// Turn a decoded bridge envelope into the call's result. `subject` names the
/// tool (or the action, for calls that carry no tool) in failure messages.
fn interpret_response(subject: &str, response: BridgeResponse) -> Result<Value> {
    if response.success {
        return Ok(response.data.unwrap_or(Value::Null));
    }

    let message = response
        .error
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| "bridge reported failure without a message".to_string());

    if message.to_ascii_lowercase().contains("unauthorized") {
        Err(NodeflowError::BridgeUnauthorized(message))
    } else {
        Err(NodeflowError::ToolExecution {
            tool: subject.to_string(),
            message,
        })
    }
}

impl AutomationBridge for HttpBridge {
    fn call(&self, action: &str, payload: Value) -> BoxFuture<'_, Result<Value>> {
        let action = action.to_string();
        Box::pin(async move {
            let envelope = BridgeRequest {
                token: &self.token,
                action: &action,
                payload: &payload,
            };
            let body = serde_json::to_string(&envelope)?;

            debug!(action = %action, "Calling automation bridge");

            let response = self
                .http
                .post(&self.url)
                .header("content-type", "text/plain;charset=utf-8")
                .body(body)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;

            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(NodeflowError::BridgeUnauthorized(format!("HTTP {}", status)));
            }
            if !status.is_success() {
                return Err(NodeflowError::BridgeUnreachable(format!("HTTP {}", status)));
            }

            let text = response.text().await.map_err(|e| self.map_send_error(e))?;
            let decoded: BridgeResponse = serde_json::from_str(&text).map_err(|_| {
                warn!(action = %action, "Bridge returned a non-JSON response");
                NodeflowError::BridgeUnreachable(
                    "bridge returned a non-JSON response; check that the deployment is published and accessible"
                        .into(),
                )
            })?;

            let subject = payload
                .get("toolType")
                .and_then(Value::as_str)
                .unwrap_or(action.as_str());
            interpret_response(subject, decoded)
        })
    }
}

/// Flatten a tool config for the bridge: nested objects become dotted keys,
/// nulls are dropped, arrays and scalars are kept as-is.
pub fn flatten_config(config: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(&mut out, None, config);
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, map: &Map<String, Value>) {
    for (key, value) in map {
        let full = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Null => {}
            Value::Object(inner) => flatten_into(out, Some(&full), inner),
            other => {
                out.insert(full, other.clone());
            }
        }
    }
}
