use base64::Engine as _;
use reqwest::{Client, Response};
use serde_json::{json, Map, Value};
use tracing::debug;

use nodeflow_core::config::GcpConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::AccessTokenSource;
use nodeflow_core::types::AccessToken;

use crate::catalog::ToolKind;

const BIGQUERY_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const STORAGE_BASE: &str = "https://storage.googleapis.com/storage/v1";
const MAX_OBJECT_CHARS: usize = 30_000;
const MAX_BINARY_PREVIEW: usize = 4_096;

/// Token source holding one pre-acquired token.
pub struct StaticTokenSource {
    token: Option<AccessToken>,
}

impl StaticTokenSource {
    pub fn new(token: Option<AccessToken>) -> Self {
        Self { token }
    }

    pub fn from_config(config: &GcpConfig) -> Self {
        Self::new(config.to_token())
    }
}

impl AccessTokenSource for StaticTokenSource {
    fn access_token(&self) -> Option<AccessToken> {
        self.token.clone()
    }
}

/// Bearer-token client for the GCP-backed tools.
pub struct GcpApiClient {
    http: Client,
    project_id: Option<String>,
}

impl GcpApiClient {
    pub fn new(project_id: Option<String>) -> Self {
        Self {
            http: Client::new(),
            project_id,
        }
    }

    /// Execute a GCP API tool with an already validated token.
    pub async fn execute(
        &self,
        kind: ToolKind,
        token: &AccessToken,
        config: &Map<String, Value>,
    ) -> Result<String> {
        match kind {
            ToolKind::BigQuery => self.bigquery_query(token, config).await,
            ToolKind::CloudStorage => self.cloud_storage(token, config).await,
            other => Err(NodeflowError::ToolNotSupported(format!(
                "{} is not a GCP API tool",
                other.id()
            ))),
        }
    }

    async fn bigquery_query(&self, token: &AccessToken, config: &Map<String, Value>) -> Result<String> {
        let tool = ToolKind::BigQuery;
        let query = required_str(tool, config, "query")?;
        let project = config
            .get("projectId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.project_id.clone())
            .ok_or_else(|| NodeflowError::ToolExecution {
                tool: tool.id().into(),
                message: "no projectId given and no default GCP project configured".into(),
            })?;
        let max_results = config.get("maxResults").and_then(Value::as_u64).unwrap_or(100);

        debug!(project = %project, "Running BigQuery query");

        let response = self
            .http
            .post(format!("{}/projects/{}/queries", BIGQUERY_BASE, project))
            .bearer_auth(&token.token)
            .json(&json!({
                "query": query,
                "useLegacySql": false,
                "maxResults": max_results,
                "timeoutMs": 30_000
            }))
            .send()
            .await
            .map_err(|e| transport_error(tool, e))?;

        let body: Value = check_status(tool, response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(tool, e))?;

        Ok(format_bigquery_rows(&body))
    }

    async fn cloud_storage(&self, token: &AccessToken, config: &Map<String, Value>) -> Result<String> {
        let tool = ToolKind::CloudStorage;
        let bucket = required_str(tool, config, "bucket")?;
        let action = config.get("action").and_then(Value::as_str).unwrap_or("list");

        if action == "read" {
            let object = required_str(tool, config, "object")?;
            let url = format!(
                "{}/b/{}/o/{}?alt=media",
                STORAGE_BASE,
                urlencoding::encode(bucket),
                urlencoding::encode(object)
            );
            let response = self
                .http
                .get(url)
                .bearer_auth(&token.token)
                .send()
                .await
                .map_err(|e| transport_error(tool, e))?;
            let bytes = check_status(tool, response)
                .await?
                .bytes()
                .await
                .map_err(|e| transport_error(tool, e))?;
            return Ok(describe_object(&bytes));
        }

        let mut url = format!(
            "{}/b/{}/o?maxResults=100",
            STORAGE_BASE,
            urlencoding::encode(bucket)
        );
        if let Some(prefix) = config.get("prefix").and_then(Value::as_str) {
            url.push_str(&format!("&prefix={}", urlencoding::encode(prefix)));
        }
        let response = self
            .http
            .get(url)
            .bearer_auth(&token.token)
            .send()
            .await
            .map_err(|e| transport_error(tool, e))?;
        let body: Value = check_status(tool, response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(tool, e))?;

        let names: Vec<String> = body["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| {
                        let name = i["name"].as_str()?;
                        let size = i["size"].as_str().unwrap_or("?");
                        Some(format!("{} ({} bytes)", name, size))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if names.is_empty() {
            Ok(format!("No objects found in gs://{}", bucket))
        } else {
            Ok(names.join("\n"))
        }
    }
}

fn required_str<'a>(tool: ToolKind, config: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| NodeflowError::ToolExecution {
            tool: tool.id().into(),
            message: format!("missing required argument '{}'", key),
        })
}

fn transport_error(tool: ToolKind, e: reqwest::Error) -> NodeflowError {
    NodeflowError::ToolExecution {
        tool: tool.id().into(),
        message: format!("request to {} failed: {}", tool.display_name(), e),
    }
}

async fn check_status(tool: ToolKind, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status));

    if status.as_u16() == 401 || status.as_u16() == 403 {
        Err(NodeflowError::AuthRequired {
            tool: tool.id().into(),
            message: format!(
                "Google rejected the access token ({}). Reconnect your Google account and grant {} access.",
                message,
                tool.display_name()
            ),
        })
    } else {
        Err(NodeflowError::ToolExecution {
            tool: tool.id().into(),
            message,
        })
    }
}

/// Render a BigQuery `queries` response as a JSON array of row objects.
fn format_bigquery_rows(body: &Value) -> String {
    let fields: Vec<&str> = body["schema"]["fields"]
        .as_array()
        .map(|f| f.iter().filter_map(|f| f["name"].as_str()).collect())
        .unwrap_or_default();

    let rows: Vec<Value> = body["rows"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    let mut obj = Map::new();
                    if let Some(cells) = row["f"].as_array() {
                        for (name, cell) in fields.iter().zip(cells) {
                            obj.insert((*name).to_string(), cell["v"].clone());
                        }
                    }
                    Value::Object(obj)
                })
                .collect()
        })
        .unwrap_or_default();

    if rows.is_empty() {
        return "Query returned no rows.".to_string();
    }
    Value::Array(rows).to_string()
}

fn describe_object(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if text.chars().count() > MAX_OBJECT_CHARS => {
            let truncated: String = text.chars().take(MAX_OBJECT_CHARS).collect();
            format!("{}\n\n[truncated at {} chars]", truncated, MAX_OBJECT_CHARS)
        }
        Ok(text) => text.to_string(),
        Err(_) => {
            let preview = &bytes[..bytes.len().min(MAX_BINARY_PREVIEW)];
            format!(
                "Binary object ({} bytes). Base64 preview: {}",
                bytes.len(),
                base64::engine::general_purpose::STANDARD.encode(preview)
            )
        }
    }
}
