use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use nodeflow_core::config::ModelConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::ModelClient;
use nodeflow_core::types::*;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini native API client.
pub struct GeminiClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
    default_model: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: ModelConfig::default().model_id,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let mut client = Self::new(config.api_key.clone());
        if let Some(ref url) = config.base_url {
            client.base_url = url.trim_end_matches('/').to_string();
        }
        client.default_model = config.model_id.clone();
        client
    }

    fn endpoint(&self, model: &str) -> String {
        let model = if model.is_empty() {
            self.default_model.as_str()
        } else {
            model
        };
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            model.trim_start_matches("models/")
        )
    }
}

// ── Request types ────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing)]
    thought: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFnCall>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiFnCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    function_declarations: Vec<GeminiFnDecl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    google_search: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_execution: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url_context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    google_maps: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct GeminiFnDecl {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// ── Response types ───────────────────────────────────────────────

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiErrorBody,
}

#[derive(Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    message: String,
}

// ── Conversion ───────────────────────────────────────────────────

fn text_content(role: Option<&str>, text: &str) -> GeminiContent {
    GeminiContent {
        role: role.map(str::to_string),
        parts: vec![GeminiPart {
            text: Some(text.to_string()),
            ..Default::default()
        }],
    }
}

fn build_request(request: &ModelRequest) -> GeminiRequest {
    let contents = request
        .contents
        .iter()
        .map(|turn| text_content(Some(turn.role.as_str()), &turn.content))
        .collect();

    let system_instruction = request
        .system_instruction
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| text_content(None, s));

    let mut tools = Vec::new();
    if !request.function_declarations.is_empty() {
        tools.push(GeminiTool {
            function_declarations: request
                .function_declarations
                .iter()
                .map(|d| GeminiFnDecl {
                    name: d.name.clone(),
                    description: d.description.clone(),
                    parameters: d.parameters.clone(),
                })
                .collect(),
            ..Default::default()
        });
    }
    for capability in &request.native_capabilities {
        let empty = Some(serde_json::json!({}));
        let tool = match capability {
            NativeCapability::GoogleSearch => GeminiTool {
                google_search: empty,
                ..Default::default()
            },
            NativeCapability::CodeExecution => GeminiTool {
                code_execution: empty,
                ..Default::default()
            },
            NativeCapability::UrlContext => GeminiTool {
                url_context: empty,
                ..Default::default()
            },
            NativeCapability::GoogleMaps => GeminiTool {
                google_maps: empty,
                ..Default::default()
            },
        };
        tools.push(tool);
    }

    GeminiRequest {
        contents,
        system_instruction,
        tools,
        generation_config: request.temperature.map(|t| GenerationConfig {
            temperature: Some(t),
        }),
    }
}

fn parse_response(body: GeminiResponse) -> ModelResponse {
    let mut text = String::new();
    let mut function_calls = Vec::new();

    if let Some(content) = body.candidates.into_iter().next().and_then(|c| c.content) {
        for part in content.parts {
            if part.thought {
                continue;
            }
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                function_calls.push(FunctionCall {
                    name: call.name,
                    args: call.args,
                });
            }
        }
    }

    ModelResponse {
        text,
        function_calls,
        tokens_used: body.usage_metadata.map(|u| u.total_token_count),
    }
}

/// Map a non-success HTTP status to the engine's model error kinds.
fn map_status_error(status: u16, body: &str) -> NodeflowError {
    let message = serde_json::from_str::<GeminiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(300).collect());

    match status {
        429 => NodeflowError::RateLimited(message),
        401 | 403 => NodeflowError::InvalidCredential(message),
        _ => NodeflowError::ModelError(format!("HTTP {}: {}", status, message)),
    }
}

impl ModelClient for GeminiClient {
    fn generate(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move {
            let api_key = self.api_key.as_deref().ok_or_else(|| {
                NodeflowError::ModelUnavailable("Gemini API key is not configured".into())
            })?;

            let url = self.endpoint(&request.model);
            let body = build_request(&request);

            debug!(
                model = %request.model,
                turns = request.contents.len(),
                functions = request.function_declarations.len(),
                "Calling Gemini"
            );

            let response = self
                .http
                .post(&url)
                .header("x-goog-api-key", api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        NodeflowError::ModelError("request to model backend timed out".into())
                    } else {
                        NodeflowError::ModelError(format!("could not reach model backend: {}", e))
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                let err = map_status_error(status.as_u16(), &body);
                warn!(status = status.as_u16(), error = %err, "Gemini request failed");
                return Err(err);
            }

            let parsed: GeminiResponse = response.json().await.map_err(|e| {
                NodeflowError::ModelError(format!("unreadable model response: {}", e))
            })?;

            Ok(parse_response(parsed))
        })
    }
}
