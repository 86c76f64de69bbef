//! The closed set of tools a workflow can use, and how each one is
//! declared to the model and configured from a function call.

use serde_json::{json, Map, Value};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::types::{FunctionDeclaration, NativeCapability};

/// Where a tool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// Offered to the model as a built-in capability.
    Native,
    /// Direct HTTPS call to a Google API with the user's bearer token.
    GcpApi,
    /// Delegated to the remote automation bridge.
    Bridge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    GoogleSearch,
    CodeExecution,
    UrlContext,
    GoogleMaps,
    BigQuery,
    CloudStorage,
    Sheets,
    Gmail,
    Calendar,
    Drive,
}

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";

impl ToolKind {
    pub const ALL: [ToolKind; 10] = [
        Self::GoogleSearch,
        Self::CodeExecution,
        Self::UrlContext,
        Self::GoogleMaps,
        Self::BigQuery,
        Self::CloudStorage,
        Self::Sheets,
        Self::Gmail,
        Self::Calendar,
        Self::Drive,
    ];

    /// Parse a tool identifier as written in a tool node's config.
    pub fn from_id(id: &str) -> Result<Self> {
        let kind = match id.trim().to_ascii_lowercase().as_str() {
            "google_search" | "search" | "web_search" => Self::GoogleSearch,
            "code_execution" | "code" => Self::CodeExecution,
            "url_context" | "url_fetch" | "web_fetch" => Self::UrlContext,
            "google_maps" | "maps" => Self::GoogleMaps,
            "bigquery" => Self::BigQuery,
            "cloud_storage" | "gcs" => Self::CloudStorage,
            "sheets" | "google_sheets" | "spreadsheet" => Self::Sheets,
            "gmail" | "email" | "mail" => Self::Gmail,
            "calendar" | "google_calendar" => Self::Calendar,
            "drive" | "google_drive" => Self::Drive,
            _ => return Err(NodeflowError::ToolNotSupported(id.to_string())),
        };
        Ok(kind)
    }

    /// Canonical identifier, also sent to the bridge as `toolType`.
    pub fn id(&self) -> &'static str {
        match self {
            Self::GoogleSearch => "google_search",
            Self::CodeExecution => "code_execution",
            Self::UrlContext => "url_context",
            Self::GoogleMaps => "google_maps",
            Self::BigQuery => "bigquery",
            Self::CloudStorage => "cloud_storage",
            Self::Sheets => "sheets",
            Self::Gmail => "gmail",
            Self::Calendar => "calendar",
            Self::Drive => "drive",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::GoogleSearch => "Google Search",
            Self::CodeExecution => "Code Execution",
            Self::UrlContext => "URL Context",
            Self::GoogleMaps => "Google Maps",
            Self::BigQuery => "BigQuery",
            Self::CloudStorage => "Cloud Storage",
            Self::Sheets => "Google Sheets",
            Self::Gmail => "Gmail",
            Self::Calendar => "Google Calendar",
            Self::Drive => "Google Drive",
        }
    }

    pub fn category(&self) -> ToolCategory {
        match self {
            Self::GoogleSearch | Self::CodeExecution | Self::UrlContext | Self::GoogleMaps => {
                ToolCategory::Native
            }
            Self::BigQuery | Self::CloudStorage => ToolCategory::GcpApi,
            Self::Sheets | Self::Gmail | Self::Calendar | Self::Drive => ToolCategory::Bridge,
        }
    }

    pub fn native_capability(&self) -> Option<NativeCapability> {
        match self {
            Self::GoogleSearch => Some(NativeCapability::GoogleSearch),
            Self::CodeExecution => Some(NativeCapability::CodeExecution),
            Self::UrlContext => Some(NativeCapability::UrlContext),
            Self::GoogleMaps => Some(NativeCapability::GoogleMaps),
            _ => None,
        }
    }

    /// OAuth scope a held token must carry (GCP API tools only).
    pub fn required_scope(&self) -> Option<&'static str> {
        match self {
            Self::BigQuery => Some(BIGQUERY_SCOPE),
            Self::CloudStorage => Some(STORAGE_SCOPE),
            _ => None,
        }
    }

    /// Stable function name declared to the model.
    pub fn function_name(&self) -> Option<&'static str> {
        match self {
            Self::BigQuery => Some("run_bigquery_query"),
            Self::CloudStorage => Some("read_cloud_storage"),
            Self::Sheets => Some("manage_spreadsheet"),
            Self::Gmail => Some("send_email"),
            Self::Calendar => Some("manage_calendar"),
            Self::Drive => Some("manage_drive_files"),
            _ => None,
        }
    }

    pub fn from_function_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.function_name() == Some(name))
    }

    /// Function declaration for externally executed tools; `None` for native ones.
    pub fn declaration(&self) -> Option<FunctionDeclaration> {
        let (description, parameters) = match self {
            Self::BigQuery => (
                "Run a read-only SQL query in Google BigQuery and return the result rows.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Standard SQL query" },
                        "maxResults": { "type": "integer", "description": "Maximum rows to return (default 100)" }
                    },
                    "required": ["query"]
                }),
            ),
            Self::CloudStorage => (
                "List objects in a Google Cloud Storage bucket or read one object's contents.",
                json!({
                    "type": "object",
                    "properties": {
                        "action": { "type": "string", "enum": ["list", "read"] },
                        "bucket": { "type": "string", "description": "Bucket name" },
                        "object": { "type": "string", "description": "Object name (for read)" },
                        "prefix": { "type": "string", "description": "Name prefix filter (for list)" }
                    },
                    "required": ["bucket"]
                }),
            ),
            Self::Sheets => (
                "Read, append, update, or clear cells in a Google Sheets spreadsheet.",
                json!({
                    "type": "object",
                    "properties": {
                        "action": { "type": "string", "enum": ["read", "append", "update", "clear"] },
                        "spreadsheetId": { "type": "string" },
                        "range": { "type": "string", "description": "A1 notation, e.g. Sheet1!A1:C10" },
                        "values": {
                            "type": "array",
                            "description": "Rows of cell values for append/update",
                            "items": { "type": "array", "items": { "type": "string" } }
                        }
                    },
                    "required": ["action", "spreadsheetId"]
                }),
            ),
            Self::Gmail => (
                "Send an email from the user's Gmail account.",
                json!({
                    "type": "object",
                    "properties": {
                        "to": { "type": "string", "description": "Recipient address" },
                        "subject": { "type": "string" },
                        "body": { "type": "string", "description": "Plain-text body" },
                        "cc": { "type": "string" }
                    },
                    "required": ["to", "subject", "body"]
                }),
            ),
            Self::Calendar => (
                "Create, list, update, or delete events in the user's Google Calendar.",
                json!({
                    "type": "object",
                    "properties": {
                        "action": { "type": "string", "enum": ["create", "list", "update", "delete"] },
                        "title": { "type": "string" },
                        "start": { "type": "string", "description": "ISO 8601 start time" },
                        "end": { "type": "string", "description": "ISO 8601 end time" },
                        "eventId": { "type": "string", "description": "Required for update/delete" },
                        "description": { "type": "string" },
                        "maxResults": { "type": "integer" }
                    },
                    "required": ["action"]
                }),
            ),
            Self::Drive => (
                "List, read, or create files in the user's Google Drive.",
                json!({
                    "type": "object",
                    "properties": {
                        "action": { "type": "string", "enum": ["list", "read", "create"] },
                        "query": { "type": "string", "description": "Search query (for list)" },
                        "fileId": { "type": "string", "description": "File to read" },
                        "name": { "type": "string", "description": "Name of the file to create" },
                        "content": { "type": "string", "description": "Content of the file to create" }
                    },
                    "required": ["action"]
                }),
            ),
            _ => return None,
        };

        Some(FunctionDeclaration {
            name: self.function_name()?.to_string(),
            description: description.to_string(),
            parameters,
        })
    }
}

/// Translate a model function call's arguments into a tool config.
///
/// Deterministic per tool type. Unknown tool types fail with
/// `ToolNotSupported`; an `action` outside the tool's set fails with
/// `ToolExecution`.
pub fn map_args_to_config(tool_type: &str, args: &Value) -> Result<Map<String, Value>> {
    let kind = ToolKind::from_id(tool_type)?;
    let empty = Map::new();
    let args = args.as_object().unwrap_or(&empty);
    let mut config = Map::new();

    match kind {
        ToolKind::Gmail => {
            copy_keys(args, &mut config, &["to", "subject", "body", "cc"]);
        }
        ToolKind::Calendar => {
            let op = map_action(
                kind,
                args,
                "list",
                &[
                    ("create", "createEvent"),
                    ("list", "listEvents"),
                    ("update", "updateEvent"),
                    ("delete", "deleteEvent"),
                ],
            )?;
            config.insert("operation".into(), Value::String(op.into()));
            copy_keys(
                args,
                &mut config,
                &["title", "start", "end", "eventId", "description", "maxResults", "calendarId"],
            );
        }
        ToolKind::Sheets => {
            let op = map_action(
                kind,
                args,
                "read",
                &[
                    ("read", "readRange"),
                    ("append", "appendRows"),
                    ("update", "updateRange"),
                    ("clear", "clearRange"),
                ],
            )?;
            config.insert("operation".into(), Value::String(op.into()));
            copy_keys(args, &mut config, &["spreadsheetId", "range", "values", "sheetName"]);
        }
        ToolKind::Drive => {
            let op = map_action(
                kind,
                args,
                "list",
                &[("list", "listFiles"), ("read", "readFile"), ("create", "createFile")],
            )?;
            config.insert("operation".into(), Value::String(op.into()));
            copy_keys(
                args,
                &mut config,
                &["query", "fileId", "name", "content", "mimeType", "folderId"],
            );
        }
        ToolKind::BigQuery => {
            copy_keys(args, &mut config, &["query", "maxResults", "projectId"]);
        }
        ToolKind::CloudStorage => {
            let default = if args.contains_key("object") { "read" } else { "list" };
            let op = map_action(kind, args, default, &[("list", "list"), ("read", "read")])?;
            config.insert("action".into(), Value::String(op.into()));
            copy_keys(args, &mut config, &["bucket", "object", "prefix"]);
        }
        ToolKind::GoogleSearch
        | ToolKind::CodeExecution
        | ToolKind::UrlContext
        | ToolKind::GoogleMaps => {
            config = args.clone();
        }
    }

    Ok(config)
}

fn copy_keys(from: &Map<String, Value>, to: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(v) = from.get(*key).filter(|v| !v.is_null()) {
            to.insert((*key).to_string(), v.clone());
        }
    }
}

fn map_action(
    kind: ToolKind,
    args: &Map<String, Value>,
    default: &str,
    table: &[(&str, &'static str)],
) -> Result<&'static str> {
    let action = args
        .get("action")
        .and_then(Value::as_str)
        .map(|a| a.trim().to_ascii_lowercase())
        .unwrap_or_else(|| default.to_string());

    table
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, op)| *op)
        .ok_or_else(|| NodeflowError::ToolExecution {
            tool: kind.id().to_string(),
            message: format!(
                "unknown action '{}'; expected one of {}",
                action,
                table.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", ")
            ),
        })
}
