use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Model backend: one request, one response.
pub trait ModelClient: Send + Sync + 'static {
    /// Issue a model call.
    ///
    /// Implementations must fail with `ModelUnavailable` before any network
    /// traffic when they hold no usable credential.
    fn generate(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>>;
}

/// Keyed string store supplied by the host (browser storage, SQLite, ...).
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>>>;

    fn set(&self, key: &str, value: String) -> BoxFuture<'_, Result<()>>;

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<()>>;
}

/// Remote execution venue for tools only the automation backend can run.
pub trait AutomationBridge: Send + Sync + 'static {
    /// Send `{token, action, payload}` and return the envelope's `data`.
    fn call(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Liveness check; succeeds when the bridge answers `"pong"`.
    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let data = self.call("ping", serde_json::Value::Null).await?;
            match data.as_str() {
                Some("pong") => Ok(()),
                _ => Err(crate::error::NodeflowError::BridgeUnreachable(format!(
                    "unexpected ping reply: {}",
                    data
                ))),
            }
        })
    }
}

/// Holder of the delegated access token for GCP-backed tools.
///
/// Read-only from the engine's perspective; acquisition and refresh belong
/// to the host.
pub trait AccessTokenSource: Send + Sync + 'static {
    fn access_token(&self) -> Option<AccessToken>;
}
