pub mod providers;
pub mod retry;

use nodeflow_core::config::ModelConfig;
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::ModelClient;

pub use providers::gemini::GeminiClient;
pub use retry::RetryingModel;

/// Create a model client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn ModelClient>> {
    match config.provider.as_str() {
        "gemini" | "google" => Ok(Box::new(GeminiClient::from_config(config))),
        other => Err(NodeflowError::Config(format!(
            "unsupported model provider: {}",
            other
        ))),
    }
}
