use tracing::{debug, warn};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::types::ModelRequest;

use super::{HandlerContext, NodeOutcome};
use crate::graph::{ClassifierConfig, Node};

/// Reserved category for inputs that fit none of the configured ones.
pub const UNCLASSIFIED: &str = "Unclassified";
/// Output of a classifier that could not reach the model.
pub const CLASSIFIER_ERROR: &str = "Error";

/// Run a classifier node: one model call, then route on the matched category.
pub async fn run(
    ctx: &HandlerContext<'_>,
    node: &Node,
    config: &ClassifierConfig,
    input: &str,
) -> Result<NodeOutcome> {
    let mut request = ModelRequest::prompt(
        config
            .model
            .clone()
            .unwrap_or_else(|| ctx.defaults.model_id.clone()),
        build_prompt(config, input),
    );
    request.temperature = Some(0.0);

    let raw = match ctx.model.generate(request).await {
        Ok(response) => response.text,
        Err(e @ NodeflowError::ModelUnavailable(_)) => return Err(e),
        Err(e) => {
            warn!(node_id = %node.id, error = %e, "Classifier could not reach the model");
            return Ok(NodeOutcome::terminal(CLASSIFIER_ERROR));
        }
    };

    let category = match_category(&raw, &config.categories);
    debug!(node_id = %node.id, raw = %raw.trim(), category = %category, "Input classified");

    let next = ctx
        .graph
        .outgoing_edges(&node.id, Some(&category))
        .into_iter()
        .map(|e| e.target.clone())
        .collect();
    Ok(NodeOutcome::new(category, next))
}

fn build_prompt(config: &ClassifierConfig, input: &str) -> String {
    let mut prompt = String::new();
    if let Some(instructions) = config.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(instructions.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("Classify the input into exactly one of these categories:\n");
    for category in &config.categories {
        prompt.push_str(&format!("- {}\n", category));
    }
    prompt.push_str(&format!(
        "- {} (use only if no other category fits)\n",
        UNCLASSIFIED
    ));

    if !config.examples.is_empty() {
        prompt.push_str("\nExamples:\n");
        for example in &config.examples {
            prompt.push_str(&format!(
                "Input: {}\nCategory: {}\n\n",
                example.input, example.category
            ));
        }
    }

    prompt.push_str("\nRespond with the category name only, nothing else.\n\n");
    prompt.push_str(&format!("Input: {}\nCategory:", input));
    prompt
}

/// Case-insensitive match of the model's raw answer against the configured
/// categories. Returns the configured spelling, or `Unclassified`.
fn match_category(raw: &str, categories: &[String]) -> String {
    let answer = raw
        .trim()
        .trim_start_matches("Category:")
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c == '*')
        .trim();

    let answer = answer.to_lowercase();
    categories
        .iter()
        .find(|c| c.trim().to_lowercase() == answer)
        .cloned()
        .unwrap_or_else(|| UNCLASSIFIED.to_string())
}
