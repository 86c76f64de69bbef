pub mod bridge;
pub mod catalog;
pub mod gcp;
pub mod router;

pub use bridge::{flatten_config, HttpBridge};
pub use catalog::{map_args_to_config, ToolCategory, ToolKind};
pub use gcp::{GcpApiClient, StaticTokenSource};
pub use router::ToolRouter;
