//! Tools the chat pipeline can hand to a model.
//!
//! The only family today is web navigation: `web_search` (Google
//! Programmable Search) and `web_read` (Tavily Extract), both configured
//! from one `web_navigate` tools row.

pub mod web_read;
pub mod web_search;

use parley_core::catalog::{ToolConfig, WEB_NAVIGATE};
use parley_core::tool::ToolRegistry;

pub use web_read::WebReadTool;
pub use web_search::WebSearchTool;

/// Build the web tool set from a `web_navigate` row. Disabled rows and rows
/// of another kind yield an empty registry. Missing keys still register the
/// tool; it then answers with a "not configured" error payload.
pub fn web_registry(config: &ToolConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    if !config.enabled || config.kind != WEB_NAVIGATE {
        return registry;
    }
    registry.register(Box::new(WebSearchTool::new(
        config.api_key.clone(),
        config.engine_id.clone(),
    )));
    registry.register(Box::new(WebReadTool::new(config.tavily_api_key.clone())));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> ToolConfig {
        ToolConfig {
            id: "t1".into(),
            kind: WEB_NAVIGATE.into(),
            name: "Web".into(),
            api_key: "g".into(),
            engine_id: "cx".into(),
            tavily_api_key: "tv".into(),
            enabled,
        }
    }

    #[test]
    fn enabled_row_registers_both_tools() {
        let registry = web_registry(&config(true));
        assert_eq!(registry.names(), vec!["web_read", "web_search"]);
    }

    #[test]
    fn disabled_or_foreign_rows_register_nothing() {
        assert!(web_registry(&config(false)).is_empty());
        let mut other = config(true);
        other.kind = "image_gen".into();
        assert!(web_registry(&other).is_empty());
    }
}
