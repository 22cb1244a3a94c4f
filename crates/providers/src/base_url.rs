//! Normalization of user-entered provider base URLs.

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Resolve the chat API root for a provider.
///
/// Blank means OpenAI. Trailing slashes are dropped and `/v1` is appended
/// unless the URL already ends with it or has it as a path segment.
pub fn resolve_base_url(base_url: Option<&str>) -> String {
    let Some(raw) = base_url.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_OPENAI_BASE_URL.to_string();
    };
    let cleaned = raw.trim_end_matches('/');
    if cleaned.ends_with("/v1") || cleaned.contains("/v1/") {
        cleaned.to_string()
    } else {
        format!("{cleaned}/v1")
    }
}
