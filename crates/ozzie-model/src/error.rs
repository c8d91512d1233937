use serde::{Deserialize, Serialize};

/// The closed LLM-adapter error taxonomy (§6.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    ContextTooLong,
    ModelNotFound,
    Connection,
    Unknown,
}

impl ProviderErrorKind {
    /// Transport-class errors the task actor pool retries with backoff (§4.6, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection | Self::RateLimit)
    }
}

/// Classify a provider error by inspecting its text, the way the teacher's
/// adapters each do ad hoc at the call site — centralised here because the
/// core (not any concrete adapter) owns the taxonomy in this design.
pub fn classify_error(message: &str) -> ProviderErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("invalid api key") || lower.contains("401")
    {
        ProviderErrorKind::Auth
    } else if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests")
    {
        ProviderErrorKind::RateLimit
    } else if lower.contains("context") && (lower.contains("too long") || lower.contains("exceeds") || lower.contains("maximum context"))
    {
        ProviderErrorKind::ContextTooLong
    } else if lower.contains("model not found") || lower.contains("does not exist") || lower.contains("404")
    {
        ProviderErrorKind::ModelNotFound
    } else if lower.contains("connection")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("dns")
        || lower.contains("network")
    {
        ProviderErrorKind::Connection
    } else {
        ProviderErrorKind::Unknown
    }
}
