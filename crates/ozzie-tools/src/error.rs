use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("blocked destructive command ({reason})")]
    SandboxBlocked { reason: String },
    #[error("tool call denied")]
    Denied,
    #[error("confirmation timed out after {0}s")]
    ConfirmationTimeout(u64),
    #[error("plugin error: {0}")]
    Plugin(String),
}
