use async_trait::async_trait;
use ozzie_store::Task;
use tokio_util::sync::CancellationToken;

/// Result of running (or resuming) one task to a stopping point (§4.6).
pub enum TaskOutcome {
    Completed { output: serde_json::Value, summary: String },
    /// The task hit a validation-request side channel and wants the mailbox
    /// protocol to take over.
    Suspended { summary: String },
    Failed { error: String, retryable: bool },
}

/// Supplied by the composition root (the gateway wires this to the session
/// runner's model-calling machinery); the pool itself only manages capacity,
/// scheduling, and persistence.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run(&self, task: &Task, cancel: CancellationToken) -> TaskOutcome;

    /// Resume a suspended task with mailbox feedback appended as a user
    /// message (§4.6).
    async fn resume(&self, task: &Task, feedback: serde_json::Value, cancel: CancellationToken) -> TaskOutcome;
}
