use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task store error: {0}")]
    Store(#[from] ozzie_store::StoreError),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task {0} is not suspended")]
    NotSuspended(String),
    #[error("dependency {0} did not complete")]
    DependencyNotCompleted(String),
    #[error("no unanswered mailbox request for task {0}")]
    NoPendingRequest(String),
}
