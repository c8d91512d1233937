use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("session store error: {0}")]
    Store(#[from] ozzie_store::StoreError),
    #[error("model provider error: {0}")]
    Provider(#[source] anyhow::Error),
}
