use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("schedule entry must declare exactly one trigger")]
    InvalidTrigger,
    #[error("interval_sec must be at least 5, got {0}")]
    IntervalTooShort(u64),
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("schedule store error: {0}")]
    Store(#[from] ozzie_store::StoreError),
    #[error("task pool error: {0}")]
    Task(#[from] ozzie_tasks::TaskError),
}
