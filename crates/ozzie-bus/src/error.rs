use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,
}
