//! Filesystem persistence (§3, §4.2): one directory per entity under
//! `OzzieRoot`, atomic JSON metadata, append-only JSONL companions.

mod dirstore;
mod error;
mod model;
mod schedule_store;
mod session_store;
mod task_store;

pub use dirstore::Dirstore;
pub use error::StoreError;
pub use model::*;
pub use schedule_store::ScheduleStore;
pub use session_store::SessionStore;
pub use task_store::TaskStore;
