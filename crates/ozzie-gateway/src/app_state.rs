use std::sync::{Arc, Mutex};

use ozzie_bus::EventBus;
use ozzie_scheduler::Scheduler;
use ozzie_session::SessionRunner;
use ozzie_store::{ScheduleStore, SessionStore, TaskStore};
use ozzie_tasks::ActorPool;
use ozzie_tools::{PermissionsMatrix, ToolRegistry};

/// Everything a WS connection or REST handler needs, cloned cheaply into
/// each `axum` handler the way `sven-gateway`'s `AgentHandle` is (§6.1).
#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    pub sessions: SessionStore,
    pub tasks: TaskStore,
    pub schedules: ScheduleStore,
    pub runner: Arc<SessionRunner>,
    pub pool: Arc<ActorPool>,
    pub scheduler: Arc<Scheduler>,
    pub tools: Arc<Mutex<ToolRegistry>>,
    pub permissions: Arc<Mutex<PermissionsMatrix>>,
}
