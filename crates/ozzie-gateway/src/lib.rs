//! WebSocket/REST hub and process bootstrap (§6.1, §6.1.1). Wires the bus,
//! stores, tool registry, session runner, task pool, and scheduler together
//! and serves them over a single loopback `axum` listener, the way
//! `sven-gateway::gateway::run` assembles its subsystems before blocking on
//! the HTTP server — stripped here of the P2P/Slack/TLS machinery this
//! system has no counterpart for.

mod app_state;
mod dispatch;
mod protocol;
mod rest;
mod task_executor;
mod ws;

pub use app_state::AppState;
pub use protocol::{Frame, FrameKind};
pub use task_executor::GatewayTaskExecutor;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::routing::get;
use axum::Router;
use ozzie_bus::EventBus;
use ozzie_config::GatewayConfig;
use ozzie_model::{MockProvider, ModelProvider};
use ozzie_scheduler::{Scheduler, SchedulerConfig as SchedulerLoopConfig};
use ozzie_session::{RunnerConfig, SessionRunner};
use ozzie_store::{ScheduleStore, SessionStore, TaskStore};
use ozzie_tasks::ActorPool;
use ozzie_tools::{builtin, PermissionsMatrix, ToolRegistry};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Assembles every subsystem against `root` (an `OzzieRoot` directory) and
/// serves the WS/REST hub on `config.bind_addr` until Ctrl+C.
///
/// Concrete network-backed `ModelProvider`s are out of scope (§6.2); the
/// gateway runs against [`MockProvider`] until an external collaborator
/// supplies a real adapter through this same trait.
pub async fn run(root: PathBuf, config: GatewayConfig) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&root).await.ok();

    let bus = EventBus::with_history_capacity(config.bus_history_capacity);
    let sessions = SessionStore::new(&root);
    let tasks = TaskStore::new(&root);
    let schedules = ScheduleStore::new(&root);

    let permissions = Arc::new(Mutex::new(PermissionsMatrix {
        global_auto_approve: config.tools.auto_approve_patterns.iter().cloned().collect(),
        ..Default::default()
    }));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(builtin::ReadFileTool));
    registry.register(Arc::new(builtin::WriteFileTool));
    // Interactive session dispatch never runs under a task's sandbox (§4.4.3
    // only applies to tasks); `register_guarded` still routes every call
    // through the publish/check/confirm protocol (§4.4.4).
    registry.register_guarded(Arc::new(builtin::ShellTool), bus.clone(), permissions.clone(), None, false);
    let tools = Arc::new(Mutex::new(registry));

    let provider: Arc<dyn ModelProvider> = Arc::new(MockProvider);

    let interactive_capacity = *config.provider_capacity.get("mock").unwrap_or(&4);
    let runner = Arc::new(SessionRunner::new(
        sessions.clone(),
        bus.clone(),
        provider.clone(),
        tools.clone(),
        Arc::new(Semaphore::new(interactive_capacity)),
        RunnerConfig {
            persona_prompt: String::new(),
            compaction_threshold_tokens: config.agent.max_context_tokens,
            compaction_keep_tail: config.agent.compaction_keep_recent,
            emergency_keep_last: config.agent.compaction_keep_recent,
            strategy: Default::default(),
        },
    ));

    let task_executor = Arc::new(GatewayTaskExecutor::new(provider.clone(), tools.clone(), bus.clone(), permissions.clone()));
    let pool = ActorPool::new(tasks.clone(), bus.clone(), task_executor, interactive_capacity);

    let scheduler = Scheduler::new(schedules.clone(), bus.clone(), pool.clone(), SchedulerLoopConfig::default());

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();
    if config.scheduler.enabled {
        handles.extend(scheduler.spawn(shutdown.clone()));
    }
    handles.push(spawn_dispatch_loop(pool.clone(), shutdown.clone()));

    let app = AppState { bus, sessions, tasks, schedules, runner, pool, scheduler, tools, permissions };

    let router = Router::new()
        .route("/api/ws", get(ws::ws_handler))
        .merge(rest::router(app.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(app);

    info!(bind = %config.bind_addr, "starting gateway");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    let serve = axum::serve(listener, router.into_make_service());
    tokio::select! {
        result = serve => result.map_err(anyhow::Error::from)?,
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }

    shutdown.cancel();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

/// Polls the actor pool's dependency-ready queue once a second, the same
/// cadence as the scheduler's interval loop (§4.6).
fn spawn_dispatch_loop(pool: Arc<ActorPool>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = pool.dispatch_ready().await {
                        tracing::warn!(error = %e, "task dispatch pass failed");
                    }
                }
            }
        }
    })
}
