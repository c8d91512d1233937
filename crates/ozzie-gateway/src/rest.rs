use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app_state::AppState;

/// The read-only REST surface (§6.1.1): thin views over the same stores and
/// bus the WS hub uses, no additional write paths.
pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/sessions", get(list_sessions))
        .route("/api/tasks", get(list_tasks))
        .route("/api/events", get(list_events))
        .with_state(app)
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn list_sessions(State(app): State<AppState>) -> Json<Value> {
    let mut out = Vec::new();
    if let Ok(ids) = app.sessions.list().await {
        for id in ids {
            if let Ok(session) = app.sessions.get(&id).await {
                out.push(session);
            }
        }
    }
    Json(json!(out))
}

#[derive(Deserialize)]
struct TaskQuery {
    status: Option<String>,
}

async fn list_tasks(State(app): State<AppState>, Query(query): Query<TaskQuery>) -> Json<Value> {
    let mut out = Vec::new();
    if let Ok(ids) = app.tasks.list().await {
        for id in ids {
            if let Ok(task) = app.tasks.get(&id).await {
                if let Some(status) = &query.status {
                    let matches = serde_json::to_value(task.status).ok().and_then(|v| v.as_str().map(str::to_string)).as_deref() == Some(status.as_str());
                    if !matches {
                        continue;
                    }
                }
                out.push(task);
            }
        }
    }
    Json(json!(out))
}

#[derive(Deserialize)]
struct EventsQuery {
    n: Option<usize>,
}

async fn list_events(State(app): State<AppState>, Query(query): Query<EventsQuery>) -> Json<Value> {
    let events = app.bus.history(query.n.unwrap_or(100));
    Json(json!(events))
}
