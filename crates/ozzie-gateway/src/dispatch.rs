use std::sync::Mutex;

use ozzie_store::{Priority, Task, TaskConfig, TaskStatus};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app_state::AppState;

/// The method table (§6.1): one async handler per client → server `req`.
/// Each returns the `res` frame's `payload` on success, or the `error`
/// string to carry back verbatim.
pub async fn dispatch(app: &AppState, connection_session: &Mutex<Option<String>>, method: &str, params: Value) -> Result<Value, String> {
    match method {
        "open_session" => open_session(app, connection_session, params).await,
        "send_message" => send_message(app, connection_session, params).await,
        "prompt_response" => prompt_response(app, params).await,
        "submit_task" => submit_task(app, params).await,
        "check_task" => check_task(app, params).await,
        "cancel_task" => cancel_task(app, params).await,
        "reply_task" => reply_task(app, params).await,
        "list_tasks" => list_tasks(app, params).await,
        "accept_all_tools" => accept_all_tools(app, connection_session).await,
        other => Err(format!("unknown method: {other}")),
    }
}

async fn open_session(app: &AppState, connection_session: &Mutex<Option<String>>, params: Value) -> Result<Value, String> {
    let requested = params.get("session_id").and_then(Value::as_str).map(str::to_string);
    let (session_id, status) = match requested {
        Some(id) if app.sessions.get(&id).await.is_ok() => (id, "resumed"),
        Some(id) => {
            app.sessions.create(&id).await.map_err(|e| e.to_string())?;
            app.tools.lock().unwrap().start_session(&id);
            (id, "created")
        }
        None => {
            let id = format!("sess_{}", Uuid::new_v4());
            app.sessions.create(&id).await.map_err(|e| e.to_string())?;
            app.tools.lock().unwrap().start_session(&id);
            (id, "created")
        }
    };
    *connection_session.lock().unwrap() = Some(session_id.clone());
    Ok(json!({"session_id": session_id, "status": status}))
}

async fn send_message(app: &AppState, connection_session: &Mutex<Option<String>>, params: Value) -> Result<Value, String> {
    let session_id = connection_session.lock().unwrap().clone().ok_or("no session attached: call open_session first")?;
    let content = params.get("content").and_then(Value::as_str).ok_or("missing \"content\"")?.to_string();
    app.runner.handle_user_message(&session_id, content).await.map_err(|e| e.to_string())?;
    Ok(json!({"status": "sent"}))
}

async fn prompt_response(app: &AppState, params: Value) -> Result<Value, String> {
    use ozzie_bus::{Event, EventSource, EventType};
    let token = params.get("token").and_then(Value::as_str).ok_or("missing \"token\"")?;
    let cancelled = params.get("cancelled").and_then(Value::as_bool).unwrap_or(false);
    let value = params.get("value").cloned();
    app.bus
        .publish(Event::new(EventType::PromptResponse, EventSource::Ws, None, json!({"token": token, "cancelled": cancelled, "value": value})))
        .map_err(|e| e.to_string())?;
    Ok(json!({"status": "sent"}))
}

async fn submit_task(app: &AppState, params: Value) -> Result<Value, String> {
    let title = params.get("title").and_then(Value::as_str).unwrap_or("untitled task").to_string();
    let description = params.get("description").and_then(Value::as_str).unwrap_or_default().to_string();
    let id = format!("task_{}", Uuid::new_v4());
    let mut task = Task::new(id, title, description);
    task.session_id = params.get("session_id").and_then(Value::as_str).map(str::to_string);
    task.plan = params.get("plan").and_then(Value::as_str).map(str::to_string);
    if let Some(deps) = params.get("depends_on").and_then(Value::as_array) {
        task.depends_on = deps.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
    }
    if let Some(priority) = params.get("priority").and_then(Value::as_str) {
        task.priority = match priority {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Normal,
        };
    }
    if let Some(config) = params.get("config") {
        if let Ok(config) = serde_json::from_value::<TaskConfig>(config.clone()) {
            task.config = config;
        }
    }
    let task_id = task.id.clone();
    app.pool.submit(task).await.map_err(|e| e.to_string())?;
    Ok(json!({"task_id": task_id}))
}

async fn check_task(app: &AppState, params: Value) -> Result<Value, String> {
    let task_id = params.get("task_id").and_then(Value::as_str).ok_or("missing \"task_id\"")?;
    let task = app.tasks.get(task_id).await.map_err(|e| e.to_string())?;
    serde_json::to_value(task).map_err(|e| e.to_string())
}

async fn cancel_task(app: &AppState, params: Value) -> Result<Value, String> {
    let task_id = params.get("task_id").and_then(Value::as_str).ok_or("missing \"task_id\"")?;
    let reason = params.get("reason").and_then(Value::as_str).unwrap_or("cancelled by client");
    app.pool.cancel(task_id, reason).await.map_err(|e| e.to_string())?;
    Ok(json!({"status": "cancelled"}))
}

async fn reply_task(app: &AppState, params: Value) -> Result<Value, String> {
    let task_id = params.get("task_id").and_then(Value::as_str).ok_or("missing \"task_id\"")?;
    let feedback = params.get("feedback").cloned().unwrap_or(Value::Null);
    let status = params.get("status").and_then(Value::as_str).unwrap_or("approved");
    let content = json!({"status": status, "feedback": feedback});
    app.pool.reply_task(task_id, content).await.map_err(|e| e.to_string())?;
    Ok(json!({"status": "resumed"}))
}

async fn list_tasks(app: &AppState, params: Value) -> Result<Value, String> {
    let status_filter = params.get("status").and_then(Value::as_str).map(parse_status).transpose()?;
    let session_filter = params.get("session_id").and_then(Value::as_str);

    let mut out = Vec::new();
    for id in app.tasks.list().await.map_err(|e| e.to_string())? {
        let task = app.tasks.get(&id).await.map_err(|e| e.to_string())?;
        if let Some(status) = status_filter {
            if task.status != status {
                continue;
            }
        }
        if let Some(session_id) = session_filter {
            if task.session_id.as_deref() != Some(session_id) {
                continue;
            }
        }
        out.push(task);
    }
    serde_json::to_value(out).map_err(|e| e.to_string())
}

async fn accept_all_tools(app: &AppState, connection_session: &Mutex<Option<String>>) -> Result<Value, String> {
    let session_id = connection_session.lock().unwrap().clone().ok_or("no session attached: call open_session first")?;
    app.permissions.lock().unwrap().session_accept_all.insert(session_id, true);
    Ok(json!({"status": "ok"}))
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "running" => Ok(TaskStatus::Running),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        "suspended" => Ok(TaskStatus::Suspended),
        other => Err(format!("unknown task status: {other}")),
    }
}
