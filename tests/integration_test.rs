//! End-to-end scenarios across the session runner, task pool, and bus,
//! exercised at the component level rather than over the WS/HTTP surface —
//! deterministic and free of real network binding.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ozzie_bus::{Event, EventBus, EventSource, EventType};
use ozzie_model::{ModelProvider, ResponseEvent, ScriptedMockProvider};
use ozzie_session::{RunnerConfig, SessionRunner};
use ozzie_store::{MessageRole, Priority, SessionStore, Task, TaskConfig, TaskStatus, TaskStore};
use ozzie_tasks::{ActorPool, TaskExecutor, TaskOutcome};
use ozzie_tools::ToolRegistry;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

fn runner(dir: &std::path::Path, bus: EventBus, provider: Arc<dyn ModelProvider>) -> SessionRunner {
    SessionRunner::new(
        SessionStore::new(dir),
        bus,
        provider,
        Arc::new(Mutex::new(ToolRegistry::new())),
        Arc::new(Semaphore::new(4)),
        RunnerConfig::default(),
    )
}

// ── S1: happy path — one user message produces one streamed turn ───────────

#[tokio::test]
async fn happy_path_turn_streams_and_persists_two_messages() {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    let (_id, mut events) = bus.subscribe(Some(vec![EventType::AssistantStream, EventType::AssistantMessage]));
    let provider = Arc::new(ScriptedMockProvider::always_text("hello there"));
    let runner = runner(dir.path(), bus, provider);

    runner.handle_user_message("sess_1", "hi".into()).await.unwrap();

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event.event_type {
            EventType::AssistantStream => phases.push(event.payload["phase"].as_str().unwrap().to_string()),
            EventType::AssistantMessage => phases.push("message".into()),
            _ => {}
        }
    }
    assert_eq!(phases, vec!["start", "delta", "end", "message"]);

    let session = SessionStore::new(dir.path()).get("sess_1").await.unwrap();
    assert_eq!(session.message_count, 2);
    let messages = SessionStore::new(dir.path()).messages("sess_1").await.unwrap();
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "hello there");
}

// ── S3: single-flight — concurrent sends to the same session collapse ──────

#[tokio::test]
async fn concurrent_messages_to_same_session_run_a_single_turn() {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    // A provider that takes a moment to respond, so both calls overlap.
    let provider = Arc::new(SlowProvider);
    let runner = Arc::new(runner(dir.path(), bus, provider));

    let r1 = runner.clone();
    let r2 = runner.clone();
    let (res1, res2) = tokio::join!(
        r1.handle_user_message("sess_2", "first".into()),
        r2.handle_user_message("sess_2", "second".into()),
    );
    res1.unwrap();
    res2.unwrap();

    let messages = SessionStore::new(dir.path()).messages("sess_2").await.unwrap();
    // Exactly one of the two sends ran a turn (user + assistant); the other
    // was dropped because a turn was already in flight.
    assert_eq!(messages.len(), 2);
}

struct SlowProvider;

#[async_trait]
impl ModelProvider for SlowProvider {
    fn name(&self) -> &str {
        "slow-mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }
    async fn complete(&self, _req: ozzie_model::CompletionRequest) -> anyhow::Result<ozzie_model::ResponseStream> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let events: Vec<anyhow::Result<ResponseEvent>> = vec![Ok(ResponseEvent::TextDelta("done".into())), Ok(ResponseEvent::Done)];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

// ── S4: task dependency order ───────────────────────────────────────────────

struct RecordingExecutor {
    order: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn run(&self, task: &Task, _cancel: CancellationToken) -> TaskOutcome {
        self.order.lock().unwrap().push(task.id.clone());
        TaskOutcome::Completed { output: json!({}), summary: format!("{} done", task.id) }
    }
    async fn resume(&self, task: &Task, _feedback: serde_json::Value, _cancel: CancellationToken) -> TaskOutcome {
        self.order.lock().unwrap().push(task.id.clone());
        TaskOutcome::Completed { output: json!({}), summary: format!("{} resumed", task.id) }
    }
}

#[tokio::test]
async fn tasks_complete_in_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let pool = ActorPool::new(TaskStore::new(dir.path()), EventBus::new(), Arc::new(RecordingExecutor { order: order.clone() }), 4);

    let t1 = Task::new("t1", "first", "");
    let mut t2 = Task::new("t2", "second", "");
    t2.depends_on = vec!["t1".into()];
    let mut t3 = Task::new("t3", "third", "");
    t3.depends_on = vec!["t1".into(), "t2".into()];

    // Submitted out of dependency order: the pool must still sequence them.
    pool.submit(t3).await.unwrap();
    pool.submit(t2).await.unwrap();
    pool.submit(t1).await.unwrap();

    for _ in 0..10 {
        pool.dispatch_ready().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        if order.lock().unwrap().len() == 3 {
            break;
        }
    }

    assert_eq!(*order.lock().unwrap(), vec!["t1".to_string(), "t2".to_string(), "t3".to_string()]);
    let store = TaskStore::new(dir.path());
    for id in ["t1", "t2", "t3"] {
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Completed);
    }
}

// ── S5: suspend & resume ────────────────────────────────────────────────────

struct SuspendOnce {
    resumed_with: Arc<Mutex<Option<serde_json::Value>>>,
}

#[async_trait]
impl TaskExecutor for SuspendOnce {
    async fn run(&self, _task: &Task, _cancel: CancellationToken) -> TaskOutcome {
        TaskOutcome::Suspended { summary: "needs approval".into() }
    }
    async fn resume(&self, _task: &Task, feedback: serde_json::Value, _cancel: CancellationToken) -> TaskOutcome {
        *self.resumed_with.lock().unwrap() = Some(feedback);
        TaskOutcome::Completed { output: json!({}), summary: "approved and done".into() }
    }
}

#[tokio::test]
async fn suspended_task_resumes_with_reply_feedback() {
    let dir = tempfile::tempdir().unwrap();
    let resumed_with = Arc::new(Mutex::new(None));
    let pool = ActorPool::new(
        TaskStore::new(dir.path()),
        EventBus::new(),
        Arc::new(SuspendOnce { resumed_with: resumed_with.clone() }),
        4,
    );

    let mut task = Task::new("t5", "needs a human", "");
    task.config = TaskConfig::default();
    task.priority = Priority::Normal;
    pool.submit(task).await.unwrap();
    pool.dispatch_ready().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let store = TaskStore::new(dir.path());
    let suspended = store.get("t5").await.unwrap();
    assert_eq!(suspended.status, TaskStatus::Suspended);
    assert!(suspended.waiting_for_reply);
    let mailbox = store.mailbox("t5").await.unwrap();
    assert_eq!(mailbox.len(), 1);

    pool.reply_task("t5", json!({"status": "approved", "feedback": "go"})).await.unwrap();
    pool.dispatch_ready().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let completed = store.get("t5").await.unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    let fed_back = resumed_with.lock().unwrap().clone().expect("resume must have run");
    assert_eq!(fed_back["feedback"], json!("go"));

    let mailbox = store.mailbox("t5").await.unwrap();
    let request_token = mailbox.iter().find(|m| matches!(m.kind, ozzie_store::MailboxMessageType::Request)).unwrap().token.clone();
    let response_token = mailbox.iter().find(|m| matches!(m.kind, ozzie_store::MailboxMessageType::Response)).unwrap().token.clone();
    assert_eq!(request_token, response_token);
}

// ── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelling_a_pending_task_prevents_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let pool = ActorPool::new(TaskStore::new(dir.path()), EventBus::new(), Arc::new(RecordingExecutor { order: order.clone() }), 4);

    let task = Task::new("t6", "cancel me", "");
    pool.submit(task).await.unwrap();
    pool.cancel("t6", "no longer needed").await.unwrap();
    pool.dispatch_ready().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(order.lock().unwrap().is_empty());
    let store = TaskStore::new(dir.path());
    assert_eq!(store.get("t6").await.unwrap().status, TaskStatus::Cancelled);
}

struct CancelAwareExecutor;

#[async_trait]
impl TaskExecutor for CancelAwareExecutor {
    async fn run(&self, _task: &Task, cancel: CancellationToken) -> TaskOutcome {
        cancel.cancelled().await;
        TaskOutcome::Failed { error: "cancelled".into(), retryable: false }
    }
    async fn resume(&self, _task: &Task, _feedback: serde_json::Value, _cancel: CancellationToken) -> TaskOutcome {
        TaskOutcome::Completed { output: json!({}), summary: "resumed".into() }
    }
}

#[tokio::test]
async fn cancelling_a_running_task_does_not_flip_it_back_to_failed() {
    let dir = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    let (_id, mut events) = bus.subscribe(Some(vec![EventType::TaskCompleted, EventType::TaskCancelled]));
    let pool = ActorPool::new(TaskStore::new(dir.path()), bus, Arc::new(CancelAwareExecutor), 4);

    let task = Task::new("t7", "cancel while running", "");
    pool.submit(task).await.unwrap();
    pool.dispatch_ready().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.cancel("t7", "no longer needed").await.unwrap();
    // Give the executor's `cancel.cancelled()` wakeup and `apply_outcome` a
    // chance to run and (incorrectly, if the race isn't guarded) overwrite
    // the status.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let store = TaskStore::new(dir.path());
    assert_eq!(store.get("t7").await.unwrap().status, TaskStatus::Cancelled);

    let mut saw_completed = false;
    let mut saw_cancelled = false;
    while let Ok(event) = events.try_recv() {
        match event.event_type {
            EventType::TaskCompleted => saw_completed = true,
            EventType::TaskCancelled => saw_cancelled = true,
            _ => {}
        }
    }
    assert!(saw_cancelled, "expected task.cancelled to be published");
    assert!(!saw_completed, "task.completed must not be published for a cancelled task");
}

// ── Bus fan-out scoping (used by the WS hub to route events per session) ───

#[tokio::test]
async fn global_events_reach_subscribers_regardless_of_session_filter() {
    let bus = EventBus::new();
    let (_id, mut rx) = bus.subscribe(None);

    bus.publish(Event::new(EventType::TaskCreated, EventSource::Task, None, json!({"id": "t1"}))).unwrap();
    bus.publish(Event::new(EventType::AssistantMessage, EventSource::Agent, Some("sess_x".into()), json!({}))).unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.session_id, None);
    let second = rx.recv().await.unwrap();
    assert_eq!(second.session_id.as_deref(), Some("sess_x"));
}
