use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use ozzie_bus::{Event, EventBus, EventSource, EventType};
use ozzie_store::{Checkpoint, MailboxMessage, MailboxMessageType, Priority, Task, TaskStatus, TaskStore};
use serde_json::json;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TaskError;
use crate::executor::{TaskExecutor, TaskOutcome};

const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 30;

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
    }
}

/// Grounded on `sven-core/task_tool.rs`'s depth-limited sub-agent spawning:
/// here generalized to a per-provider capacity pool dispatching a
/// dependency DAG instead of a depth counter (§4.6).
pub struct ActorPool {
    store: TaskStore,
    bus: EventBus,
    executor: Arc<dyn TaskExecutor>,
    slots: Mutex<HashMap<String, Arc<Semaphore>>>,
    default_capacity: usize,
    pending: Mutex<Vec<String>>,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl ActorPool {
    pub fn new(store: TaskStore, bus: EventBus, executor: Arc<dyn TaskExecutor>, default_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            executor,
            slots: Mutex::new(HashMap::new()),
            default_capacity: default_capacity.max(1),
            pending: Mutex::new(Vec::new()),
            cancel_tokens: Mutex::new(HashMap::new()),
        })
    }

    fn provider_key(task: &Task) -> String {
        task.config.model.clone().unwrap_or_else(|| "default".into())
    }

    fn semaphore_for(&self, provider: &str) -> Arc<Semaphore> {
        self.slots
            .lock()
            .unwrap()
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.default_capacity)))
            .clone()
    }

    /// `AcquireInteractive` — reserved for the session runner (§4.6, §4.3).
    pub async fn acquire_interactive(&self, provider: &str, timeout: Duration) -> Option<OwnedSemaphorePermit> {
        let sem = self.semaphore_for(provider);
        tokio::time::timeout(timeout, sem.acquire_owned()).await.ok()?.ok()
    }

    /// `AcquireForTask` — called from inside a task's own worker.
    pub async fn acquire_for_task(&self, provider: &str, timeout: Duration) -> Option<OwnedSemaphorePermit> {
        self.acquire_interactive(provider, timeout).await
    }

    pub async fn submit(&self, task: Task) -> Result<(), TaskError> {
        let id = task.id.clone();
        let session_id = task.session_id.clone();
        self.store.create(&task).await?;
        self.pending.lock().unwrap().push(id.clone());
        let _ = self.bus.publish(Event::new(EventType::TaskCreated, EventSource::Task, session_id, json!({"id": id})));
        Ok(())
    }

    pub async fn cancel(&self, id: &str, reason: &str) -> Result<(), TaskError> {
        let mut task = self.store.get(id).await?;
        if task.status.is_terminal() {
            return Ok(());
        }
        if let Some(token) = self.cancel_tokens.lock().unwrap().remove(id) {
            token.cancel();
        }
        task.status = TaskStatus::Cancelled;
        task.updated_at = Utc::now();
        self.store.save(&task).await?;
        self.store
            .append_checkpoint(id, &Checkpoint { ts: Utc::now(), step_id: None, kind: "cancelled".into(), summary: reason.to_string() })
            .await?;
        self.pending.lock().unwrap().retain(|t| t != id);
        let _ = self.bus.publish(Event::new(EventType::TaskCancelled, EventSource::Task, task.session_id.clone(), json!({"id": id, "reason": reason})));
        Ok(())
    }

    /// Re-enqueues a `suspended` task, clearing `waiting_for_reply` (§4.6).
    pub async fn resume_task(&self, id: &str) -> Result<(), TaskError> {
        let mut task = self.store.get(id).await?;
        if task.status != TaskStatus::Suspended {
            return Err(TaskError::NotSuspended(id.to_string()));
        }
        task.status = TaskStatus::Pending;
        task.waiting_for_reply = false;
        task.updated_at = Utc::now();
        self.store.save(&task).await?;
        self.pending.lock().unwrap().push(id.to_string());
        Ok(())
    }

    /// `reply_task`: tags the latest unanswered mailbox request with a
    /// `response` bearing its token and calls `resume_task` (§4.6).
    pub async fn reply_task(&self, id: &str, content: serde_json::Value) -> Result<(), TaskError> {
        let mailbox = self.store.mailbox(id).await?;
        let token = latest_unanswered_token(&mailbox).ok_or_else(|| TaskError::NoPendingRequest(id.to_string()))?;
        self.store
            .append_mailbox(
                id,
                &MailboxMessage {
                    id: Uuid::new_v4().to_string(),
                    ts: Utc::now(),
                    kind: MailboxMessageType::Response,
                    token,
                    content,
                    status: None,
                    session_id: None,
                },
            )
            .await?;
        self.resume_task(id).await
    }

    async fn status_sets(&self) -> Result<(HashSet<String>, HashSet<String>), TaskError> {
        let ids = self.store.list().await?;
        let mut completed = HashSet::new();
        let mut failed_or_cancelled = HashSet::new();
        for id in ids {
            if let Ok(t) = self.store.get(&id).await {
                match t.status {
                    TaskStatus::Completed => {
                        completed.insert(id);
                    }
                    TaskStatus::Failed | TaskStatus::Cancelled => {
                        failed_or_cancelled.insert(id);
                    }
                    _ => {}
                }
            }
        }
        Ok((completed, failed_or_cancelled))
    }

    /// One dispatch pass: ready tasks ordered `priority desc, created_at
    /// asc` (§4.6), each dispatched if its provider still has a free slot.
    pub async fn dispatch_ready(self: &Arc<Self>) -> Result<(), TaskError> {
        let (completed, failed_or_cancelled) = self.status_sets().await?;
        let candidate_ids: Vec<String> = self.pending.lock().unwrap().clone();

        let mut ready = Vec::new();
        for id in candidate_ids {
            let task = match self.store.get(&id).await {
                Ok(t) => t,
                Err(_) => continue,
            };
            if task.status != TaskStatus::Pending {
                continue;
            }
            if let Some(bad_dep) = task.depends_on.iter().find(|d| failed_or_cancelled.contains(*d)) {
                self.fail_task(&task, format!("dependency {bad_dep} did not complete")).await?;
                continue;
            }
            if task.depends_on.iter().all(|d| completed.contains(d)) {
                ready.push(task);
            }
        }

        ready.sort_by(|a, b| priority_rank(b.priority).cmp(&priority_rank(a.priority)).then(a.created_at.cmp(&b.created_at)));

        for task in ready {
            let provider = Self::provider_key(&task);
            let sem = self.semaphore_for(&provider);
            if let Ok(permit) = sem.try_acquire_owned() {
                self.pending.lock().unwrap().retain(|t| t != &task.id);
                let pool = self.clone();
                tokio::spawn(async move { pool.run_task(task, permit).await });
            }
        }
        Ok(())
    }

    async fn run_task(self: Arc<Self>, mut task: Task, permit: OwnedSemaphorePermit) {
        let id = task.id.clone();
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.updated_at = Utc::now();
        if self.store.save(&task).await.is_err() {
            return;
        }
        let _ = self.bus.publish(Event::new(EventType::TaskStarted, EventSource::Task, task.session_id.clone(), json!({"id": id})));

        let token = CancellationToken::new();
        self.cancel_tokens.lock().unwrap().insert(id.clone(), token.clone());

        // A task that has suspended before is being resumed, not started
        // fresh: dispatch through `resume` with the reply that unblocked it.
        let outcome = if task.suspend_count > 0 {
            let feedback = self.latest_feedback(&id).await.unwrap_or(serde_json::Value::Null);
            self.executor.resume(&task, feedback, token.clone()).await
        } else {
            self.executor.run(&task, token.clone()).await
        };
        self.cancel_tokens.lock().unwrap().remove(&id);
        drop(permit);

        if let Err(e) = self.apply_outcome(&mut task, outcome).await {
            tracing::warn!(task_id = %id, error = %e, "failed to persist task outcome");
        }
    }

    async fn latest_feedback(&self, task_id: &str) -> Option<serde_json::Value> {
        let mailbox = self.store.mailbox(task_id).await.ok()?;
        mailbox.iter().rev().find(|m| m.kind == MailboxMessageType::Response).map(|m| m.content.clone())
    }

    async fn apply_outcome(self: &Arc<Self>, task: &mut Task, outcome: TaskOutcome) -> Result<(), TaskError> {
        // `cancel()` may have flipped the stored task to `Cancelled` while the
        // executor was still running (it reacts to the cancellation token on
        // its own time). `cancelled` is terminal (§3): never let a race with
        // the executor's outcome flip it back to `failed`/`completed`, and
        // never re-publish `task.completed` for a task already cancelled.
        if let Ok(current) = self.store.get(&task.id).await {
            if current.status == TaskStatus::Cancelled {
                return Ok(());
            }
        }
        match outcome {
            TaskOutcome::Completed { output, summary } => {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(Utc::now());
                task.updated_at = Utc::now();
                task.result = Some(output);
                self.store.save(task).await?;
                self.store
                    .append_checkpoint(&task.id, &Checkpoint { ts: Utc::now(), step_id: None, kind: "completed".into(), summary: summary.clone() })
                    .await?;
                self.store.write_output_md(&task.id, &summary).await?;
                let _ = self.bus.publish(Event::new(
                    EventType::TaskCompleted,
                    EventSource::Task,
                    task.session_id.clone(),
                    json!({"id": task.id, "summary": summary}),
                ));
                Ok(())
            }
            TaskOutcome::Suspended { summary } => {
                let token = Uuid::new_v4().to_string();
                task.status = TaskStatus::Suspended;
                task.waiting_for_reply = true;
                task.suspended_at = Some(Utc::now());
                task.suspend_count += 1;
                task.updated_at = Utc::now();
                self.store.save(task).await?;
                self.store
                    .append_mailbox(
                        &task.id,
                        &MailboxMessage {
                            id: Uuid::new_v4().to_string(),
                            ts: Utc::now(),
                            kind: MailboxMessageType::Request,
                            token: token.clone(),
                            content: json!({"summary": summary}),
                            status: None,
                            session_id: task.session_id.clone(),
                        },
                    )
                    .await?;
                let _ = self.bus.publish(Event::new(
                    EventType::TaskSuspended,
                    EventSource::Task,
                    task.session_id.clone(),
                    json!({"id": task.id, "summary": summary, "token": token}),
                ));
                Ok(())
            }
            TaskOutcome::Failed { error, retryable } => {
                if retryable && task.retry_count < task.max_retries {
                    task.retry_count += 1;
                    task.status = TaskStatus::Pending;
                    task.updated_at = Utc::now();
                    self.store.save(task).await?;
                    let backoff = Duration::from_secs((BACKOFF_BASE_SECS << task.retry_count.min(5)).min(BACKOFF_CAP_SECS));
                    self.schedule_retry(task.id.clone(), backoff);
                    Ok(())
                } else {
                    self.fail_task(task, error).await
                }
            }
        }
    }

    /// Re-enqueues `id` onto the pending list after `backoff` elapses,
    /// exponential with a 30s cap (§4.6).
    fn schedule_retry(self: &Arc<Self>, id: String, backoff: Duration) {
        let pool = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            pool.pending.lock().unwrap().push(id);
        });
    }

    async fn fail_task(&self, task: &mut Task, error: String) -> Result<(), TaskError> {
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        task.updated_at = Utc::now();
        task.result = Some(json!({"error": error}));
        self.store.save(task).await?;
        self.store
            .append_checkpoint(&task.id, &Checkpoint { ts: Utc::now(), step_id: None, kind: "failed".into(), summary: error.clone() })
            .await?;
        self.pending.lock().unwrap().retain(|t| t != &task.id);
        let _ = self.bus.publish(Event::new(
            EventType::TaskCompleted,
            EventSource::Task,
            task.session_id.clone(),
            json!({"id": task.id, "error": error}),
        ));
        Ok(())
    }
}

/// A task is "waiting for reply" iff its mailbox has a `request` whose
/// token no `response` references; the *latest* such request is the one
/// `reply_task` answers (§3, §4.6; decided explicitly where the spec left
/// "latest" only implicit).
fn latest_unanswered_token(mailbox: &[MailboxMessage]) -> Option<String> {
    let answered: HashSet<&str> = mailbox
        .iter()
        .filter(|m| m.kind == MailboxMessageType::Response)
        .map(|m| m.token.as_str())
        .collect();
    mailbox
        .iter()
        .rev()
        .find(|m| m.kind == MailboxMessageType::Request && !answered.contains(m.token.as_str()))
        .map(|m| m.token.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ozzie_store::TaskConfig;

    struct ImmediateSuccess;

    #[async_trait]
    impl TaskExecutor for ImmediateSuccess {
        async fn run(&self, _task: &Task, _cancel: CancellationToken) -> TaskOutcome {
            TaskOutcome::Completed { output: json!({"ok": true}), summary: "done".into() }
        }
        async fn resume(&self, _task: &Task, _feedback: serde_json::Value, _cancel: CancellationToken) -> TaskOutcome {
            TaskOutcome::Completed { output: json!({}), summary: "resumed".into() }
        }
    }

    fn new_pool(dir: &std::path::Path) -> Arc<ActorPool> {
        ActorPool::new(TaskStore::new(dir), EventBus::new(), Arc::new(ImmediateSuccess), 2)
    }

    #[tokio::test]
    async fn submitted_task_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let pool = new_pool(dir.path());
        let task = Task::new("task_1", "t", "d");
        pool.submit(task).await.unwrap();
        pool.dispatch_ready().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stored = pool.store.get("task_1").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(pool.store.read_output_md("task_1").await.unwrap(), "done");
    }

    #[tokio::test]
    async fn task_waits_for_unmet_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let pool = new_pool(dir.path());
        let mut task = Task::new("task_2", "t", "d");
        task.depends_on = vec!["task_missing".into()];
        pool.submit(task).await.unwrap();
        pool.dispatch_ready().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stored = pool.store.get("task_2").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn dependency_failure_fails_dependent_task() {
        let dir = tempfile::tempdir().unwrap();
        let pool = new_pool(dir.path());

        let mut dep = Task::new("task_dep", "t", "d");
        dep.status = TaskStatus::Failed;
        pool.store.create(&dep).await.unwrap();

        let mut task = Task::new("task_3", "t", "d");
        task.depends_on = vec!["task_dep".into()];
        task.config = TaskConfig::default();
        pool.submit(task).await.unwrap();
        pool.dispatch_ready().await.unwrap();

        let stored = pool.store.get("task_3").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        let result = stored.result.unwrap();
        assert!(result["error"].as_str().unwrap().contains("task_dep"));
    }

    #[tokio::test]
    async fn cancel_marks_non_terminal_task_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let pool = new_pool(dir.path());
        let task = Task::new("task_4", "t", "d");
        pool.store.create(&task).await.unwrap();
        pool.cancel("task_4", "user requested").await.unwrap();
        let stored = pool.store.get("task_4").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn reply_task_tags_latest_unanswered_request_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = new_pool(dir.path());
        let mut task = Task::new("task_5", "t", "d");
        task.status = TaskStatus::Suspended;
        task.waiting_for_reply = true;
        pool.store.create(&task).await.unwrap();
        pool.store
            .append_mailbox(
                "task_5",
                &MailboxMessage {
                    id: "m1".into(),
                    ts: Utc::now(),
                    kind: MailboxMessageType::Request,
                    token: "tok_1".into(),
                    content: json!({}),
                    status: None,
                    session_id: None,
                },
            )
            .await
            .unwrap();

        pool.reply_task("task_5", json!({"answer": "yes"})).await.unwrap();
        let stored = pool.store.get("task_5").await.unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert!(!stored.waiting_for_reply);
    }
}
