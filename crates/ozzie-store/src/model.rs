use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: Option<String>,
    pub root_dir: Option<String>,
    pub language: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u32,
    pub summary: Option<String>,
    pub summary_up_to: Option<u32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: None,
            root_dir: None,
            language: None,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            message_count: 0,
            summary: None,
            summary_up_to: None,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub tool_calls: Vec<serde_json::Value>,
    pub tool_call_id: Option<String>,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
}

impl StoredMessage {
    /// §3 invariant: empty-content, non-assistant messages are dropped from
    /// history replayed to the LLM (assistant turns survive even when empty,
    /// e.g. a tool-call-only turn).
    pub fn is_droppable(&self) -> bool {
        self.content.is_empty() && self.role != MessageRole::Assistant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Suspended,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Disabled,
    Supervised,
    Autonomous,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    pub skill: Option<String>,
    pub work_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_autonomy")]
    pub autonomy_level: AutonomyLevel,
}

fn default_autonomy() -> AutonomyLevel {
    AutonomyLevel::Supervised
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub current_step: u32,
    pub total_steps: u32,
    pub percentage: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub session_id: Option<String>,
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Progress,
    pub plan: Option<String>,
    pub config: TaskConfig,
    pub result: Option<serde_json::Value>,
    pub suspended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub suspend_count: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub waiting_for_reply: bool,
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            session_id: None,
            parent_task_id: None,
            depends_on: Vec::new(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: Priority::Normal,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            progress: Progress::default(),
            plan: None,
            config: TaskConfig::default(),
            result: None,
            suspended_at: None,
            suspend_count: 0,
            retry_count: 0,
            max_retries: default_max_retries(),
            waiting_for_reply: false,
        }
    }

    /// Eligible to run only once every dependency has completed (§3).
    pub fn is_ready(&self, completed_ids: &std::collections::HashSet<String>) -> bool {
        self.status == TaskStatus::Pending && self.depends_on.iter().all(|d| completed_ids.contains(d))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxMessageType {
    Request,
    Response,
    Exploration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxMessage {
    pub id: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MailboxMessageType,
    pub token: String,
    pub content: serde_json::Value,
    pub status: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub ts: DateTime<Utc>,
    pub step_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSource {
    Skill,
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFilter {
    pub event: String,
    #[serde(default)]
    pub filter: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    pub source: ScheduleSource,
    pub session_id: Option<String>,
    pub title: String,
    pub description: String,
    pub cron_spec: Option<String>,
    pub interval_sec: Option<u64>,
    pub on_event: Option<EventFilter>,
    pub task_template: Option<serde_json::Value>,
    pub skill_name: Option<String>,
    #[serde(default)]
    pub cooldown_sec: u64,
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub run_count: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    /// §3 invariant: exactly one trigger kind is present.
    pub fn has_exactly_one_trigger(&self) -> bool {
        let present = [self.cron_spec.is_some(), self.interval_sec.is_some(), self.on_event.is_some()];
        present.iter().filter(|p| **p).count() == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_user_message_is_droppable_but_empty_assistant_is_not() {
        let user = StoredMessage {
            role: MessageRole::User,
            content: String::new(),
            ts: Utc::now(),
            tool_calls: vec![],
            tool_call_id: None,
            tokens_in: None,
            tokens_out: None,
        };
        assert!(user.is_droppable());

        let mut assistant = user.clone();
        assistant.role = MessageRole::Assistant;
        assert!(!assistant.is_droppable());
    }

    #[test]
    fn task_is_ready_only_when_dependencies_completed() {
        let mut task = Task::new("task_1", "t", "d");
        task.depends_on = vec!["task_0".into()];
        let completed = std::collections::HashSet::new();
        assert!(!task.is_ready(&completed));

        let mut completed = std::collections::HashSet::new();
        completed.insert("task_0".to_string());
        assert!(task.is_ready(&completed));
    }

    #[test]
    fn schedule_entry_requires_exactly_one_trigger() {
        let mut entry = ScheduleEntry {
            id: "sched_1".into(),
            source: ScheduleSource::Dynamic,
            session_id: None,
            title: "t".into(),
            description: "d".into(),
            cron_spec: Some("0 * * * *".into()),
            interval_sec: None,
            on_event: None,
            task_template: None,
            skill_name: None,
            cooldown_sec: 0,
            max_runs: None,
            run_count: 0,
            enabled: true,
            created_at: Utc::now(),
            last_run_at: None,
        };
        assert!(entry.has_exactly_one_trigger());

        entry.interval_sec = Some(60);
        assert!(!entry.has_exactly_one_trigger());
    }
}
