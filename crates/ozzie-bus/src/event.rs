use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of event types the gateway ever publishes (§6.1).
///
/// Adding a new kind of event means adding a variant here, not stringly
/// matching on `payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[serde(rename = "user.message")]
    UserMessage,
    #[serde(rename = "assistant.stream")]
    AssistantStream,
    #[serde(rename = "assistant.message")]
    AssistantMessage,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "prompt.request")]
    PromptRequest,
    #[serde(rename = "prompt.response")]
    PromptResponse,
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.closed")]
    SessionClosed,
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.started")]
    TaskStarted,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.suspended")]
    TaskSuspended,
    #[serde(rename = "task.cancelled")]
    TaskCancelled,
    #[serde(rename = "schedule.trigger")]
    ScheduleTrigger,
    #[serde(rename = "llm.call")]
    LlmCall,
    #[serde(rename = "skill.started")]
    SkillStarted,
    #[serde(rename = "skill.completed")]
    SkillCompleted,
    #[serde(rename = "skill.step.started")]
    SkillStepStarted,
    #[serde(rename = "skill.step.completed")]
    SkillStepCompleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserMessage => "user.message",
            EventType::AssistantStream => "assistant.stream",
            EventType::AssistantMessage => "assistant.message",
            EventType::ToolCall => "tool.call",
            EventType::PromptRequest => "prompt.request",
            EventType::PromptResponse => "prompt.response",
            EventType::SessionCreated => "session.created",
            EventType::SessionClosed => "session.closed",
            EventType::TaskCreated => "task.created",
            EventType::TaskStarted => "task.started",
            EventType::TaskCompleted => "task.completed",
            EventType::TaskSuspended => "task.suspended",
            EventType::TaskCancelled => "task.cancelled",
            EventType::ScheduleTrigger => "schedule.trigger",
            EventType::LlmCall => "llm.call",
            EventType::SkillStarted => "skill.started",
            EventType::SkillCompleted => "skill.completed",
            EventType::SkillStepStarted => "skill.step.started",
            EventType::SkillStepCompleted => "skill.step.completed",
        }
    }
}

/// Where an event originated, carried for downstream routing/filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Ws,
    Agent,
    Plugin,
    Hub,
    Scheduler,
    Task,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub session_id: Option<String>,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: EventType,
        source: EventSource,
        session_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            session_id,
            source,
            timestamp: Utc::now(),
            payload,
        }
    }
}
