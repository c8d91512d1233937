use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use ozzie_bus::{Event, EventBus, EventSource, EventType};
use ozzie_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, Role, ToolCallRequest, ToolSchema};
use ozzie_store::{MessageRole, SessionStore, StoredMessage};
use ozzie_tools::{ToolCall, ToolRegistry};
use serde_json::json;
use tokio::sync::Semaphore;

use crate::compact::{self, CompactionStrategy};
use crate::error::RunnerError;

const ACTIVATE_TOOLS_NAME: &str = "activate_tools";
const NO_CAPACITY_REPLY: &str = "All LLM capacity is currently in use.";
/// Caps a single call_model invocation's ReAct round-trips the way
/// `sven-core/task_tool.rs` caps sub-agent spawn depth — a model stuck
/// issuing tool calls forever must not wedge the turn open indefinitely.
const MAX_TOOL_ROUNDS: u32 = 4;

pub struct RunnerConfig {
    pub persona_prompt: String,
    pub compaction_threshold_tokens: usize,
    pub compaction_keep_tail: usize,
    pub emergency_keep_last: usize,
    pub strategy: CompactionStrategy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            persona_prompt: String::new(),
            compaction_threshold_tokens: 32_000,
            compaction_keep_tail: 20,
            emergency_keep_last: 6,
            strategy: CompactionStrategy::Narrative,
        }
    }
}

/// The ReAct loop driving one session's conversation (§4.3). Triggered by
/// `user.message` events; at most one turn runs per session at a time.
pub struct SessionRunner {
    store: SessionStore,
    bus: EventBus,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<Mutex<ToolRegistry>>,
    interactive_slots: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    config: RunnerConfig,
}

impl SessionRunner {
    pub fn new(
        store: SessionStore,
        bus: EventBus,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<Mutex<ToolRegistry>>,
        interactive_slots: Arc<Semaphore>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            bus,
            provider,
            tools,
            interactive_slots,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            config,
        }
    }

    /// Concurrent `user.message` events for a busy session are discarded,
    /// not queued — the user is expected to resend.
    pub async fn handle_user_message(&self, session_id: &str, content: String) -> Result<(), RunnerError> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if in_flight.contains(session_id) {
                tracing::debug!(session_id, "dropping concurrent user.message: a turn is already running");
                return Ok(());
            }
            in_flight.insert(session_id.to_string());
        }
        let result = self.run_turn(session_id, content).await;
        self.in_flight.lock().unwrap().remove(session_id);
        result
    }

    async fn run_turn(&self, session_id: &str, content: String) -> Result<(), RunnerError> {
        if self.store.get(session_id).await.is_err() {
            self.store.create(session_id).await?;
            let _ = self.bus.publish(Event::new(
                EventType::SessionCreated,
                EventSource::Agent,
                Some(session_id.to_string()),
                json!({}),
            ));
            self.tools.lock().unwrap().start_session(session_id);
        }

        self.append_message(session_id, MessageRole::User, content).await?;

        let permit = match self.interactive_slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.emit_final_reply(session_id, NO_CAPACITY_REPLY).await?;
                return Ok(());
            }
        };

        let history = self.load_history(session_id).await?;
        let history = self.maybe_compact(session_id, history).await?;

        let catalog_has_inactive_tools = {
            let tools = self.tools.lock().unwrap();
            tools.known_names().len() > tools.active_tools(session_id).len()
        };

        let reply = if catalog_has_inactive_tools {
            let (text, activated) = self.call_model(session_id, &history, false).await?;
            if activated {
                let (text2, _) = self.call_model(session_id, &history, true).await?;
                text2
            } else {
                self.replay_buffered_as_stream(session_id, &text).await?;
                text
            }
        } else {
            let (text, _) = self.call_model(session_id, &history, true).await?;
            text
        };

        drop(permit);

        self.append_message(session_id, MessageRole::Assistant, reply.clone()).await?;
        let _ = self.bus.publish(Event::new(
            EventType::AssistantMessage,
            EventSource::Agent,
            Some(session_id.to_string()),
            json!({"content": reply}),
        ));
        Ok(())
    }

    async fn load_history(&self, session_id: &str) -> Result<Vec<Message>, RunnerError> {
        let stored = self.store.messages(session_id).await?;
        Ok(stored.into_iter().filter(|m| !m.is_droppable()).map(to_model_message).collect())
    }

    async fn maybe_compact(&self, session_id: &str, history: Vec<Message>) -> Result<Vec<Message>, RunnerError> {
        if compact::estimate_tokens(&history) <= self.config.compaction_threshold_tokens {
            return Ok(history);
        }

        match compact::compact_session_with_strategy(
            self.provider.as_ref(),
            &history,
            self.config.compaction_keep_tail,
            self.config.strategy,
        )
        .await
        {
            Ok(result) => {
                let mut session = self.store.get(session_id).await?;
                session.summary = Some(result.summary.content.clone());
                session.summary_up_to = Some(result.summary_up_to as u32);
                self.store.save(&session).await?;

                let mut out = vec![result.summary];
                out.extend(history[result.summary_up_to..].iter().cloned());
                Ok(out)
            }
            Err(e) => {
                tracing::warn!(
                    session_id,
                    error = %e,
                    "compaction prompt itself would not fit; falling back to emergency_compact"
                );
                Ok(compact::emergency_compact(&history, self.config.emergency_keep_last))
            }
        }
    }

    /// Runs a model call, dispatching any real tool calls it makes and
    /// feeding their results back for up to `MAX_TOOL_ROUNDS` further
    /// rounds. `stream` selects buffered (§4.3 first pass, silent to the
    /// client) vs streamed (emits `assistant.stream` events) dispatch for
    /// every round. Returns the final round's text and whether
    /// `activate_tools` fired at any point.
    async fn call_model(
        &self,
        session_id: &str,
        history: &[Message],
        stream: bool,
    ) -> Result<(String, bool), RunnerError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.config.persona_prompt.is_empty() {
            messages.push(Message::system(self.config.persona_prompt.clone()));
        }
        messages.extend(history.iter().cloned());

        let mut activated = false;
        let mut rounds = 0u32;

        loop {
            let tools = self.active_tool_schemas(session_id);
            let req = CompletionRequest { messages: messages.clone(), tools, stream };
            let mut response = self.provider.complete(req).await.map_err(RunnerError::Provider)?;

            if stream {
                self.publish_stream(session_id, json!({"phase": "start"}));
            }

            let mut text = String::new();
            let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
            let mut index = 0u32;
            while let Some(event) = response.next().await {
                match event.map_err(RunnerError::Provider)? {
                    ResponseEvent::TextDelta(delta) => {
                        text.push_str(&delta);
                        if stream {
                            self.publish_stream(session_id, json!({"phase": "delta", "content": delta, "index": index}));
                            index += 1;
                        }
                    }
                    ResponseEvent::ToolCall { name, arguments, .. } if name == ACTIVATE_TOOLS_NAME => {
                        activated = true;
                        let names = parse_tool_names(&arguments);
                        if !names.is_empty() {
                            self.tools.lock().unwrap().activate_tools(session_id, &names);
                        }
                    }
                    ResponseEvent::ToolCall { id, name, arguments } => {
                        tool_calls.push(ToolCallRequest { id, name, arguments });
                    }
                    ResponseEvent::Usage { .. } => {}
                    ResponseEvent::Done => break,
                    ResponseEvent::Error(e) => {
                        let _ = self.bus.publish(Event::new(
                            EventType::AssistantMessage,
                            EventSource::Agent,
                            Some(session_id.to_string()),
                            json!({"error": e}),
                        ));
                        return Err(RunnerError::Provider(anyhow::anyhow!(e)));
                    }
                }
            }

            if stream {
                self.publish_stream(session_id, json!({"phase": "end"}));
            }

            if tool_calls.is_empty() {
                return Ok((text, activated));
            }
            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                tracing::warn!(session_id, rounds, "tool round limit reached; ending turn without further dispatch");
                return Ok((text, activated));
            }

            self.append_tool_call_message(session_id, &text, &tool_calls).await?;
            messages.push(Message {
                role: Role::Assistant,
                content: text,
                tool_calls: tool_calls.clone(),
                tool_call_id: None,
                response_meta: None,
            });

            for call in &tool_calls {
                let output = self.dispatch_tool_call(session_id, call).await;
                self.append_message_full(session_id, MessageRole::Tool, output.clone(), Vec::new(), Some(call.id.clone()))
                    .await?;
                messages.push(Message::tool_result(call.id.clone(), output));
            }
        }
    }

    /// Resolves a registered tool's dispatch handle with the registry's
    /// mutex held only long enough to clone it, then awaits outside the
    /// lock — a `std::sync::MutexGuard` must never span an `.await`.
    async fn dispatch_tool_call(&self, session_id: &str, call: &ToolCallRequest) -> String {
        let args = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
        let handle = {
            let registry = self.tools.lock().unwrap();
            registry.dispatch_handle(session_id, &call.name)
        };
        let output = match handle {
            Ok(handle) => handle.invoke(session_id, ToolCall { id: call.id.clone(), name: call.name.clone(), args }).await,
            Err(e) => {
                return e;
            }
        };
        output.content
    }

    fn active_tool_schemas(&self, session_id: &str) -> Vec<ToolSchema> {
        let registry = self.tools.lock().unwrap();
        registry
            .active_tools(session_id)
            .iter()
            .filter_map(|name| registry.describe(name))
            .map(|(name, description, parameters)| ToolSchema { name, description, parameters })
            .collect()
    }

    fn publish_stream(&self, session_id: &str, payload: serde_json::Value) {
        let _ = self.bus.publish(Event::new(
            EventType::AssistantStream,
            EventSource::Agent,
            Some(session_id.to_string()),
            payload,
        ));
    }

    /// A first-pass buffered reply that didn't activate any tool is emitted
    /// to the client as a single start/delta/end sequence (§4.3).
    async fn replay_buffered_as_stream(&self, session_id: &str, text: &str) -> Result<(), RunnerError> {
        self.publish_stream(session_id, json!({"phase": "start"}));
        self.publish_stream(session_id, json!({"phase": "delta", "content": text, "index": 0}));
        self.publish_stream(session_id, json!({"phase": "end"}));
        Ok(())
    }

    async fn emit_final_reply(&self, session_id: &str, text: &str) -> Result<(), RunnerError> {
        self.replay_buffered_as_stream(session_id, text).await?;
        self.append_message(session_id, MessageRole::Assistant, text.to_string()).await?;
        let _ = self.bus.publish(Event::new(
            EventType::AssistantMessage,
            EventSource::Agent,
            Some(session_id.to_string()),
            json!({"content": text}),
        ));
        Ok(())
    }

    /// Appends a synthetic `system` message so the user learns about
    /// background task activity on their next turn (§4.3).
    pub async fn notify_task_event(&self, session_id: &str, summary: String) -> Result<(), RunnerError> {
        self.append_message(session_id, MessageRole::System, summary).await
    }

    async fn append_message(&self, session_id: &str, role: MessageRole, content: String) -> Result<(), RunnerError> {
        self.append_message_full(session_id, role, content, Vec::new(), None).await
    }

    /// Persists an assistant turn that issued tool calls, one `tool_calls`
    /// entry per call (§3's `Message.tool_calls` contract) so a later
    /// `load_history` can replay them back to the model.
    async fn append_tool_call_message(
        &self,
        session_id: &str,
        content: &str,
        tool_calls: &[ToolCallRequest],
    ) -> Result<(), RunnerError> {
        let encoded = tool_calls
            .iter()
            .map(|c| json!({"id": c.id, "name": c.name, "arguments": c.arguments}))
            .collect();
        self.append_message_full(session_id, MessageRole::Assistant, content.to_string(), encoded, None).await
    }

    async fn append_message_full(
        &self,
        session_id: &str,
        role: MessageRole,
        content: String,
        tool_calls: Vec<serde_json::Value>,
        tool_call_id: Option<String>,
    ) -> Result<(), RunnerError> {
        self.store
            .append_message(
                session_id,
                &StoredMessage {
                    role,
                    content,
                    ts: chrono::Utc::now(),
                    tool_calls,
                    tool_call_id,
                    tokens_in: None,
                    tokens_out: None,
                },
            )
            .await?;
        Ok(())
    }
}

/// Parses `activate_tools`' JSON arguments, accepting a bare array or an
/// object with a `tools`/`names` array. Anything else activates nothing.
fn parse_tool_names(arguments: &str) -> Vec<String> {
    let value: serde_json::Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let candidates = value.get("tools").or_else(|| value.get("names")).unwrap_or(&value);
    candidates
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn to_model_message(stored: StoredMessage) -> Message {
    let role = match stored.role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
        MessageRole::Tool => Role::Tool,
        MessageRole::System => Role::System,
    };
    let tool_calls = stored.tool_calls.into_iter().filter_map(|v| serde_json::from_value(v).ok()).collect();
    Message {
        role,
        content: stored.content,
        tool_calls,
        tool_call_id: stored.tool_call_id,
        response_meta: None,
    }
}
