use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ozzie_bus::EventBus;
use ozzie_model::{classify_error, CompletionRequest, Message, ModelProvider, ResponseEvent, ToolCallRequest, ToolSchema};
use ozzie_store::{AutonomyLevel, Task};
use ozzie_tasks::{TaskExecutor, TaskOutcome};
use ozzie_tools::{DangerousToolWrapper, PermissionsMatrix, SandboxGuard, ToolCall, ToolRegistry};
use tokio_util::sync::CancellationToken;

const REQUEST_VALIDATION_TOOL: &str = "request_validation";

/// Mirrors `ozzie_session::runner`'s round cap — a task's model must not be
/// able to wedge the executor open with an endless tool-call chain.
const MAX_TOOL_ROUNDS: u32 = 4;

/// Bridges the task actor pool to the same model-provider contract the
/// session runner uses (§4.6, §6.2). The pool only knows about
/// `TaskExecutor`; this is where an actual completion call happens, kept
/// separate from `ozzie_session::SessionRunner` because a task has no
/// interactive client streaming its output.
pub struct GatewayTaskExecutor {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<Mutex<ToolRegistry>>,
    bus: EventBus,
    permissions: Arc<Mutex<PermissionsMatrix>>,
}

impl GatewayTaskExecutor {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<Mutex<ToolRegistry>>,
        bus: EventBus,
        permissions: Arc<Mutex<PermissionsMatrix>>,
    ) -> Self {
        Self { provider, tools, bus, permissions }
    }

    /// A task only sees the tools named in `task.config.tools` (§3's Task
    /// type), unlike a session's registry-tracked active set.
    fn tool_schemas(&self, names: &[String]) -> Vec<ToolSchema> {
        let registry = self.tools.lock().unwrap();
        names
            .iter()
            .filter_map(|n| registry.describe(n))
            .map(|(name, description, parameters)| ToolSchema { name, description, parameters })
            .collect()
    }

    /// `disabled` never sandboxes; `supervised`/`autonomous` sandbox to
    /// `task.config.work_dir` when one is set (§4.4.3).
    fn task_sandbox(task: &Task) -> Option<SandboxGuard> {
        match task.config.autonomy_level {
            AutonomyLevel::Disabled => None,
            AutonomyLevel::Supervised | AutonomyLevel::Autonomous => {
                task.config.work_dir.as_ref().map(|dir| SandboxGuard::new(dir.clone(), Vec::new()))
            }
        }
    }

    /// Looks the tool up fresh per call so a dangerous tool gets wrapped
    /// with this task's own sandbox rather than the gateway's shared,
    /// interactive-context wrapper (§4.4.4).
    async fn dispatch_tool_call(&self, task: &Task, sandbox: &Option<SandboxGuard>, call: &ToolCallRequest) -> String {
        if !task.config.tools.iter().any(|t| t == &call.name) {
            return format!("tool not enabled for this task: {}", call.name);
        }
        let tool = {
            let registry = self.tools.lock().unwrap();
            registry.get(&call.name)
        };
        let tool = match tool {
            Some(t) => t,
            None => return format!("unknown tool: {}", call.name),
        };
        let args = serde_json::from_str(&call.arguments).unwrap_or_else(|_| serde_json::json!({}));
        let invocation = ToolCall { id: call.id.clone(), name: call.name.clone(), args };

        let result = if tool.is_dangerous() {
            let wrapper = DangerousToolWrapper::new(tool.clone(), self.bus.clone(), self.permissions.clone(), sandbox.clone(), false);
            wrapper.invoke(&task.id, invocation).await.map_err(|e| e.to_string())
        } else {
            tool.execute(invocation).await.map_err(|e| e.to_string())
        };

        match result {
            Ok(out) => out.content,
            Err(e) => e,
        }
    }

    async fn drive(&self, task: &Task, mut messages: Vec<Message>, cancel: CancellationToken) -> TaskOutcome {
        let tools = self.tool_schemas(&task.config.tools);
        let sandbox = Self::task_sandbox(task);
        let mut rounds = 0u32;

        loop {
            let req = CompletionRequest { messages: messages.clone(), tools: tools.clone(), stream: false };
            let mut stream = match self.provider.complete(req).await {
                Ok(s) => s,
                Err(e) => {
                    let kind = classify_error(&e.to_string());
                    return TaskOutcome::Failed { error: e.to_string(), retryable: kind.is_retryable() };
                }
            };

            let mut output = String::new();
            let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
            loop {
                use futures::StreamExt;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return TaskOutcome::Failed { error: "cancelled".into(), retryable: false };
                    }
                    next = stream.next() => {
                        match next {
                            None => break,
                            Some(Ok(ResponseEvent::TextDelta(delta))) => output.push_str(&delta),
                            Some(Ok(ResponseEvent::ToolCall { name, arguments, .. })) if name == REQUEST_VALIDATION_TOOL => {
                                return TaskOutcome::Suspended { summary: arguments };
                            }
                            Some(Ok(ResponseEvent::ToolCall { id, name, arguments })) => {
                                tool_calls.push(ToolCallRequest { id, name, arguments });
                            }
                            Some(Ok(ResponseEvent::Usage { .. })) => {}
                            Some(Ok(ResponseEvent::Done)) => break,
                            Some(Ok(ResponseEvent::Error(e))) => {
                                let kind = classify_error(&e);
                                return TaskOutcome::Failed { error: e, retryable: kind.is_retryable() };
                            }
                            Some(Err(e)) => {
                                let kind = classify_error(&e.to_string());
                                return TaskOutcome::Failed { error: e.to_string(), retryable: kind.is_retryable() };
                            }
                        }
                    }
                }
            }

            if tool_calls.is_empty() {
                let summary = output.lines().next().unwrap_or("task completed").to_string();
                return TaskOutcome::Completed { output: serde_json::json!({"text": output}), summary };
            }

            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                tracing::warn!(task_id = %task.id, rounds, "tool round limit reached; ending task without further dispatch");
                let summary = output.lines().next().unwrap_or("task completed").to_string();
                return TaskOutcome::Completed { output: serde_json::json!({"text": output}), summary };
            }

            messages.push(Message {
                role: ozzie_model::Role::Assistant,
                content: output,
                tool_calls: tool_calls.clone(),
                tool_call_id: None,
                response_meta: None,
            });
            for call in &tool_calls {
                let result = self.dispatch_tool_call(task, &sandbox, call).await;
                messages.push(Message::tool_result(call.id.clone(), result));
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for GatewayTaskExecutor {
    async fn run(&self, task: &Task, cancel: CancellationToken) -> TaskOutcome {
        let mut messages = Vec::new();
        if let Some(plan) = &task.plan {
            messages.push(Message::system(plan.clone()));
        }
        messages.push(Message::user(task.description.clone()));
        self.drive(task, messages, cancel).await
    }

    async fn resume(&self, task: &Task, feedback: serde_json::Value, cancel: CancellationToken) -> TaskOutcome {
        let feedback_text = feedback.as_str().map(str::to_string).unwrap_or_else(|| feedback.to_string());
        let mut messages = Vec::new();
        if let Some(plan) = &task.plan {
            messages.push(Message::system(plan.clone()));
        }
        messages.push(Message::user(task.description.clone()));
        messages.push(Message::user(feedback_text));
        self.drive(task, messages, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ozzie_model::ScriptedMockProvider;
    use ozzie_tools::builtin::ShellTool;

    fn executor(registry: ToolRegistry, permissions: Arc<Mutex<PermissionsMatrix>>) -> GatewayTaskExecutor {
        GatewayTaskExecutor::new(
            Arc::new(ScriptedMockProvider::new(vec![vec![
                ResponseEvent::TextDelta("done".into()),
                ResponseEvent::Done,
            ]])),
            Arc::new(Mutex::new(registry)),
            EventBus::new(),
            permissions,
        )
    }

    #[tokio::test]
    async fn a_tool_not_named_in_task_config_is_refused() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ShellTool));
        let exec = executor(registry, Arc::new(Mutex::new(PermissionsMatrix::default())));

        let mut task = Task::new("t1", "shell check", "run something");
        task.config.tools = vec!["read_file".into()];

        let call = ToolCallRequest { id: "c1".into(), name: "shell".into(), arguments: "{}".into() };
        let out = exec.dispatch_tool_call(&task, &None, &call).await;
        assert!(out.contains("not enabled"));
    }

    #[tokio::test]
    async fn sandbox_blocks_a_path_outside_the_task_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let permissions = Arc::new(Mutex::new(PermissionsMatrix {
            global_auto_approve: ["shell".to_string()].into_iter().collect(),
            ..Default::default()
        }));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ShellTool));
        let exec = executor(registry, permissions);

        let mut task = Task::new("t2", "shell check", "run something");
        task.config.tools = vec!["shell".into()];
        task.config.autonomy_level = AutonomyLevel::Autonomous;
        task.config.work_dir = Some(dir.path().to_str().unwrap().to_string());
        let sandbox = GatewayTaskExecutor::task_sandbox(&task);
        assert!(sandbox.is_some());

        let call = ToolCallRequest { id: "c1".into(), name: "shell".into(), arguments: serde_json::json!({"command": "cat /etc/shadow"}).to_string() };
        let out = exec.dispatch_tool_call(&task, &sandbox, &call).await;
        assert!(out.to_lowercase().contains("sandbox") || out.to_lowercase().contains("escapes"));
    }
}
