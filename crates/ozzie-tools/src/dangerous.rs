use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ozzie_bus::{Event, EventBus, EventSource, EventType};
use serde_json::json;
use uuid::Uuid;

use crate::error::ToolError;
use crate::sandbox::SandboxGuard;
use crate::tool::{Tool, ToolCall, ToolOutput};

const CONFIRMATION_TIMEOUT_SECS: u64 = 60;

/// Global auto-approve list, per-session per-tool allow list, and a
/// per-session "accept all" flag, checked in that order (§4.4.4).
#[derive(Debug, Default)]
pub struct PermissionsMatrix {
    pub global_auto_approve: HashSet<String>,
    pub session_allow: HashMap<String, HashSet<String>>,
    pub session_accept_all: HashMap<String, bool>,
}

impl PermissionsMatrix {
    pub fn is_allowed(&self, session_id: &str, tool_name: &str) -> bool {
        self.global_auto_approve.contains(tool_name)
            || self.session_accept_all.get(session_id).copied().unwrap_or(false)
            || self.session_allow.get(session_id).is_some_and(|s| s.contains(tool_name))
    }

    pub fn allow_for_session(&mut self, session_id: &str, tool_name: &str) {
        self.session_allow.entry(session_id.to_string()).or_default().insert(tool_name.to_string());
    }
}

/// Wraps a dangerous tool (`manifest.dangerous == true`) with the
/// publish/check/confirm/invoke protocol (§4.4.4). Ordering outermost-first
/// is Dangerous → Sandbox → Inner: confirmation always happens before the
/// sandbox runs, so the user is asked about their actual intent rather than
/// a post-sandbox-rewrite version of it.
pub struct DangerousToolWrapper {
    inner: Arc<dyn Tool>,
    bus: EventBus,
    sandbox: Option<SandboxGuard>,
    elevated: bool,
    permissions: Arc<Mutex<PermissionsMatrix>>,
}

impl DangerousToolWrapper {
    pub fn new(
        inner: Arc<dyn Tool>,
        bus: EventBus,
        permissions: Arc<Mutex<PermissionsMatrix>>,
        sandbox: Option<SandboxGuard>,
        elevated: bool,
    ) -> Self {
        Self { inner, bus, sandbox, elevated, permissions }
    }

    pub async fn invoke(&self, session_id: &str, call: ToolCall) -> Result<ToolOutput, ToolError> {
        let _ = self.bus.publish(Event::new(
            EventType::ToolCall,
            EventSource::Agent,
            Some(session_id.to_string()),
            json!({"status": "started", "name": call.name, "arguments": call.args}),
        ));

        let already_allowed = self.permissions.lock().unwrap().is_allowed(session_id, &call.name);
        if !already_allowed {
            self.confirm(session_id, &call.name).await?;
        }

        if let Some(sandbox) = &self.sandbox {
            sandbox.check(self.elevated, &call.args)?;
        }

        let result = self.inner.execute(call.clone()).await.map_err(|e| ToolError::Plugin(e.to_string()));

        if result.is_ok() {
            let _ = self.bus.publish(Event::new(
                EventType::ToolCall,
                EventSource::Agent,
                Some(session_id.to_string()),
                json!({"status": "completed", "name": call.name}),
            ));
        }

        result
    }

    async fn confirm(&self, session_id: &str, tool_name: &str) -> Result<(), ToolError> {
        let token = Uuid::new_v4().to_string();
        let (_sub_id, mut rx) = self.bus.subscribe(Some(vec![EventType::PromptResponse]));

        let _ = self.bus.publish(Event::new(
            EventType::PromptRequest,
            EventSource::Agent,
            Some(session_id.to_string()),
            json!({"type": "confirm", "label": format!("Run tool \"{tool_name}\"?"), "token": token}),
        ));

        let deadline = Duration::from_secs(CONFIRMATION_TIMEOUT_SECS);
        let wait = async {
            loop {
                match rx.recv().await {
                    Some(event) => {
                        if event.payload.get("token").and_then(|t| t.as_str()) == Some(token.as_str()) {
                            return Some(event);
                        }
                    }
                    None => return None,
                }
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(Some(event)) => {
                let cancelled = event.payload.get("cancelled").and_then(|v| v.as_bool()).unwrap_or(false);
                if cancelled {
                    Err(ToolError::Denied)
                } else {
                    Ok(())
                }
            }
            Ok(None) => Err(ToolError::Denied),
            Err(_) => Err(ToolError::ConfirmationTimeout(CONFIRMATION_TIMEOUT_SECS)),
        }
    }
}
