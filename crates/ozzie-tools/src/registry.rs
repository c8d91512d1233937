use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use ozzie_bus::EventBus;

use crate::dangerous::{DangerousToolWrapper, PermissionsMatrix};
use crate::sandbox::SandboxGuard;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// The tools every session starts with active (§4.4.2).
pub const CORE_TOOL_SET: &[&str] = &["read_file", "write_file", "shell"];

struct Entry {
    tool: Arc<dyn Tool>,
    wrapper: Option<Arc<DangerousToolWrapper>>,
}

/// Holds every known tool and tracks, per session, which of them are active.
/// Tools outside a session's active set are known but never dispatched to
/// for that session. A tool registered via [`Self::register_guarded`] with
/// `tool.is_dangerous() == true` is wrapped at registration time, so every
/// dispatch to it runs the Dangerous → Sandbox → Inner protocol (§4.4.4)
/// rather than calling `Tool::execute` straight through.
pub struct ToolRegistry {
    tools: HashMap<String, Entry>,
    active: HashMap<String, HashSet<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new(), active: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), Entry { tool, wrapper: None });
    }

    /// Registers `tool`, wrapping it in [`DangerousToolWrapper`] when
    /// `tool.is_dangerous()` so dispatch runs publish/check/confirm/sandbox
    /// before the tool's own `execute` (§4.4.4). Harmless to call for a
    /// non-dangerous tool — it's registered plain, same as `register`.
    pub fn register_guarded(
        &mut self,
        tool: Arc<dyn Tool>,
        bus: EventBus,
        permissions: Arc<Mutex<PermissionsMatrix>>,
        sandbox: Option<SandboxGuard>,
        elevated: bool,
    ) {
        let wrapper = tool
            .is_dangerous()
            .then(|| Arc::new(DangerousToolWrapper::new(tool.clone(), bus, permissions, sandbox, elevated)));
        self.tools.insert(tool.name().to_string(), Entry { tool, wrapper });
    }

    pub fn known_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Give a session its core tool set. Idempotent.
    pub fn start_session(&mut self, session_id: &str) {
        let core: HashSet<String> = CORE_TOOL_SET
            .iter()
            .filter(|n| self.tools.contains_key(**n))
            .map(|n| n.to_string())
            .collect();
        self.active.entry(session_id.to_string()).or_insert(core);
    }

    /// Add `names` to a session's active set. Unknown names are reported
    /// back per-name rather than failing the whole call (§4.4.2).
    pub fn activate_tools(&mut self, session_id: &str, names: &[String]) -> HashMap<String, Result<(), String>> {
        let active = self.active.entry(session_id.to_string()).or_default();
        let mut results = HashMap::new();
        for name in names {
            if self.tools.contains_key(name) {
                active.insert(name.clone());
                results.insert(name.clone(), Ok(()));
            } else {
                results.insert(name.clone(), Err(format!("unknown tool: {name}")));
            }
        }
        results
    }

    pub fn is_active(&self, session_id: &str, tool_name: &str) -> bool {
        self.active.get(session_id).is_some_and(|set| set.contains(tool_name))
    }

    pub fn active_tools(&self, session_id: &str) -> Vec<String> {
        self.active.get(session_id).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| e.tool.clone())
    }

    /// Describes an active tool for the model's catalog (§4.3/§4.4.1).
    pub fn describe(&self, name: &str) -> Option<(String, String, serde_json::Value)> {
        self.tools.get(name).map(|e| (e.tool.name().to_string(), e.tool.description().to_string(), e.tool.parameters_schema()))
    }

    /// Resolves `tool_name` to a cloneable dispatch handle without holding
    /// the registry borrow across an `.await` — callers typically hold this
    /// registry behind a `std::sync::Mutex` and must drop the guard before
    /// invoking the handle.
    pub fn dispatch_handle(&self, session_id: &str, tool_name: &str) -> Result<ToolDispatchHandle, String> {
        if !self.is_active(session_id, tool_name) {
            return Err(format!("tool not active in this session: {tool_name}"));
        }
        match self.tools.get(tool_name) {
            Some(entry) => Ok(ToolDispatchHandle { tool: entry.tool.clone(), wrapper: entry.wrapper.clone() }),
            None => Err(format!("unknown tool: {tool_name}")),
        }
    }

    pub async fn dispatch(&self, session_id: &str, call: ToolCall) -> ToolOutput {
        match self.dispatch_handle(session_id, &call.name) {
            Ok(handle) => handle.invoke(session_id, call).await,
            Err(e) => ToolOutput::err(call.id, e),
        }
    }
}

/// A cloned-out reference to a registered tool (and, if dangerous, its
/// wrapper), safe to hold across an `.await` after the registry's mutex has
/// been released.
#[derive(Clone)]
pub struct ToolDispatchHandle {
    tool: Arc<dyn Tool>,
    wrapper: Option<Arc<DangerousToolWrapper>>,
}

impl ToolDispatchHandle {
    pub async fn invoke(&self, session_id: &str, call: ToolCall) -> ToolOutput {
        let result = if let Some(wrapper) = &self.wrapper {
            wrapper.invoke(session_id, call.clone()).await.map_err(|e| e.to_string())
        } else {
            self.tool.execute(call.clone()).await.map_err(|e| e.to_string())
        };
        match result {
            Ok(out) => out,
            Err(e) => ToolOutput::err(call.id, e),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
