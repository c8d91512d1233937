use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use extism::{Function, Manifest, Plugin, UserData, Val, ValType, Wasm};
use ozzie_bus::{Event, EventBus, EventSource, EventType};
use serde_json::json;

use crate::spec::{CapabilitySet, ToolSpec};
use crate::tool::{Tool, ToolCall, ToolOutput};

/// The `ozzie` host namespace a WASM plugin can call into (§4.4.5):
/// `log`, `kv_get`/`kv_set` against a per-plugin in-memory map, `emit_event`
/// onto the bus, and `get_config` for a plugin-scoped string.
struct HostState {
    kv: Mutex<HashMap<String, String>>,
    config: HashMap<String, String>,
    bus: EventBus,
}

/// A tool backed by a single exported function of a loaded WASM module.
/// Capabilities declared in the manifest bound what the host functions will
/// do on the plugin's behalf (deny-by-default); the sandbox translation
/// itself lives in [`crate::sandbox::SandboxGuard`], applied the same way as
/// for native `exec`/filesystem tools.
pub struct WasmPlugin {
    spec: ToolSpec,
    export_name: String,
    plugin: Mutex<Plugin>,
}

impl WasmPlugin {
    pub fn load(
        spec: ToolSpec,
        wasm_path: &str,
        export_name: impl Into<String>,
        capabilities: &CapabilitySet,
        bus: EventBus,
        config: HashMap<String, String>,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(HostState { kv: Mutex::new(HashMap::new()), config, bus });
        let functions = host_functions(state);

        let manifest = Manifest::new([Wasm::file(wasm_path)])
            .with_memory_max(capabilities.memory.max_pages.unwrap_or(256))
            .with_timeout(std::time::Duration::from_millis(capabilities.timeout_ms.unwrap_or(30_000)));

        let plugin = Plugin::new(&manifest, functions, true)?;
        Ok(Self { spec, export_name: export_name.into(), plugin: Mutex::new(plugin) })
    }
}

fn host_functions(state: Arc<HostState>) -> Vec<Function> {
    let log_state = state.clone();
    let log_fn = Function::new(
        "log",
        [ValType::I64, ValType::I64],
        [],
        UserData::new(log_state),
        move |plugin, inputs, _outputs, user_data| {
            let level: String = plugin.memory_str(inputs[0].unwrap_i64() as u64)?.to_string();
            let message: String = plugin.memory_str(inputs[1].unwrap_i64() as u64)?.to_string();
            tracing::info!(plugin_log_level = %level, "{}", message);
            let _ = user_data;
            Ok(())
        },
    );

    let kv_get_state = state.clone();
    let kv_get_fn = Function::new(
        "kv_get",
        [ValType::I64],
        [ValType::I64],
        UserData::new(kv_get_state),
        move |plugin, inputs, outputs, user_data| {
            let key: String = plugin.memory_str(inputs[0].unwrap_i64() as u64)?.to_string();
            let state: &Arc<HostState> = &user_data.get()?;
            let value = state.kv.lock().unwrap().get(&key).cloned().unwrap_or_default();
            let handle = plugin.memory_new(&value)?;
            outputs[0] = Val::I64(handle.offset() as i64);
            Ok(())
        },
    );

    let kv_set_state = state.clone();
    let kv_set_fn = Function::new(
        "kv_set",
        [ValType::I64, ValType::I64],
        [],
        UserData::new(kv_set_state),
        move |plugin, inputs, _outputs, user_data| {
            let key: String = plugin.memory_str(inputs[0].unwrap_i64() as u64)?.to_string();
            let value: String = plugin.memory_str(inputs[1].unwrap_i64() as u64)?.to_string();
            let state: &Arc<HostState> = &user_data.get()?;
            state.kv.lock().unwrap().insert(key, value);
            Ok(())
        },
    );

    let emit_state = state.clone();
    let emit_event_fn = Function::new(
        "emit_event",
        [ValType::I64, ValType::I64],
        [],
        UserData::new(emit_state),
        move |plugin, inputs, _outputs, user_data| {
            let event_type: String = plugin.memory_str(inputs[0].unwrap_i64() as u64)?.to_string();
            let payload_raw: String = plugin.memory_str(inputs[1].unwrap_i64() as u64)?.to_string();
            let payload: serde_json::Value = serde_json::from_str(&payload_raw).unwrap_or(json!({"raw": payload_raw}));
            let state: &Arc<HostState> = &user_data.get()?;
            // Plugins can only emit `skill.step.*`; anything else is ignored
            // rather than trusted as an arbitrary system event.
            if event_type == "skill.step.started" || event_type == "skill.step.completed" {
                let kind = if event_type == "skill.step.started" {
                    EventType::SkillStepStarted
                } else {
                    EventType::SkillStepCompleted
                };
                let _ = state.bus.publish(Event::new(kind, EventSource::Plugin, None, payload));
            }
            Ok(())
        },
    );

    let config_state = state;
    let get_config_fn = Function::new(
        "get_config",
        [ValType::I64],
        [ValType::I64],
        UserData::new(config_state),
        move |plugin, inputs, outputs, user_data| {
            let key: String = plugin.memory_str(inputs[0].unwrap_i64() as u64)?.to_string();
            let state: &Arc<HostState> = &user_data.get()?;
            let value = state.config.get(&key).cloned().unwrap_or_default();
            let handle = plugin.memory_new(&value)?;
            outputs[0] = Val::I64(handle.offset() as i64);
            Ok(())
        },
    );

    vec![log_fn, kv_get_fn, kv_set_fn, emit_event_fn, get_config_fn]
}

#[async_trait]
impl Tool for WasmPlugin {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::to_value(&self.spec.parameters).unwrap_or(json!({}))
    }

    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
        let input = serde_json::to_string(&call.args)?;
        let export_name = self.export_name.clone();
        let call_id = call.id.clone();
        // extism's `Plugin::call` is synchronous; callers invoke this from a
        // `spawn_blocking`-isolated context when the module may run long.
        let mut plugin = self.plugin.lock().unwrap_or_else(|e| e.into_inner());
        let output: String = plugin.call(&export_name, input)?;
        let value: serde_json::Value = serde_json::from_str(&output).unwrap_or(json!({"text": output}));
        let text = value.get("text").and_then(|v| v.as_str()).unwrap_or(&output).to_string();
        Ok(ToolOutput::ok(call_id, text))
    }
}
