use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One parameter of a [`ToolSpec`]'s JSON-schema-ish signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum")]
    pub enum_values: Option<Vec<String>>,
    pub default: Option<serde_json::Value>,
    pub items: Option<Box<ParamSpec>>,
    pub properties: Option<HashMap<String, ParamSpec>>,
}

/// Description of a callable tool (§4.4.1). `func` is set for native tools
/// that resolve directly to a registered [`crate::tool::Tool`] impl and left
/// unset for WASM-backed tools, which are dispatched through the plugin's
/// exported function instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: HashMap<String, ParamSpec>,
    pub func: Option<String>,
    #[serde(default)]
    pub dangerous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginProvider {
    Native,
    Extism,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemCapability {
    /// Maps host path -> guest-visible path for WASM plugins; empty for
    /// native tools, which see the real filesystem directly.
    #[serde(default)]
    pub allowed_paths: HashMap<String, String>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpCapability {
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryCapability {
    pub max_pages: Option<u32>,
}

/// Deny-by-default capability declaration a [`PluginManifest`] grants to its
/// tools (§4.4.1, §4.4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub http: HttpCapability,
    #[serde(default)]
    pub kv: bool,
    #[serde(default)]
    pub log: bool,
    #[serde(default)]
    pub filesystem: FilesystemCapability,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub exec: bool,
    #[serde(default)]
    pub elevated: bool,
    #[serde(default)]
    pub memory: MemoryCapability,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub provider: PluginProvider,
    pub wasm_path: Option<String>,
    #[serde(default)]
    pub dangerous: bool,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    pub tools: Vec<ToolSpec>,
}
