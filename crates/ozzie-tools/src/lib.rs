//! The tool layer: catalog, per-session activation, sandbox guard, the
//! dangerous-tool confirmation protocol, and the WASM plugin host (§4.4).

pub mod builtin;
mod dangerous;
mod error;
mod policy;
mod registry;
mod sandbox;
mod spec;
mod tool;
mod wasm_bridge;

pub use dangerous::{DangerousToolWrapper, PermissionsMatrix};
pub use error::ToolError;
pub use policy::{glob_to_regex, ApprovalPolicy, ToolPolicy};
pub use registry::{ToolDispatchHandle, ToolRegistry, CORE_TOOL_SET};
pub use sandbox::SandboxGuard;
pub use spec::{CapabilitySet, FilesystemCapability, HttpCapability, MemoryCapability, ParamSpec, PluginManifest, PluginProvider};
pub use tool::{spec_for, OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart};
pub use wasm_bridge::WasmPlugin;
