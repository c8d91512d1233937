use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::spec::ToolSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutputPart {
    Text { text: String },
    Image { mime_type: String, data: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    #[serde(default)]
    pub parts: Vec<ToolOutputPart>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), parts: Vec::new(), is_error: false }
    }

    pub fn err(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), parts: Vec::new(), is_error: true }
    }

    pub fn with_parts(mut self, parts: Vec<ToolOutputPart>) -> Self {
        self.parts = parts;
        self
    }

    pub fn has_images(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ToolOutputPart::Image { .. }))
    }
}

/// Hints the UI/compactor use to decide how to render or truncate a tool's
/// output without inspecting its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    HeadTail,
    MatchList,
    FileContent,
    #[default]
    Generic,
}

/// A callable tool (§4.4.1). Native tools implement this directly; WASM
/// plugin tools are dispatched through [`crate::wasm_bridge::WasmPlugin`]
/// instead, which adapts a module export to the same `execute` contract.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    fn default_policy(&self) -> crate::policy::ApprovalPolicy {
        crate::policy::ApprovalPolicy::Ask
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }

    /// `manifest.dangerous` for a native tool (§4.4.4): when `true`, the
    /// registry wraps this tool in [`crate::dangerous::DangerousToolWrapper`]
    /// at registration time instead of dispatching to it directly.
    fn is_dangerous(&self) -> bool {
        false
    }

    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput>;
}

pub fn spec_for(tool: &dyn Tool) -> ToolSpec {
    ToolSpec {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: Default::default(),
        func: Some(tool.name().to_string()),
        dangerous: tool.is_dangerous(),
    }
}
