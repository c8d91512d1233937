use async_trait::async_trait;
use serde_json::json;

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Runs a shell command via `sh -c`. Always `dangerous` at the manifest
/// level, so every registrar wraps it in [`crate::dangerous::DangerousToolWrapper`];
/// a task invocation additionally carries a [`crate::sandbox::SandboxGuard`]
/// once that task runs supervised or autonomous.
pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command and capture its stdout/stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "command": {"type": "string", "description": "command to run", "required": true},
            "working_dir": {"type": "string", "description": "directory to run in", "required": false},
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    fn is_dangerous(&self) -> bool {
        true
    }

    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
        let command = call
            .args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: command"))?;
        let working_dir = call.args.get("working_dir").and_then(|v| v.as_str());

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;
        let mut content = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            content.push_str("\n--- stderr ---\n");
            content.push_str(&String::from_utf8_lossy(&output.stderr));
        }

        Ok(if output.status.success() {
            ToolOutput::ok(call.id, content)
        } else {
            ToolOutput::err(call.id, format!("exit status {:?}\n{}", output.status.code(), content))
        })
    }
}
