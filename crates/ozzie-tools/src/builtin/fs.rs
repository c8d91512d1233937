use async_trait::async_trait;
use serde_json::json;

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"path": {"type": "string", "required": true}})
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::FileContent
    }

    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: path"))?;
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(ToolOutput::ok(call.id, content)),
            Err(e) => Ok(ToolOutput::err(call.id, format!("read {path}: {e}"))),
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a UTF-8 text file, creating parent directories as needed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "path": {"type": "string", "required": true},
            "content": {"type": "string", "required": true},
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: ToolCall) -> anyhow::Result<ToolOutput> {
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: path"))?;
        let content = call
            .args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: content"))?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        match tokio::fs::write(path, content).await {
            Ok(()) => Ok(ToolOutput::ok(call.id, format!("wrote {} bytes to {path}", content.len()))),
            Err(e) => Ok(ToolOutput::err(call.id, format!("write {path}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let write = WriteFileTool;
        write
            .execute(ToolCall {
                id: "c1".into(),
                name: "write_file".into(),
                args: json!({"path": path.to_str().unwrap(), "content": "hello"}),
            })
            .await
            .unwrap();

        let read = ReadFileTool;
        let out = read
            .execute(ToolCall { id: "c2".into(), name: "read_file".into(), args: json!({"path": path.to_str().unwrap()}) })
            .await
            .unwrap();
        assert_eq!(out.content, "hello");
    }
}
