use std::path::PathBuf;

use regex::Regex;
use serde_json::Value;

use crate::error::ToolError;

/// Wraps `exec` and writable-filesystem tools when a task runs with
/// `autonomy_level∈{supervised,autonomous}` (§4.4.3). Interactive
/// (non-autonomous) contexts never construct this guard — it is a
/// pass-through by simply not being in the call path.
#[derive(Clone)]
pub struct SandboxGuard {
    work_dir: PathBuf,
    allowed_paths: Vec<PathBuf>,
    denylist: Vec<(Regex, &'static str)>,
}

impl SandboxGuard {
    pub fn new(work_dir: impl Into<PathBuf>, allowed_paths: Vec<PathBuf>) -> Self {
        Self { work_dir: work_dir.into(), allowed_paths, denylist: default_denylist() }
    }

    pub fn check(&self, elevated: bool, args: &Value) -> Result<(), ToolError> {
        if elevated {
            return Err(ToolError::SandboxBlocked {
                reason: "elevated tools are unconditionally refused".into(),
            });
        }
        if let Some(command) = args.get("command").and_then(Value::as_str) {
            for (re, reason) in &self.denylist {
                if re.is_match(command) {
                    return Err(ToolError::SandboxBlocked { reason: reason.to_string() });
                }
            }
        }
        for path in extract_paths(args) {
            self.check_contained(&path)?;
        }
        Ok(())
    }

    /// `~/` is rewritten relative to `work_dir`, not `$HOME` (§4.4.3).
    fn resolve(&self, raw: &str) -> PathBuf {
        let rewritten = match raw.strip_prefix("~/") {
            Some(rest) => self.work_dir.join(rest),
            None => PathBuf::from(raw),
        };
        let absolute = if rewritten.is_relative() { self.work_dir.join(rewritten) } else { rewritten };
        std::fs::canonicalize(&absolute).unwrap_or(absolute)
    }

    fn check_contained(&self, raw: &str) -> Result<(), ToolError> {
        let resolved = self.resolve(raw);
        let work_dir = std::fs::canonicalize(&self.work_dir).unwrap_or_else(|_| self.work_dir.clone());
        if resolved.starts_with(&work_dir) {
            return Ok(());
        }
        for allowed in &self.allowed_paths {
            let allowed = std::fs::canonicalize(allowed).unwrap_or_else(|_| allowed.clone());
            if resolved.starts_with(&allowed) {
                return Ok(());
            }
        }
        Err(ToolError::SandboxBlocked {
            reason: format!("path {raw} escapes work_dir and allowed_paths"),
        })
    }
}

fn extract_paths(args: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(p) = args.get("path").and_then(Value::as_str) {
        out.push(p.to_string());
    }
    if let Some(p) = args.get("working_dir").and_then(Value::as_str) {
        out.push(p.to_string());
    }
    if let Some(arr) = args.get("paths").and_then(Value::as_array) {
        for v in arr {
            if let Some(s) = v.as_str() {
                out.push(s.to_string());
            }
        }
    }
    if let Some(command) = args.get("command").and_then(Value::as_str) {
        out.extend(path_like_tokens(command));
    }
    out
}

/// Pulls whitespace-separated tokens out of a raw command string that look
/// like filesystem paths, so e.g. `cat /etc/shadow` is caught by the
/// containment check even though it never appears in a structured `path`
/// field (§4.4.3).
fn path_like_tokens(command: &str) -> Vec<String> {
    command
        .split_whitespace()
        .map(|tok| tok.trim_matches(|c| c == '\'' || c == '"'))
        .filter(|tok| tok.starts_with('/') || tok.starts_with("./") || tok.starts_with("../") || tok.starts_with("~/"))
        .map(|tok| tok.to_string())
        .collect()
}

fn default_denylist() -> Vec<(Regex, &'static str)> {
    let rules: &[(&str, &str)] = &[
        (r"rm\s+(-\w*r\w*f\w*|-\w*f\w*r\w*|--recursive.*--force|--force.*--recursive)", "recursive/force remove"),
        (r"dd\s+.*of=/dev/", "raw disk write"),
        (r"mkfs(\.\w+)?\s", "filesystem format"),
        (r"\b(fdisk|parted|gdisk)\b", "partition edit"),
        (r"chmod\s+(-\w*R\w*|--recursive)", "recursive chmod"),
        (r"chown\s+(-\w*R\w*|--recursive)", "recursive chown"),
        (r"\b(sudo|doas)\b|\bsu\s", "privilege escalation"),
        (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;", "fork bomb"),
        (r">\s*/dev/(sd[a-z]|nvme\w*|hd[a-z])", "write to raw device"),
    ];
    rules
        .iter()
        .map(|(p, reason)| (Regex::new(p).expect("static denylist regex is valid"), *reason))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn elevated_tools_are_always_refused() {
        let dir = tempfile::tempdir().unwrap();
        let guard = SandboxGuard::new(dir.path(), vec![]);
        let err = guard.check(true, &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::SandboxBlocked { .. }));
    }

    #[test]
    fn recursive_force_remove_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let guard = SandboxGuard::new(dir.path(), vec![]);
        let err = guard.check(false, &json!({"command": "rm -rf /"})).unwrap_err();
        assert!(matches!(err, ToolError::SandboxBlocked { .. }));
    }

    #[test]
    fn benign_command_passes() {
        let dir = tempfile::tempdir().unwrap();
        let guard = SandboxGuard::new(dir.path(), vec![]);
        assert!(guard.check(false, &json!({"command": "ls -la"})).is_ok());
    }

    #[test]
    fn path_inside_work_dir_passes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "hi").unwrap();
        let guard = SandboxGuard::new(dir.path(), vec![]);
        assert!(guard.check(false, &json!({"path": file.to_str().unwrap()})).is_ok());
    }

    #[test]
    fn path_outside_work_dir_and_allowed_paths_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let guard = SandboxGuard::new(dir.path(), vec![]);
        let err = guard.check(false, &json!({"path": "/etc/passwd"})).unwrap_err();
        assert!(matches!(err, ToolError::SandboxBlocked { .. }));
    }

    #[test]
    fn raw_command_path_token_outside_work_dir_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let guard = SandboxGuard::new(dir.path(), vec![]);
        let err = guard.check(false, &json!({"command": "cat /etc/shadow"})).unwrap_err();
        assert!(matches!(err, ToolError::SandboxBlocked { .. }));
    }

    #[test]
    fn tilde_path_is_rewritten_relative_to_work_dir_not_home() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let guard = SandboxGuard::new(dir.path(), vec![]);
        assert!(guard.check(false, &json!({"path": "~/sub"})).is_ok());
    }
}
