//! Typed ambient configuration for the gateway's own subsystems.
//!
//! This crate intentionally does **not** implement the multi-layer
//! `config.jsonc` search-and-merge loader — that remains an external
//! collaborator's responsibility (see `SPEC_FULL.md` §1.1). It only
//! describes the shape of the settings the core consumes, with the same
//! named-default-function pattern the teacher's `sven-config::schema` uses
//! for `#[serde(default = "...")]`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Resolve `$HOME/.ozzie`, the default OzzieRoot.
pub fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ozzie")
}

fn default_bind_addr() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_bus_channel_buffer() -> usize {
    256
}

fn default_provider_capacity() -> HashMap<String, usize> {
    let mut m = HashMap::new();
    m.insert("mock".to_string(), 4);
    m
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Ring buffer capacity for the event bus (§4.1).
    #[serde(default = "default_bus_capacity")]
    pub bus_history_capacity: usize,
    /// Default bounded-channel buffer size for `SubscribeChan` callers that
    /// don't pick their own.
    #[serde(default = "default_bus_channel_buffer")]
    pub bus_channel_buffer: usize,
    /// Concurrent LLM-call capacity per provider name (§4.6).
    #[serde(default = "default_provider_capacity")]
    pub provider_capacity: HashMap<String, usize>,
    /// Timeout for the dangerous-tool confirmation round-trip (§4.4.4).
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bus_history_capacity: default_bus_capacity(),
            bus_channel_buffer: default_bus_channel_buffer(),
            provider_capacity: default_provider_capacity(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Strategy used by the session runner's context compressor (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    Structured,
    Narrative,
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        Self::Structured
    }
}

fn default_max_tool_rounds() -> usize {
    200
}
fn default_compaction_threshold() -> f32 {
    0.85
}
fn default_compaction_keep_recent() -> usize {
    6
}
fn default_tool_result_token_cap() -> usize {
    4000
}
fn default_compaction_overhead_reserve() -> f32 {
    0.10
}
fn default_max_context_tokens() -> usize {
    128_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Fraction of `max_context_tokens` at which compaction is triggered.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    #[serde(default = "default_compaction_overhead_reserve")]
    pub compaction_overhead_reserve: f32,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            compaction_threshold: default_compaction_threshold(),
            compaction_keep_recent: default_compaction_keep_recent(),
            compaction_strategy: CompactionStrategy::default(),
            tool_result_token_cap: default_tool_result_token_cap(),
            compaction_overhead_reserve: default_compaction_overhead_reserve(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

fn default_auto_approve_patterns() -> Vec<String> {
    vec![
        "cat *".into(),
        "ls *".into(),
        "find *".into(),
        "rg *".into(),
        "grep *".into(),
    ]
}
fn default_deny_patterns() -> Vec<String> {
    vec!["rm -rf /*".into(), "dd if=*".into()]
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_shell_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_auto_approve_patterns")]
    pub auto_approve_patterns: Vec<String>,
    #[serde(default = "default_deny_patterns")]
    pub deny_patterns: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,
    /// Operator-configured directories autonomous/supervised tasks may touch
    /// outside their own `work_dir` (§4.4.3).
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    /// Directory the plugin loader searches for `manifest.jsonc`s (§4.4.1).
    #[serde(default)]
    pub plugins_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: default_auto_approve_patterns(),
            deny_patterns: default_deny_patterns(),
            timeout_secs: default_timeout_secs(),
            shell_timeout_secs: default_shell_timeout_secs(),
            allowed_paths: Vec::new(),
            plugins_dir: None,
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}
fn default_min_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    /// Floor enforced by `AddEntry` (§4.7): rejects `interval_sec` below this.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_config_round_trips_through_json() {
        let cfg = GatewayConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bind_addr, cfg.bind_addr);
        assert_eq!(back.bus_history_capacity, 1024);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: GatewayConfig = serde_json::from_str(r#"{"bind_addr":"0.0.0.0:9999"}"#).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:9999");
        assert_eq!(cfg.bus_history_capacity, default_bus_capacity());
        assert_eq!(cfg.agent.max_tool_rounds, default_max_tool_rounds());
    }

    #[test]
    fn default_config_denies_destructive_rm() {
        let cfg = ToolsConfig::default();
        assert!(cfg.deny_patterns.iter().any(|p| p == "rm -rf /*"));
    }

    #[test]
    fn scheduler_min_interval_defaults_to_five() {
        assert_eq!(SchedulerConfig::default().min_interval_secs, 5);
    }
}
