// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier, e.g. "openai" | "anthropic" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Base URL override.  Useful for local proxies or LiteLLM.
    pub base_url: Option<String>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Context-window override for models missing from `context_windows`
    pub max_context_tokens: Option<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            api_key_env: None,
            base_url: None,
            temperature: None,
            max_context_tokens: None,
        }
    }
}

/// Agent-loop configuration.
///
/// The agent core consumes exactly three queries from the configuration
/// surface (auto-approval, command whitelisting, per-model context budget);
/// everything else here tunes loop behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seconds a tool-approval request waits for the user before timing out
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Bound of the outbound event channel.  Rendering events are dropped
    /// when the subscriber falls this far behind; turn-end and approval
    /// events always block instead.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Token fraction of the context window at which summarization
    /// strategies start being consulted (0.0–1.0)
    #[serde(default = "default_context_soft_threshold")]
    pub context_soft_threshold: f32,
    /// Number of recent non-system messages the built-in pruning strategy
    /// preserves verbatim
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
    /// Extra instructions appended to the built-in system prompt
    #[serde(default)]
    pub user_instructions: Option<String>,
    /// Context-window sizes keyed by model name
    #[serde(default = "default_context_windows")]
    pub context_windows: HashMap<String, usize>,
    /// Fallback context window for models absent from `context_windows`
    #[serde(default = "default_max_context_tokens")]
    pub default_max_context_tokens: usize,
}

fn default_approval_timeout_secs() -> u64 {
    120
}
fn default_event_channel_capacity() -> usize {
    10
}
fn default_context_soft_threshold() -> f32 {
    0.8
}
fn default_keep_recent() -> usize {
    6
}
fn default_max_context_tokens() -> usize {
    128_000
}
fn default_context_windows() -> HashMap<String, usize> {
    let mut m = HashMap::new();
    m.insert("gpt-4o".into(), 128_000);
    m.insert("gpt-4o-mini".into(), 128_000);
    m.insert("claude-sonnet-4-5".into(), 200_000);
    m.insert("claude-opus-4-5".into(), 200_000);
    m
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            approval_timeout_secs: default_approval_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            context_soft_threshold: default_context_soft_threshold(),
            keep_recent: default_keep_recent(),
            user_instructions: None,
            context_windows: default_context_windows(),
            default_max_context_tokens: default_max_context_tokens(),
        }
    }
}

impl AgentConfig {
    /// Context budget for `model`, falling back to the configured default.
    pub fn max_context_tokens(&self, model: &str) -> usize {
        self.context_windows
            .get(model)
            .copied()
            .unwrap_or(self.default_max_context_tokens)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tools that never require a preview/approval round-trip
    #[serde(default)]
    pub auto_approve_tools: Vec<String>,
    /// Shell commands matching these glob patterns run without approval
    #[serde(default = "default_whitelist_patterns")]
    pub whitelist_patterns: Vec<String>,
    /// Shell commands matching these glob patterns are always refused
    #[serde(default = "default_deny_patterns")]
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single tool call (0 = no limit)
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_whitelist_patterns() -> Vec<String> {
    vec![
        "cat *".into(),
        "ls *".into(),
        "find *".into(),
        "rg *".into(),
        "grep *".into(),
        "git status".into(),
        "git diff*".into(),
        "git log*".into(),
    ]
}
fn default_deny_patterns() -> Vec<String> {
    vec!["rm -rf /*".into(), "dd if=*".into()]
}
fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_tools: Vec::new(),
            whitelist_patterns: default_whitelist_patterns(),
            deny_patterns: default_deny_patterns(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl ToolsConfig {
    /// True when `name` is configured to skip the preview/approval round-trip.
    pub fn is_tool_auto_approved(&self, name: &str) -> bool {
        self.auto_approve_tools.iter().any(|t| t == name)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
