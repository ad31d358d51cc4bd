// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

use forge_config::ToolsConfig;

/// Command whitelist engine.
///
/// Maps a concrete command string to an allow/deny decision based on the
/// configured glob patterns.  Deny patterns take priority over whitelist
/// patterns; a command matching neither is not whitelisted (the caller
/// decides what that means, typically an approval prompt).
#[derive(Debug)]
pub struct CommandPolicy {
    whitelist_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
}

impl CommandPolicy {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| glob_to_regex(p)).collect()
        };
        Self {
            whitelist_patterns: compile(&cfg.whitelist_patterns),
            deny_patterns: compile(&cfg.deny_patterns),
        }
    }

    /// True when `command` matches a whitelist pattern and no deny pattern.
    pub fn is_command_whitelisted(&self, command: &str) -> bool {
        if self.deny_patterns.iter().any(|re| re.is_match(command)) {
            return false;
        }
        self.whitelist_patterns
            .iter()
            .any(|re| re.is_match(command))
    }

    /// True when `command` matches a deny pattern and must not run at all.
    pub fn is_command_denied(&self, command: &str) -> bool {
        self.deny_patterns.iter().any(|re| re.is_match(command))
    }
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
