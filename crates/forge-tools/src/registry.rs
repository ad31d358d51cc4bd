// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::builtin::{
    ask_question::AskQuestionTool, converse::ConverseTool, task_completion::TaskCompletionTool,
};
use crate::Tool;

/// The three loop-breaking tools every agent carries.  User code may not
/// register under these names.
pub const RESERVED_TOOL_NAMES: [&str; 3] = ["task_completion", "ask_question", "converse"];

/// A tool schema as rendered into the system prompt.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool name must not be empty")]
    EmptyName,
    #[error("tool name '{0}' is reserved")]
    ReservedName(String),
}

/// Central registry holding all available tools.
///
/// Reads happen concurrently while the loop is running; writes happen during
/// setup or explicit runtime registration, hence the reader-writer guard.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Empty registry without the reserved tools.  Only useful in tests;
    /// agents are built from [`ToolRegistry::with_builtins`].
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with the three reserved loop-breaking tools.
    pub fn with_builtins() -> Self {
        let reg = Self::new();
        reg.insert(Arc::new(TaskCompletionTool));
        reg.insert(Arc::new(AskQuestionTool));
        reg.insert(Arc::new(ConverseTool));
        reg
    }

    /// Register a tool.  Fails for empty or reserved names; re-registering
    /// an existing non-reserved name replaces the previous tool.
    pub fn register(&self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if RESERVED_TOOL_NAMES.contains(&name.as_str()) {
            return Err(RegistryError::ReservedName(name));
        }
        self.insert(Arc::new(tool));
        Ok(())
    }

    fn insert(&self, tool: Arc<dyn Tool>) {
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .insert(tool.name().to_string(), tool);
    }

    /// Case-sensitive lookup.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Produce schemas for all registered tools, sorted by name so the
    /// system prompt is stable across runs.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
