// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{command_registry::CommandRegistry, events::ToolEventSink, policy::CommandPolicy};

/// A rendering hint for a tool preview shown to the user before approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewKind {
    /// Unified diff content
    Diff,
    /// Plain text content
    #[default]
    Text,
}

/// What a previewable tool intends to do, rendered by the front-end for the
/// approve/reject decision.  The core treats the content as opaque.
#[derive(Debug, Clone)]
pub struct Preview {
    pub kind: PreviewKind,
    pub title: String,
    pub content: String,
    /// Free-form hints for the front-end, e.g. "language" for syntax coloring.
    pub metadata: HashMap<String, String>,
}

impl Preview {
    pub fn text(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: PreviewKind::Text,
            title: title.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn diff(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: PreviewKind::Diff,
            title: title.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.metadata.insert("language".into(), language.into());
        self
    }
}

/// Capabilities injected into every tool execution.
///
/// The event sink is a function-valued capability rather than a back-pointer
/// to the agent, so the tool / emitter / agent cycle never materialises.
#[derive(Clone)]
pub struct ToolContext {
    /// Per-call cancellation scope, derived from the turn scope.  Tools
    /// running long operations must honour it.
    pub scope: CancellationToken,
    /// Sink for command-execution progress events, forwarded verbatim to
    /// the front-end by the agent loop.
    pub events: ToolEventSink,
    /// Registry of in-flight executions so the front-end can cancel one.
    pub commands: Arc<CommandRegistry>,
    /// Command whitelist policy for tools that spawn shell processes.
    pub policy: Arc<CommandPolicy>,
}

/// Trait that every tool must implement.
///
/// A tool opts into human approval by overriding [`Tool::generate_preview`]
/// to return `Some(..)`; the agent loop detects the capability by presence,
/// not by a marker type.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the accepted arguments
    fn schema(&self) -> Value;
    /// Loop-breaking tools terminate the turn on successful execution.
    fn is_loop_breaking(&self) -> bool {
        false
    }
    /// Previewable tools return `Some(Ok(preview))` describing the pending
    /// action.  `Some(Err(_))` degrades to unapproved execution; `None`
    /// (the default) skips the approval round-trip entirely.
    async fn generate_preview(
        &self,
        _ctx: &ToolContext,
        _args: &Value,
    ) -> Option<anyhow::Result<Preview>> {
        None
    }
    /// Execute the tool and return its text output.
    async fn execute(&self, ctx: &ToolContext, args: &Value) -> anyhow::Result<String>;
}

// ─── Test support ────────────────────────────────────────────────────────────


// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;

    fn test_ctx() -> ToolContext {
        tests_support::context()
    }

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> anyhow::Result<String> {
            Ok("ok".into())
        }
    }

    struct PreviewingTool;

    #[async_trait]
    impl Tool for PreviewingTool {
        fn name(&self) -> &str {
            "previewing"
        }
        fn description(&self) -> &str {
            "always previews"
        }
        fn schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn generate_preview(
            &self,
            _ctx: &ToolContext,
            _args: &Value,
        ) -> Option<anyhow::Result<Preview>> {
            Some(Ok(Preview::diff("write foo.rs", "+fn foo() {}").with_language("rust")))
        }
        async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> anyhow::Result<String> {
            Ok("written".into())
        }
    }

    #[tokio::test]
    async fn default_tool_has_no_preview() {
        let ctx = test_ctx();
        assert!(MinimalTool
            .generate_preview(&ctx, &json!({}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn previewable_tool_detected_by_capability_presence() {
        let ctx = test_ctx();
        let p = PreviewingTool
            .generate_preview(&ctx, &json!({}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p.kind, PreviewKind::Diff);
        assert_eq!(p.metadata.get("language").map(String::as_str), Some("rust"));
    }

    #[test]
    fn default_tool_is_not_loop_breaking() {
        assert!(!MinimalTool.is_loop_breaking());
    }

    #[test]
    fn preview_text_constructor_defaults() {
        let p = Preview::text("title", "body");
        assert_eq!(p.kind, PreviewKind::Text);
        assert!(p.metadata.is_empty());
    }
}
