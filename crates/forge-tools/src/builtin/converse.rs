// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::task_completion::value_as_text;
use crate::tool::{Tool, ToolContext};

/// Reserved loop-breaking tool for conversational replies that need no
/// workspace interaction at all.
pub struct ConverseTool;

#[async_trait]
impl Tool for ConverseTool {
    fn name(&self) -> &str {
        "converse"
    }

    fn description(&self) -> &str {
        "Reply conversationally when the user is chatting rather than \
         requesting work (greetings, opinions, small talk). The 'message' \
         parameter is shown to the user verbatim and the turn ends."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The conversational reply"
                }
            },
            "required": ["message"],
            "additionalProperties": false
        })
    }

    fn is_loop_breaking(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> anyhow::Result<String> {
        Ok(args.get("message").map(value_as_text).unwrap_or_default())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn is_loop_breaking() {
        assert!(ConverseTool.is_loop_breaking());
    }

    #[tokio::test]
    async fn execute_returns_message() {
        let ctx = crate::tool::tests_support::context();
        let out = ConverseTool
            .execute(&ctx, &json!({"message": "hello there"}))
            .await
            .unwrap();
        assert_eq!(out, "hello there");
    }
}
