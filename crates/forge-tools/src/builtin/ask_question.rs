// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::task_completion::value_as_text;
use crate::tool::{Tool, ToolContext};

/// Reserved loop-breaking tool the model calls when it needs clarification
/// from the user before it can continue.
pub struct AskQuestionTool;

#[async_trait]
impl Tool for AskQuestionTool {
    fn name(&self) -> &str {
        "ask_question"
    }

    fn description(&self) -> &str {
        "Ask the user a clarifying question and wait for their reply. \
         Use this when the task is ambiguous or missing information you \
         cannot discover with other tools. The turn ends after this call; \
         the user's answer arrives as the next user message."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to put to the user"
                }
            },
            "required": ["question"],
            "additionalProperties": false
        })
    }

    fn is_loop_breaking(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> anyhow::Result<String> {
        Ok(args.get("question").map(value_as_text).unwrap_or_default())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
