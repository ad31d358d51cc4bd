// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext};

/// Reserved loop-breaking tool the model calls to deliver its final answer.
pub struct TaskCompletionTool;

#[async_trait]
impl Tool for TaskCompletionTool {
    fn name(&self) -> &str {
        "task_completion"
    }

    fn description(&self) -> &str {
        "Signal that the task is complete and deliver the final answer to the user. \
         Call this exactly once, when no further tool calls are needed. \
         The 'result' parameter is shown to the user verbatim."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "The final answer or completion summary"
                }
            },
            "required": ["result"],
            "additionalProperties": false
        })
    }

    fn is_loop_breaking(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> anyhow::Result<String> {
        let result = args
            .get("result")
            .map(value_as_text)
            .unwrap_or_default();
        Ok(result)
    }
}

/// Render a JSON argument leaf as user-facing text without quoting strings.
pub(crate) fn value_as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
