// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Error-recovery messages and the iteration circuit breaker.
//!
//! When an iteration fails in a recoverable way (no tool call, bad payload,
//! unknown tool, tool error), the loop injects a synthetic user message on
//! the next iteration only; it is never stored in memory.  The last five
//! recovery texts feed a ring buffer; five identical consecutive entries
//! trip the breaker and end the turn.

use crate::toolcall::Dialect;

/// Classification of a recoverable iteration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    NoToolCall,
    InvalidPayload,
    MissingToolName,
    UnknownTool,
    ToolExecution,
}

impl RecoveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryKind::NoToolCall => "no_tool_call",
            RecoveryKind::InvalidPayload => "invalid_payload",
            RecoveryKind::MissingToolName => "missing_tool_name",
            RecoveryKind::UnknownTool => "unknown_tool",
            RecoveryKind::ToolExecution => "tool_execution",
        }
    }
}

/// A synthetic user-role guidance message for the next iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryMessage {
    pub kind: RecoveryKind,
    pub text: String,
}

impl RecoveryMessage {
    /// The model produced no tool section at all.
    pub fn no_tool_call(dialect: Dialect) -> Self {
        Self {
            kind: RecoveryKind::NoToolCall,
            text: format!(
                "Your last response did not contain a tool call. Every response \
                 must invoke exactly one tool. Use a loop-breaking tool \
                 (task_completion, ask_question, converse) when you are done.\n{}",
                format_reminder(dialect)
            ),
        }
    }

    /// The tool body did not parse in either dialect.
    pub fn invalid_payload(snippet: &str, dialect: Dialect) -> Self {
        Self {
            kind: RecoveryKind::InvalidPayload,
            text: format!(
                "Your tool call could not be parsed. The offending payload was:\n\
                 {snippet}\n\
                 Emit a single well-formed tool call.\n{}",
                format_reminder(dialect)
            ),
        }
    }

    /// The payload parsed but carried no tool name.
    pub fn missing_tool_name(dialect: Dialect) -> Self {
        Self {
            kind: RecoveryKind::MissingToolName,
            text: format!(
                "Your tool call did not specify which tool to run. \
                 Include the tool_name field.\n{}",
                format_reminder(dialect)
            ),
        }
    }

    /// The named tool is not registered.
    pub fn unknown_tool(name: &str, available: &[String], dialect: Dialect) -> Self {
        Self {
            kind: RecoveryKind::UnknownTool,
            text: format!(
                "The tool '{name}' does not exist. Available tools: {}.\n{}",
                available.join(", "),
                format_reminder(dialect)
            ),
        }
    }

    /// The tool ran and returned an error.
    pub fn tool_execution(name: &str, error: &str, dialect: Dialect) -> Self {
        Self {
            kind: RecoveryKind::ToolExecution,
            text: format!(
                "The tool '{name}' failed with:\n{error}\n\
                 Adjust your approach and continue; if the failure is \
                 unrecoverable, report it via task_completion.\n{}",
                format_reminder(dialect)
            ),
        }
    }
}

/// Format reminder matching the dialect the model last used, detected from
/// its last failed tool body.
fn format_reminder(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Tagged => {
            "Format reminder:\n\
             <tool_call>\n\
             <tool_name>NAME</tool_name>\n\
             <arguments>\n\
             <param>value</param>\n\
             </arguments>\n\
             </tool_call>"
        }
        Dialect::Compact => {
            "Format reminder:\n\
             <tool_call>\n\
             {\"tool_name\": \"NAME\", \"arguments\": {\"param\": \"value\"}}\n\
             </tool_call>"
        }
    }
}

/// Fixed-size ring of the last five recovery messages.
///
/// The breaker trips when all five slots hold the same text; any successful
/// iteration clears the ring.
#[derive(Debug, Default)]
pub struct ErrorRing {
    slots: [Option<RecoveryMessage>; 5],
    cursor: usize,
}

impl ErrorRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: RecoveryMessage) {
        self.slots[self.cursor] = Some(msg);
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// When the breaker has tripped, the kind of the repeated failure.
    pub fn tripped(&self) -> Option<RecoveryKind> {
        let first = self.slots[0].as_ref()?;
        for slot in &self.slots[1..] {
            match slot {
                Some(m) if m.text == first.text => {}
                _ => return None,
            }
        }
        Some(first.kind)
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
        self.cursor = 0;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_render_snake_case() {
        assert_eq!(RecoveryKind::NoToolCall.as_str(), "no_tool_call");
        assert_eq!(RecoveryKind::ToolExecution.as_str(), "tool_execution");
    }

    #[test]
    fn ring_trips_on_five_identical() {
        let mut ring = ErrorRing::new();
        for _ in 0..4 {
            ring.push(RecoveryMessage::no_tool_call(Dialect::Tagged));
            assert!(ring.tripped().is_none());
        }
        ring.push(RecoveryMessage::no_tool_call(Dialect::Tagged));
        assert_eq!(ring.tripped(), Some(RecoveryKind::NoToolCall));
    }

    #[test]
    fn intervening_different_message_prevents_trip() {
        let mut ring = ErrorRing::new();
        for _ in 0..3 {
            ring.push(RecoveryMessage::no_tool_call(Dialect::Tagged));
        }
        ring.push(RecoveryMessage::missing_tool_name(Dialect::Tagged));
        ring.push(RecoveryMessage::no_tool_call(Dialect::Tagged));
        assert!(ring.tripped().is_none());
    }

    #[test]
    fn clear_resets_the_ring() {
        let mut ring = ErrorRing::new();
        for _ in 0..5 {
            ring.push(RecoveryMessage::no_tool_call(Dialect::Tagged));
        }
        assert!(ring.tripped().is_some());
        ring.clear();
        assert!(ring.tripped().is_none());
        // Four more identical pushes must not trip a cleared ring.
        for _ in 0..4 {
            ring.push(RecoveryMessage::no_tool_call(Dialect::Tagged));
        }
        assert!(ring.tripped().is_none());
    }

    #[test]
    fn trip_requires_identical_text_not_just_kind() {
        let mut ring = ErrorRing::new();
        for i in 0..5 {
            ring.push(RecoveryMessage::unknown_tool(
                &format!("tool{i}"),
                &["a".into()],
                Dialect::Tagged,
            ));
        }
        assert!(ring.tripped().is_none());
    }

    #[test]
    fn recovery_message_matches_dialect() {
        let tagged = RecoveryMessage::no_tool_call(Dialect::Tagged);
        assert!(tagged.text.contains("<tool_name>NAME</tool_name>"));
        let compact = RecoveryMessage::no_tool_call(Dialect::Compact);
        assert!(compact.text.contains("\"tool_name\": \"NAME\""));
    }

    #[test]
    fn unknown_tool_lists_available() {
        let msg = RecoveryMessage::unknown_tool(
            "frobnicate",
            &["calculator".into(), "task_completion".into()],
            Dialect::Tagged,
        );
        assert!(msg.text.contains("frobnicate"));
        assert!(msg.text.contains("calculator, task_completion"));
    }
}
