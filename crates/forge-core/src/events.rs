// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use forge_tools::Preview;

/// Events emitted by the agent during a turn.  Consumers (TUI, CI runner)
/// subscribe to these to drive their output.
///
/// Events are observational: a dropped event never affects correctness.
/// The loop nevertheless uses blocking sends for `TurnEnd`,
/// `ToolApprovalRequest` and the approval resolutions so subscribers cannot
/// miss turn boundaries or approval traffic.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The model opened a reasoning segment
    ThinkingStart,
    /// A reasoning text chunk
    ThinkingContent(String),
    /// The reasoning segment closed
    ThinkingEnd,
    /// The model opened a message segment
    MessageStart,
    /// A message text chunk (tool markers and bodies removed)
    MessageContent(String),
    /// The message segment closed
    MessageEnd,
    /// A tool invocation was detected in the stream; the name arrives as
    /// soon as the parser can identify it, before arguments complete
    ToolCallStart { metadata: ToolCallMetadata },
    /// A parsed tool call is about to execute
    ToolCall { tool_name: String, arguments: Value },
    /// The tool returned successfully
    ToolResult { tool_name: String, output: String },
    /// The tool returned an error
    ToolResultError { tool_name: String, error: String },
    /// A previewable tool awaits the user's decision
    ToolApprovalRequest {
        approval_id: String,
        tool_name: String,
        preview: Preview,
    },
    ToolApprovalGranted { approval_id: String },
    ToolApprovalRejected { approval_id: String },
    ToolApprovalTimeout { approval_id: String },
    /// The model produced no tool call this iteration
    NoToolCall,
    /// A recoverable or turn-ending error
    Error(String),
    /// Busy-indicator state for the front-end
    UpdateBusy(bool),
    /// The turn finished; always the last event of a turn
    TurnEnd,
    /// A model call is about to start
    ApiCallStart {
        prompt_tokens: usize,
        max_tokens: usize,
    },
    /// Token accounting for the completed model call
    TokenUsage {
        prompt: usize,
        completion: usize,
        total: usize,
    },
    // Long-running command progress, forwarded opaquely from tools.
    CommandExecutionStart {
        execution_id: String,
        command: String,
        working_dir: String,
    },
    CommandOutput {
        execution_id: String,
        chunk: String,
    },
    CommandExecutionComplete {
        execution_id: String,
        exit_code: i32,
        duration: Duration,
    },
    CommandExecutionFailed {
        execution_id: String,
        error: String,
        duration: Duration,
    },
    CommandExecutionCanceled {
        execution_id: String,
        duration: Duration,
    },
    // Context summarization progress.
    ContextSummarizationStart {
        strategy: String,
        current_tokens: usize,
        max_tokens: usize,
        total_items: usize,
    },
    ContextSummarizationProgress {
        items_processed: usize,
        total_items: usize,
    },
    ContextSummarizationComplete {
        new_token_count: usize,
        tokens_saved: usize,
        duration: Duration,
    },
    ContextSummarizationError {
        strategy: String,
        error: String,
    },
}

/// Early stream metadata for a tool call; fields fill in as parsing proceeds.
#[derive(Debug, Clone, Default)]
pub struct ToolCallMetadata {
    pub tool_name: Option<String>,
}

/// Inputs accepted on the agent's input channel.
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// A user utterance starting (or queueing) a turn
    UserInput {
        content: String,
        metadata: HashMap<String, String>,
    },
    /// Reserved; currently surfaces an error event
    FormInput { fields: HashMap<String, String> },
    /// Cancel the running turn
    CancelTurn,
}

impl InputEvent {
    pub fn user(content: impl Into<String>) -> Self {
        Self::UserInput {
            content: content.into(),
            metadata: HashMap::new(),
        }
    }
}

/// The front-end's answer to a [`AgentEvent::ToolApprovalRequest`].
#[derive(Debug, Clone)]
pub struct ApprovalResponse {
    pub approval_id: String,
    pub approved: bool,
}

/// Cancel one in-flight tool execution by its reported execution id.
#[derive(Debug, Clone)]
pub struct CancellationRequest {
    pub execution_id: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
