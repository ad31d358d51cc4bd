// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod approval;
mod channels;
mod context;
mod emitter;
mod events;
mod memory;
mod parser;
mod prompts;
mod recovery;
mod tokenizer;
mod toolcall;

pub use agent::{approval_coordinator, Agent};
pub use approval::{ApprovalCoordinator, ApprovalInfo, ApprovalOutcome, ApprovalTicket};
pub use channels::{spawn_agent, AgentHandle};
pub use context::{
    ContextInfo, ContextManager, ProgressSink, PruneOldestStrategy, SummarizationStrategy,
    SummarizeResult,
};
pub use emitter::EventEmitter;
pub use events::{
    AgentEvent, ApprovalResponse, CancellationRequest, InputEvent, ToolCallMetadata,
};
pub use memory::Memory;
pub use parser::{StreamOutcome, StreamParser};
pub use prompts::PromptAssembler;
pub use recovery::{ErrorRing, RecoveryKind, RecoveryMessage};
pub use tokenizer::{TokenCounter, Tokenizer};
pub use toolcall::{
    detect_dialect, parse_tool_call, Dialect, ToolCall, ToolCallError, DEFAULT_SERVER_NAME,
    TOOL_CALL_CLOSE, TOOL_CALL_OPEN,
};
