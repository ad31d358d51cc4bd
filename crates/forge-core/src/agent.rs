// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use forge_config::Config;
use forge_model::{Message, ModelProvider};
use forge_tools::{
    CommandPolicy, CommandRegistry, Tool, ToolContext, ToolEvent, ToolEventSink, ToolRegistry,
};

use crate::{
    approval::{ApprovalCoordinator, ApprovalOutcome},
    context::{ContextManager, PruneOldestStrategy, SummarizationStrategy},
    emitter::EventEmitter,
    events::AgentEvent,
    memory::Memory,
    parser::StreamParser,
    prompts::PromptAssembler,
    recovery::{ErrorRing, RecoveryMessage},
    tokenizer::TokenCounter,
    toolcall::{
        detect_dialect, parse_tool_call, Dialect, ToolCall, ToolCallError, TOOL_CALL_CLOSE,
        TOOL_CALL_OPEN,
    },
};

/// Memory note appended when the user cancels a turn; the turn then ends
/// without an error event.
const STOPPED_BY_USER: &str = "Operation stopped by user.";

/// Capacity of the tool-event channel between running tools and the loop.
const TOOL_EVENT_CAPACITY: usize = 64;

/// The agent core.  Owns one conversation and drives the model / tool loop
/// for one turn at a time.
pub struct Agent {
    memory: Memory,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn ModelProvider>,
    config: Arc<Config>,
    assembler: PromptAssembler,
    context: ContextManager,
    counter: TokenCounter,
    approvals: Arc<ApprovalCoordinator>,
    commands: Arc<CommandRegistry>,
    policy: Arc<CommandPolicy>,
    emitter: EventEmitter,
    breaker: ErrorRing,
    tool_events: ToolEventSink,
    tool_events_rx: mpsc::Receiver<ToolEvent>,
    max_context_tokens: usize,
}

/// What one tool dispatch decided about the turn.
enum DispatchOutcome {
    /// Iterate: result or synthetic note already appended to memory
    Continue,
    /// A loop-breaking tool succeeded
    TurnEnds,
    /// Recoverable failure; feeds the circuit breaker
    Failed(RecoveryMessage),
    /// The turn scope was cancelled while the tool was in flight
    CancelledTurn,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        config: Arc<Config>,
        emitter: EventEmitter,
        approvals: Arc<ApprovalCoordinator>,
        commands: Arc<CommandRegistry>,
    ) -> Self {
        let max_context_tokens = config
            .model
            .max_context_tokens
            .filter(|_| config.model.name == model.model_name())
            .unwrap_or_else(|| config.agent.max_context_tokens(model.model_name()));

        let mut context = ContextManager::new(config.agent.context_soft_threshold);
        context.register(Box::new(PruneOldestStrategy::new(config.agent.keep_recent)));

        let policy = Arc::new(CommandPolicy::from_config(&config.tools));
        let assembler = PromptAssembler::new(config.agent.user_instructions.clone());
        let (tool_events, tool_events_rx) = ToolEventSink::channel(TOOL_EVENT_CAPACITY);

        Self {
            memory: Memory::new(),
            tools,
            model,
            config,
            assembler,
            context,
            counter: TokenCounter::approximate(),
            approvals,
            commands,
            policy,
            emitter,
            breaker: ErrorRing::new(),
            tool_events,
            tool_events_rx,
            max_context_tokens,
        }
    }

    /// Install a real tokenizer in place of the chars/4 fallback.
    pub fn set_tokenizer(&mut self, counter: TokenCounter) {
        self.counter = counter;
    }

    /// Register an additional summarization strategy ahead of the built-in
    /// pruning fallback.
    pub fn register_strategy(&mut self, strategy: Box<dyn SummarizationStrategy>) {
        self.context.register_front(strategy);
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Run one turn: append the user input and iterate until a
    /// loop-breaking tool fires, the turn is cancelled, the circuit breaker
    /// trips, or a transport error occurs.  All failures surface as events;
    /// the agent itself never dies with the turn.
    pub async fn run_turn(&mut self, input: &str, scope: CancellationToken) {
        self.emitter.emit(AgentEvent::UpdateBusy(true));
        self.memory.append(Message::user(input));

        let mut recovery: Option<RecoveryMessage> = None;

        loop {
            // Iteration boundary: a cancelled turn ends silently with a
            // memory note only.
            if scope.is_cancelled() {
                self.memory.append(Message::user(STOPPED_BY_USER));
                break;
            }

            // Fresh system prompt every iteration; the tool set can change
            // under runtime registration.
            let schemas = self.tools.schemas();
            let system_prompt = self.assembler.system_prompt(&schemas);
            let schema_tokens: usize = schemas
                .iter()
                .map(|s| {
                    self.counter.count(&s.name)
                        + self.counter.count(&s.description)
                        + self.counter.count(&s.parameters.to_string())
                })
                .sum();
            let system_tokens = self
                .counter
                .count(&system_prompt)
                .saturating_sub(schema_tokens);

            // Token pressure check; summarization failures are non-fatal.
            let usage = self.context.info(
                &self.memory,
                &self.counter,
                system_tokens,
                schema_tokens,
                self.max_context_tokens,
            );
            self.context
                .evaluate(&mut self.memory, &self.counter, usage, &self.emitter)
                .await;

            // The recovery message rides along for this iteration only and
            // is never stored in memory.
            let rec = recovery.take();
            let messages = self
                .assembler
                .render(&system_prompt, self.memory.snapshot(), rec.as_ref());
            let prompt_tokens = self.counter.count_messages(&messages);
            self.emitter.emit(AgentEvent::ApiCallStart {
                prompt_tokens,
                max_tokens: self.max_context_tokens,
            });

            let stream = match self.model.stream(messages, &scope).await {
                Ok(s) => s,
                Err(e) => {
                    if scope.is_cancelled() {
                        self.memory.append(Message::user(STOPPED_BY_USER));
                    } else {
                        self.emitter
                            .emit(AgentEvent::Error(format!("model stream failed: {e:#}")));
                    }
                    break;
                }
            };

            let parser = StreamParser::new(self.emitter.clone());
            let outcome = tokio::select! {
                biased;
                _ = scope.cancelled() => None,
                outcome = parser.consume(stream) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                self.memory.append(Message::user(STOPPED_BY_USER));
                break;
            };

            let completion_tokens = self.counter.count(&outcome.message)
                + self.counter.count(&outcome.thinking)
                + self.counter.count(&outcome.tool_body);
            self.context.record_usage(prompt_tokens, completion_tokens);
            self.emitter.emit(AgentEvent::TokenUsage {
                prompt: prompt_tokens,
                completion: completion_tokens,
                total: prompt_tokens + completion_tokens,
            });

            // Persist the assistant message with the raw tool segment
            // wrapped, byte-for-byte, so replayed history preserves the
            // model's own invocation.
            let assistant = compose_assistant_content(&outcome.message, &outcome.tool_body);
            if !assistant.is_empty() {
                self.memory.append(Message::assistant(assistant));
            }

            if outcome.error.is_some() {
                // Mid-stream transport failure; the parser already emitted
                // the error event.
                break;
            }

            let dialect = detect_dialect(&outcome.tool_body);
            match parse_tool_call(&outcome.tool_body) {
                Err(ToolCallError::Empty) => {
                    self.emitter.emit(AgentEvent::NoToolCall);
                    if self.record_failure(RecoveryMessage::no_tool_call(dialect), &mut recovery) {
                        break;
                    }
                }
                Err(ToolCallError::Malformed(snippet)) => {
                    self.emitter.emit(AgentEvent::Error(format!(
                        "tool call payload could not be parsed: {snippet}"
                    )));
                    if self.record_failure(
                        RecoveryMessage::invalid_payload(&snippet, dialect),
                        &mut recovery,
                    ) {
                        break;
                    }
                }
                Err(ToolCallError::MissingToolName) => {
                    self.emitter
                        .emit(AgentEvent::Error("tool call is missing the tool name".into()));
                    if self
                        .record_failure(RecoveryMessage::missing_tool_name(dialect), &mut recovery)
                    {
                        break;
                    }
                }
                Ok(call) => match self.tools.get(&call.tool_name) {
                    None => {
                        self.emitter.emit(AgentEvent::Error(format!(
                            "unknown tool '{}'",
                            call.tool_name
                        )));
                        let msg = RecoveryMessage::unknown_tool(
                            &call.tool_name,
                            &self.tools.names(),
                            dialect,
                        );
                        if self.record_failure(msg, &mut recovery) {
                            break;
                        }
                    }
                    Some(tool) => match self.dispatch(tool, call, &scope, dialect).await {
                        DispatchOutcome::Continue => {}
                        DispatchOutcome::TurnEnds => break,
                        DispatchOutcome::Failed(msg) => {
                            if self.record_failure(msg, &mut recovery) {
                                break;
                            }
                        }
                        DispatchOutcome::CancelledTurn => {
                            self.memory.append(Message::user(STOPPED_BY_USER));
                            break;
                        }
                    },
                },
            }
        }

        // Both sends block so subscribers cannot miss the turn boundary;
        // TurnEnd is the last event of the turn.
        self.emitter.emit_blocking(AgentEvent::UpdateBusy(false)).await;
        self.emitter.emit_blocking(AgentEvent::TurnEnd).await;
    }

    /// Push a recovery message into the breaker ring.  Returns `true` when
    /// the breaker tripped and the turn must end; otherwise arms the
    /// recovery injection for the next iteration.
    fn record_failure(
        &mut self,
        msg: RecoveryMessage,
        recovery: &mut Option<RecoveryMessage>,
    ) -> bool {
        self.breaker.push(msg.clone());
        if let Some(kind) = self.breaker.tripped() {
            self.emitter.emit(AgentEvent::Error(format!(
                "circuit breaker triggered: 5 consecutive {} errors",
                kind.as_str()
            )));
            true
        } else {
            *recovery = Some(msg);
            false
        }
    }

    /// Execute one known tool: optional preview/approval round-trip, then
    /// execution under a per-call scope with live tool-event forwarding.
    async fn dispatch(
        &mut self,
        tool: Arc<dyn Tool>,
        call: ToolCall,
        scope: &CancellationToken,
        dialect: Dialect,
    ) -> DispatchOutcome {
        let tool_name = tool.name().to_string();
        let call_scope = scope.child_token();
        let ctx = ToolContext {
            scope: call_scope.clone(),
            events: self.tool_events.clone(),
            commands: Arc::clone(&self.commands),
            policy: Arc::clone(&self.policy),
        };

        if !self.config.tools.is_tool_auto_approved(&tool_name) {
            if let Some(preview) = tool.generate_preview(&ctx, &call.arguments).await {
                match preview {
                    Err(e) => {
                        // Degraded mode: a broken UI affordance must not
                        // block progress; execute without approval.
                        self.emitter.emit(AgentEvent::Error(format!(
                            "preview generation failed for '{tool_name}': {e:#}"
                        )));
                    }
                    Ok(preview) => {
                        let ticket = self.approvals.request(&tool_name);
                        let approval_id = ticket.id().to_string();
                        self.emitter
                            .emit_blocking(AgentEvent::ToolApprovalRequest {
                                approval_id: approval_id.clone(),
                                tool_name: tool_name.clone(),
                                preview,
                            })
                            .await;
                        match self.approvals.wait(ticket, scope).await {
                            ApprovalOutcome::Approved => {
                                self.emitter
                                    .emit_blocking(AgentEvent::ToolApprovalGranted {
                                        approval_id,
                                    })
                                    .await;
                            }
                            ApprovalOutcome::Rejected => {
                                self.emitter
                                    .emit_blocking(AgentEvent::ToolApprovalRejected {
                                        approval_id,
                                    })
                                    .await;
                                self.memory.append(Message::user(format!(
                                    "Tool '{tool_name}' execution was rejected by user."
                                )));
                                return DispatchOutcome::Continue;
                            }
                            ApprovalOutcome::TimedOut => {
                                self.emitter
                                    .emit_blocking(AgentEvent::ToolApprovalTimeout {
                                        approval_id,
                                    })
                                    .await;
                                self.memory.append(Message::user(format!(
                                    "Tool '{tool_name}' approval timed out after {}s; \
                                     the tool was not executed.",
                                    self.approvals.timeout().as_secs()
                                )));
                                return DispatchOutcome::Continue;
                            }
                            ApprovalOutcome::Cancelled => {
                                return DispatchOutcome::CancelledTurn;
                            }
                        }
                    }
                }
            }
        }

        self.emitter.emit(AgentEvent::ToolCall {
            tool_name: tool_name.clone(),
            arguments: call.arguments.clone(),
        });

        // Run the tool in its own task so the loop can forward tool events
        // while execution is in flight.
        let task_tool = Arc::clone(&tool);
        let task_ctx = ctx.clone();
        let args = call.arguments.clone();
        let mut join =
            tokio::spawn(async move { task_tool.execute(&task_ctx, &args).await });

        let emitter = self.emitter.clone();
        let commands = Arc::clone(&self.commands);
        // Execution ids this call registered, so the registry can be swept
        // even when a tool dies without its terminal event.
        let mut registered: Vec<String> = Vec::new();
        let rx = &mut self.tool_events_rx;
        let result = loop {
            tokio::select! {
                biased;
                _ = scope.cancelled() => {
                    join.abort();
                    for id in &registered {
                        commands.deregister(id);
                    }
                    return DispatchOutcome::CancelledTurn;
                }
                Some(ev) = rx.recv() => {
                    forward_tool_event(&emitter, &commands, &call_scope, &mut registered, ev);
                }
                res = &mut join => {
                    break match res {
                        Ok(r) => r,
                        Err(e) => Err(anyhow::anyhow!("tool task failed: {e}")),
                    };
                }
            }
        };
        // Flush events the tool emitted right before finishing, then sweep
        // any execution id left behind.
        while let Ok(ev) = self.tool_events_rx.try_recv() {
            forward_tool_event(&self.emitter, &self.commands, &call_scope, &mut registered, ev);
        }
        for id in &registered {
            self.commands.deregister(id);
        }

        if scope.is_cancelled() {
            return DispatchOutcome::CancelledTurn;
        }

        match result {
            Ok(output) => {
                self.emitter.emit(AgentEvent::ToolResult {
                    tool_name: tool_name.clone(),
                    output: output.clone(),
                });
                self.breaker.clear();
                if tool.is_loop_breaking() {
                    DispatchOutcome::TurnEnds
                } else {
                    self.memory.append(Message::user(format!(
                        "Tool '{tool_name}' result:\n{output}"
                    )));
                    DispatchOutcome::Continue
                }
            }
            Err(e) => {
                // Per-tool cancellation lands here too: the cancelled tool
                // reports an error and the loop iterates normally.
                let error = format!("{e:#}");
                debug!(tool = %tool_name, "tool execution failed: {error}");
                self.emitter.emit(AgentEvent::ToolResultError {
                    tool_name: tool_name.clone(),
                    error: error.clone(),
                });
                DispatchOutcome::Failed(RecoveryMessage::tool_execution(
                    &tool_name, &error, dialect,
                ))
            }
        }
    }
}

/// Translate a tool event to the outbound union, maintaining the command
/// registry so front-end cancellations can reach the execution's scope.
fn forward_tool_event(
    emitter: &EventEmitter,
    commands: &CommandRegistry,
    call_scope: &CancellationToken,
    registered: &mut Vec<String>,
    ev: ToolEvent,
) {
    if let ToolEvent::CommandExecutionStart { execution_id, .. } = &ev {
        commands.register(execution_id, call_scope.clone());
        registered.push(execution_id.clone());
    } else if ev.is_terminal() {
        commands.deregister(ev.execution_id());
        registered.retain(|id| id != ev.execution_id());
    }
    let translated = match ev {
        ToolEvent::CommandExecutionStart {
            execution_id,
            command,
            working_dir,
        } => AgentEvent::CommandExecutionStart {
            execution_id,
            command,
            working_dir,
        },
        ToolEvent::CommandOutput {
            execution_id,
            chunk,
        } => AgentEvent::CommandOutput {
            execution_id,
            chunk,
        },
        ToolEvent::CommandExecutionComplete {
            execution_id,
            exit_code,
            duration,
        } => AgentEvent::CommandExecutionComplete {
            execution_id,
            exit_code,
            duration,
        },
        ToolEvent::CommandExecutionFailed {
            execution_id,
            error,
            duration,
        } => AgentEvent::CommandExecutionFailed {
            execution_id,
            error,
            duration,
        },
        ToolEvent::CommandExecutionCanceled {
            execution_id,
            duration,
        } => AgentEvent::CommandExecutionCanceled {
            execution_id,
            duration,
        },
    };
    emitter.emit(translated);
}

/// Rebuild the assistant message for memory: visible text plus the raw tool
/// segment, re-wrapped in its markers exactly as the model wrote it.
fn compose_assistant_content(message: &str, tool_body: &str) -> String {
    let msg = message.trim();
    if tool_body.is_empty() {
        msg.to_string()
    } else if msg.is_empty() {
        format!("{TOOL_CALL_OPEN}{tool_body}{TOOL_CALL_CLOSE}")
    } else {
        format!("{msg}\n{TOOL_CALL_OPEN}{tool_body}{TOOL_CALL_CLOSE}")
    }
}

/// Convenience constructor for the approval coordinator matching the
/// configured timeout.
pub fn approval_coordinator(config: &Config) -> Arc<ApprovalCoordinator> {
    Arc::new(ApprovalCoordinator::new(Duration::from_secs(
        config.agent.approval_timeout_secs,
    )))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_plain_message() {
        assert_eq!(compose_assistant_content("hello ", ""), "hello");
    }

    #[test]
    fn compose_wraps_tool_body_verbatim() {
        let body = "<tool_name>t</tool_name>";
        let out = compose_assistant_content("working", body);
        assert_eq!(
            out,
            format!("working\n{TOOL_CALL_OPEN}{body}{TOOL_CALL_CLOSE}")
        );
    }

    #[test]
    fn compose_tool_only_message() {
        let body = "<tool_name>t</tool_name>";
        let out = compose_assistant_content("", body);
        assert_eq!(out, format!("{TOOL_CALL_OPEN}{body}{TOOL_CALL_CLOSE}"));
    }

    #[test]
    fn compose_preserves_escaped_bytes_without_reescaping() {
        let body = "<arguments><x>&lt;raw&gt;</x></arguments>";
        let out = compose_assistant_content("", body);
        assert!(out.contains("&lt;raw&gt;"), "bytes must round-trip exactly");
    }
}
