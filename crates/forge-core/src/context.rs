// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context-window pressure management.
//!
//! Between iterations the loop asks the manager to evaluate token pressure
//! and, above the soft threshold, run the first applicable summarization
//! strategy.  Strategy failures are non-fatal: the turn continues with the
//! unsummarized memory and only the error event is emitted.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

use forge_model::Role;

use crate::{
    emitter::EventEmitter, events::AgentEvent, memory::Memory, tokenizer::TokenCounter,
};

/// Read-only snapshot of current token usage.  Computed on demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInfo {
    pub system_tokens: usize,
    pub tool_schema_tokens: usize,
    pub conversation_tokens: usize,
    pub current_total: usize,
    pub max_total: usize,
    pub free: usize,
    /// Fraction of the window consumed (0.0–1.0)
    pub percent: f32,
    pub cumulative_prompt: usize,
    pub cumulative_completion: usize,
}

/// What a summarization strategy produced.
pub struct SummarizeResult {
    pub memory: Memory,
    pub items_processed: usize,
    pub tokens_saved: usize,
}

/// A pluggable summarization strategy, consulted in registration order.
#[async_trait]
pub trait SummarizationStrategy: Send + Sync {
    fn name(&self) -> &str;
    /// Whether this strategy can act on the given usage snapshot.
    fn applicable(&self, usage: &ContextInfo) -> bool;
    /// Produce a smaller history.  `progress` reports incremental item
    /// counts for the front-end.
    async fn summarize(
        &self,
        memory: &Memory,
        counter: &TokenCounter,
        progress: &ProgressSink,
    ) -> anyhow::Result<SummarizeResult>;
}

/// Progress reporter handed to strategies; forwards to the event channel.
pub struct ProgressSink {
    emitter: EventEmitter,
    total_items: usize,
}

impl ProgressSink {
    pub fn report(&self, items_processed: usize) {
        self.emitter.emit(AgentEvent::ContextSummarizationProgress {
            items_processed,
            total_items: self.total_items,
        });
    }
}

/// Evaluates token pressure and drives summarization strategies.
pub struct ContextManager {
    strategies: Vec<Box<dyn SummarizationStrategy>>,
    soft_threshold: f32,
    cumulative_prompt: usize,
    cumulative_completion: usize,
}

impl ContextManager {
    pub fn new(soft_threshold: f32) -> Self {
        Self {
            strategies: Vec::new(),
            soft_threshold,
            cumulative_prompt: 0,
            cumulative_completion: 0,
        }
    }

    /// Register a strategy; earlier registrations take priority.
    pub fn register(&mut self, strategy: Box<dyn SummarizationStrategy>) {
        self.strategies.push(strategy);
    }

    /// Register a strategy at the front of the priority order.
    pub fn register_front(&mut self, strategy: Box<dyn SummarizationStrategy>) {
        self.strategies.insert(0, strategy);
    }

    /// Record one model call's token usage for the cumulative counters.
    pub fn record_usage(&mut self, prompt: usize, completion: usize) {
        self.cumulative_prompt += prompt;
        self.cumulative_completion += completion;
    }

    /// Compute the usage snapshot for the current memory state.
    pub fn info(
        &self,
        memory: &Memory,
        counter: &TokenCounter,
        system_tokens: usize,
        tool_schema_tokens: usize,
        max_total: usize,
    ) -> ContextInfo {
        let conversation_tokens = memory
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| counter.count_message(m))
            .sum::<usize>();
        let current_total = system_tokens + tool_schema_tokens + conversation_tokens;
        let free = max_total.saturating_sub(current_total);
        let percent = if max_total == 0 {
            0.0
        } else {
            current_total as f32 / max_total as f32
        };
        ContextInfo {
            system_tokens,
            tool_schema_tokens,
            conversation_tokens,
            current_total,
            max_total,
            free,
            percent,
            cumulative_prompt: self.cumulative_prompt,
            cumulative_completion: self.cumulative_completion,
        }
    }

    /// Below the soft threshold this is a no-op.  Above it, the first
    /// applicable strategy runs synchronously; on success the memory is
    /// replaced, on failure it is left untouched.
    pub async fn evaluate(
        &self,
        memory: &mut Memory,
        counter: &TokenCounter,
        usage: ContextInfo,
        emitter: &EventEmitter,
    ) {
        if usage.percent < self.soft_threshold {
            return;
        }
        let Some(strategy) = self.strategies.iter().find(|s| s.applicable(&usage)) else {
            return;
        };

        let total_items = memory.len();
        emitter.emit(AgentEvent::ContextSummarizationStart {
            strategy: strategy.name().to_string(),
            current_tokens: usage.current_total,
            max_tokens: usage.max_total,
            total_items,
        });

        let progress = ProgressSink {
            emitter: emitter.clone(),
            total_items,
        };
        let started = Instant::now();
        match strategy.summarize(memory, counter, &progress).await {
            Ok(result) => {
                let tokens_before = memory.token_count(counter);
                *memory = result.memory;
                let new_token_count = memory.token_count(counter);
                progress.report(result.items_processed);
                emitter.emit(AgentEvent::ContextSummarizationComplete {
                    new_token_count,
                    tokens_saved: tokens_before.saturating_sub(new_token_count),
                    duration: started.elapsed(),
                });
            }
            Err(e) => {
                warn!(strategy = strategy.name(), "summarization failed: {e}");
                emitter.emit(AgentEvent::ContextSummarizationError {
                    strategy: strategy.name().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Deterministic fallback strategy: drop the oldest non-system messages,
/// preserving all system messages and a recent tail.  Never calls a model,
/// so it always succeeds regardless of session size.
pub struct PruneOldestStrategy {
    keep_recent: usize,
}

impl PruneOldestStrategy {
    pub fn new(keep_recent: usize) -> Self {
        Self { keep_recent }
    }
}

#[async_trait]
impl SummarizationStrategy for PruneOldestStrategy {
    fn name(&self) -> &str {
        "prune_oldest"
    }

    fn applicable(&self, _usage: &ContextInfo) -> bool {
        true
    }

    async fn summarize(
        &self,
        memory: &Memory,
        _counter: &TokenCounter,
        progress: &ProgressSink,
    ) -> anyhow::Result<SummarizeResult> {
        let snapshot = memory.snapshot();
        let (system, non_system): (Vec<_>, Vec<_>) =
            snapshot.into_iter().partition(|m| m.role == Role::System);

        if non_system.len() <= self.keep_recent {
            anyhow::bail!("nothing to prune: history already within the recent tail");
        }
        let dropped = non_system.len() - self.keep_recent;
        let tail = non_system[dropped..].to_vec();

        let mut pruned = Memory::new();
        for m in system {
            pruned.append(m);
        }
        for (i, m) in tail.into_iter().enumerate() {
            pruned.append(m);
            progress.report(dropped + i + 1);
        }

        Ok(SummarizeResult {
            memory: pruned,
            items_processed: dropped,
            tokens_saved: 0, // recomputed by the manager
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
