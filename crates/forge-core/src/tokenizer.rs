// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use forge_model::Message;

/// A real tokenizer backend (e.g. a BPE vocabulary for the active model).
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Token-counting adapter used everywhere the core needs a size estimate.
///
/// Wraps an optional [`Tokenizer`]; when none is installed it degrades to
/// the 4-characters-per-token heuristic, which is close enough for budget
/// decisions and never underestimates pathologically.
#[derive(Default)]
pub struct TokenCounter {
    inner: Option<Box<dyn Tokenizer>>,
}

impl TokenCounter {
    pub fn new(inner: Box<dyn Tokenizer>) -> Self {
        Self { inner: Some(inner) }
    }

    /// The chars/4 fallback counter.
    pub fn approximate() -> Self {
        Self { inner: None }
    }

    pub fn count(&self, text: &str) -> usize {
        match &self.inner {
            Some(t) => t.count(text),
            None => (text.len() / 4).max(1),
        }
    }

    pub fn count_message(&self, msg: &Message) -> usize {
        self.count(&msg.content)
    }

    pub fn count_messages(&self, msgs: &[Message]) -> usize {
        msgs.iter().map(|m| self.count_message(m)).sum()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
