// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use forge_model::{Message, Role};

use crate::tokenizer::TokenCounter;

/// Append-only conversation memory for one agent session.
///
/// Invariant: system messages, when present, appear before all non-system
/// messages.  Messages are never mutated after append; readers get
/// defensive copies via [`Memory::snapshot`].
#[derive(Debug, Default)]
pub struct Memory {
    messages: Vec<Message>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.  System messages are inserted after any existing
    /// system prefix so the ordering invariant holds regardless of append
    /// order.
    pub fn append(&mut self, msg: Message) {
        if msg.role == Role::System {
            let at = self.system_prefix_len();
            self.messages.insert(at, msg);
        } else {
            self.messages.push(msg);
        }
    }

    /// Defensive copy of the current message list.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Replace the whole history (summarization result).  The caller is
    /// responsible for handing over a list that already satisfies the
    /// system-first invariant; lists that do not are reordered.
    pub fn replace(&mut self, messages: Vec<Message>) {
        let (mut system, rest): (Vec<Message>, Vec<Message>) =
            messages.into_iter().partition(|m| m.role == Role::System);
        system.extend(rest);
        self.messages = system;
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Total token estimate for the current history.
    pub fn token_count(&self, counter: &TokenCounter) -> usize {
        counter.count_messages(&self.messages)
    }

    /// Drop messages until the history fits `budget` tokens.
    ///
    /// All system messages are preserved, then as many of the newest
    /// non-system messages as fit.  When the system messages alone exceed
    /// the budget, only the most recent system message is kept.
    pub fn prune_to_budget(&mut self, budget: usize, counter: &TokenCounter) {
        let sys_end = self.system_prefix_len();
        let system_tokens: usize = self.messages[..sys_end]
            .iter()
            .map(|m| counter.count_message(m))
            .sum();

        if system_tokens > budget {
            // Keep only the most recent system message.
            let keep = self.messages[..sys_end].last().cloned();
            self.messages.clear();
            if let Some(m) = keep {
                self.messages.push(m);
            }
            return;
        }

        let mut used = system_tokens;
        let mut kept: Vec<Message> = Vec::new();
        for msg in self.messages[sys_end..].iter().rev() {
            let cost = counter.count_message(msg);
            if used + cost > budget {
                break;
            }
            used += cost;
            kept.push(msg.clone());
        }
        kept.reverse();
        self.messages.truncate(sys_end);
        self.messages.extend(kept);
    }

    fn system_prefix_len(&self) -> usize {
        self.messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
