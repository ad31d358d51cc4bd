// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// A single message in the conversation history.
///
/// Assistant messages embed the raw tool-call segment verbatim so that
/// replaying history preserves the model's own invocation bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One chunk of a streamed model response.
///
/// Chunks arrive at arbitrary granularity; a single semantic segment may be
/// split across many chunks.  `is_thinking` classifies reasoning tokens,
/// `is_last` closes the stream, and `error` carries a mid-stream transport
/// failure (the stream ends after an error chunk).
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    /// Producer tag when the backend reports one ("assistant")
    pub role: Option<String>,
    pub content: String,
    pub is_thinking: bool,
    pub is_last: bool,
    pub error: Option<String>,
}

impl StreamChunk {
    /// Plain message-text chunk.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Reasoning chunk.
    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_thinking: true,
            ..Self::default()
        }
    }

    /// Terminal chunk with no content.
    pub fn last() -> Self {
        Self {
            is_last: true,
            ..Self::default()
        }
    }

    /// Mid-stream transport failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            is_last: true,
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
