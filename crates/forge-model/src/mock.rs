// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::{provider::ChunkStream, Message, ModelProvider, Role, StreamChunk};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        _scope: &CancellationToken,
    ) -> anyhow::Result<String> {
        Ok(format!("MOCK: {}", last_user_text(&messages)))
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        _scope: &CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        let chunks = vec![
            StreamChunk::text(format!("MOCK: {}", last_user_text(&messages)))
                .with_role("assistant"),
            StreamChunk::last(),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

fn last_user_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_else(|| "[no input]".into())
}

/// A pre-scripted mock provider.  Each call to `stream` pops the next chunk
/// script from the front of the queue, so tests can specify exact streams,
/// including tool bodies split across chunk boundaries, without network
/// access.  `complete` pops a script too and returns its concatenated
/// non-thinking text (used by summarization strategies under test).
pub struct ScriptedStreamProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamChunk>>>>,
    name: String,
    model: String,
    /// The last message list seen by this provider.  Written on each call
    /// so tests can inspect what was rendered for the model.
    pub last_request: Arc<Mutex<Option<Vec<Message>>>>,
}

impl ScriptedStreamProvider {
    /// Build a provider from a list of chunk scripts.  The outer `Vec` is
    /// the ordered list of calls; the inner `Vec` is the chunk sequence
    /// emitted for that call.
    pub fn new(scripts: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            name: "scripted-mock".into(),
            model: "scripted-mock-model".into(),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Convenience: provider that always streams a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            StreamChunk::text(reply).with_role("assistant"),
            StreamChunk::last(),
        ]])
    }

    /// Convenience: one script whose message text embeds `body` between the
    /// given markers, followed by a second plain-text script.
    pub fn tool_then_text(
        open: &str,
        close: &str,
        body: &str,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                StreamChunk::text(format!("{open}{body}{close}")).with_role("assistant"),
                StreamChunk::last(),
            ],
            vec![
                StreamChunk::text(final_text).with_role("assistant"),
                StreamChunk::last(),
            ],
        ])
    }

    fn pop_script(&self) -> Vec<StreamChunk> {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            // Default fallback when all scripts are consumed
            vec![
                StreamChunk::text("[no more scripts]").with_role("assistant"),
                StreamChunk::last(),
            ]
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedStreamProvider {
    fn name(&self) -> &str {
        &self.name
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        _scope: &CancellationToken,
    ) -> anyhow::Result<String> {
        *self.last_request.lock().unwrap() = Some(messages);
        let text = self
            .pop_script()
            .into_iter()
            .filter(|c| !c.is_thinking)
            .map(|c| c.content)
            .collect::<String>();
        Ok(text)
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        _scope: &CancellationToken,
    ) -> anyhow::Result<ChunkStream> {
        *self.last_request.lock().unwrap() = Some(messages);
        Ok(Box::pin(stream::iter(self.pop_script())))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
