// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::{Message, StreamChunk};

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Boundary to a concrete language-model backend.
///
/// `stream` is the default path for agent turns; `complete` serves one-shot
/// helper work such as summarization.  Both take a cancellation scope and
/// must unblock promptly when it fires.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users and used for budget lookup.
    fn model_name(&self) -> &str;

    /// One-shot completion returning the full response text.
    async fn complete(
        &self,
        messages: Vec<Message>,
        scope: &CancellationToken,
    ) -> anyhow::Result<String>;

    /// Streaming completion.  The returned stream ends with an `is_last`
    /// chunk, or with an `error` chunk on mid-stream transport failure.
    async fn stream(
        &self,
        messages: Vec<Message>,
        scope: &CancellationToken,
    ) -> anyhow::Result<ChunkStream>;
}
