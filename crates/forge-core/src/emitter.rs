// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::AgentEvent;

/// Sending half of the bounded event channel.
///
/// Rendering-centric events go through [`EventEmitter::emit`], which drops
/// on a full channel rather than stalling the loop.  Correctness-critical
/// events (turn end, approval traffic) go through
/// [`EventEmitter::emit_blocking`], which waits for channel space so the
/// subscriber cannot miss them.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<AgentEvent>) -> Self {
        Self { tx }
    }

    /// Create an emitter and its receiver with the given bound.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Non-blocking send; the event is dropped when the subscriber is this
    /// far behind.
    pub fn emit(&self, event: AgentEvent) {
        if self.tx.try_send(event).is_err() {
            debug!("event channel full; rendering event dropped");
        }
    }

    /// Blocking send for events that must reach the subscriber.
    pub async fn emit_blocking(&self, event: AgentEvent) {
        // A closed channel means the subscriber is gone; nothing to deliver to.
        let _ = self.tx.send(event).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_delivers_when_capacity_available() {
        let (emitter, mut rx) = EventEmitter::channel(4);
        emitter.emit(AgentEvent::MessageStart);
        assert!(matches!(rx.recv().await, Some(AgentEvent::MessageStart)));
    }

    #[tokio::test]
    async fn emit_drops_when_full() {
        let (emitter, mut rx) = EventEmitter::channel(1);
        emitter.emit(AgentEvent::MessageStart);
        emitter.emit(AgentEvent::MessageEnd); // dropped
        assert!(matches!(rx.try_recv(), Ok(AgentEvent::MessageStart)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_blocking_waits_for_space() {
        let (emitter, mut rx) = EventEmitter::channel(1);
        emitter.emit(AgentEvent::MessageStart);

        let e2 = emitter.clone();
        let send = tokio::spawn(async move {
            e2.emit_blocking(AgentEvent::TurnEnd).await;
        });

        // Drain one slot so the blocking send can complete.
        assert!(matches!(rx.recv().await, Some(AgentEvent::MessageStart)));
        send.await.unwrap();
        assert!(matches!(rx.recv().await, Some(AgentEvent::TurnEnd)));
    }

    #[tokio::test]
    async fn emit_blocking_on_closed_channel_does_not_panic() {
        let (emitter, rx) = EventEmitter::channel(1);
        drop(rx);
        emitter.emit_blocking(AgentEvent::TurnEnd).await;
    }
}
