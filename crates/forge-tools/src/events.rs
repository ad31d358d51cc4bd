// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use tokio::sync::mpsc;

/// Progress events emitted by long-running tools (notably shell execution).
/// The agent loop forwards these to the front-end verbatim; it never
/// interprets them beyond registering the execution id for cancellation.
#[derive(Debug, Clone)]
pub enum ToolEvent {
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
}

impl ToolEvent {
    /// The execution id this event refers to.
    pub fn execution_id(&self) -> &str {
        match self {
            ToolEvent::CommandExecutionStart { execution_id, .. }
            | ToolEvent::CommandOutput { execution_id, .. }
            | ToolEvent::CommandExecutionComplete { execution_id, .. }
            | ToolEvent::CommandExecutionFailed { execution_id, .. }
            | ToolEvent::CommandExecutionCanceled { execution_id, .. } => execution_id,
        }
    }

    /// True for the terminal Complete / Failed / Canceled variants.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolEvent::CommandExecutionComplete { .. }
                | ToolEvent::CommandExecutionFailed { .. }
                | ToolEvent::CommandExecutionCanceled { .. }
        )
    }
}

/// Sending half of the tool-event channel, handed to tools through the
/// execution context.  Sends never block the tool: a full channel drops the
/// event, which is acceptable because tool events are observational.
#[derive(Clone)]
pub struct ToolEventSink {
    tx: mpsc::Sender<ToolEvent>,
}

impl ToolEventSink {
    /// Create a sink and the receiver the agent loop drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ToolEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ToolEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::debug!("tool event channel full; event dropped");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_id_accessor_covers_all_variants() {
        let start = ToolEvent::CommandExecutionStart {
            execution_id: "e1".into(),
            command: "ls".into(),
            working_dir: "/tmp".into(),
        };
        let done = ToolEvent::CommandExecutionComplete {
            execution_id: "e1".into(),
            exit_code: 0,
            duration: Duration::from_millis(5),
        };
        assert_eq!(start.execution_id(), "e1");
        assert_eq!(done.execution_id(), "e1");
    }

    #[test]
    fn terminal_classification() {
        let out = ToolEvent::CommandOutput {
            execution_id: "e".into(),
            chunk: "x".into(),
        };
        let canceled = ToolEvent::CommandExecutionCanceled {
            execution_id: "e".into(),
            duration: Duration::ZERO,
        };
        assert!(!out.is_terminal());
        assert!(canceled.is_terminal());
    }

    #[tokio::test]
    async fn sink_delivers_events() {
        let (sink, mut rx) = ToolEventSink::channel(4);
        sink.emit(ToolEvent::CommandOutput {
            execution_id: "e".into(),
            chunk: "hello".into(),
        });
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, ToolEvent::CommandOutput { chunk, .. } if chunk == "hello"));
    }

    #[tokio::test]
    async fn sink_drops_when_full_without_blocking() {
        let (sink, mut rx) = ToolEventSink::channel(1);
        for _ in 0..10 {
            sink.emit(ToolEvent::CommandOutput {
                execution_id: "e".into(),
                chunk: "spam".into(),
            });
        }
        // Exactly one event fits; draining must not find more than capacity.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
