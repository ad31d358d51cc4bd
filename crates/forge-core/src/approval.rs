// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-approval coordination.
//!
//! Correlates outstanding approval requests with asynchronous responses.
//! Resolution is single-shot and arbitrated by the pending table's lock:
//! whoever removes the entry first (response, timeout, or cancellation)
//! wins, so a concurrent timeout and response can never both fire and
//! cleanup runs at most once.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

/// How a pending approval was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    TimedOut,
    /// The turn scope was cancelled while waiting.
    Cancelled,
}

/// Serializable snapshot of a pending approval, for front-end re-rendering.
#[derive(Debug, Clone)]
pub struct ApprovalInfo {
    pub id: String,
    pub tool_name: String,
    pub created_at: DateTime<Utc>,
}

struct PendingEntry {
    tool_name: String,
    created_at: DateTime<Utc>,
    respond: oneshot::Sender<bool>,
}

/// A live approval request.  Created by [`ApprovalCoordinator::request`],
/// consumed by [`ApprovalCoordinator::wait`].
pub struct ApprovalTicket {
    id: String,
    rx: oneshot::Receiver<bool>,
}

impl ApprovalTicket {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Table of outstanding approval requests keyed by id.
pub struct ApprovalCoordinator {
    pending: Mutex<HashMap<String, PendingEntry>>,
    timeout: Duration,
}

impl ApprovalCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Insert a pending entry and return the ticket the requester waits on.
    pub fn request(&self, tool_name: &str) -> ApprovalTicket {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("approval table lock poisoned").insert(
            id.clone(),
            PendingEntry {
                tool_name: tool_name.to_string(),
                created_at: Utc::now(),
                respond: tx,
            },
        );
        ApprovalTicket { id, rx }
    }

    /// Resolve a pending request.  Returns `false` when the id is unknown,
    /// which is how duplicate responses and responses racing a timeout are
    /// discarded.
    pub fn handle_response(&self, id: &str, approved: bool) -> bool {
        let entry = self
            .pending
            .lock()
            .expect("approval table lock poisoned")
            .remove(id);
        match entry {
            Some(e) => {
                // A dropped receiver means the waiter already gave up; that
                // resolution still counted, so report it delivered.
                let _ = e.respond.send(approved);
                true
            }
            None => false,
        }
    }

    /// Block until the request resolves by response, timeout, or scope
    /// cancellation.  The entry is removed exactly once, whichever branch
    /// wins.
    pub async fn wait(
        &self,
        ticket: ApprovalTicket,
        scope: &tokio_util::sync::CancellationToken,
    ) -> ApprovalOutcome {
        let ApprovalTicket { id, mut rx } = ticket;
        tokio::select! {
            biased;
            _ = scope.cancelled() => {
                self.take(&id);
                ApprovalOutcome::Cancelled
            }
            res = &mut rx => match res {
                Ok(true) => ApprovalOutcome::Approved,
                Ok(false) => ApprovalOutcome::Rejected,
                // Sender dropped without a decision (coordinator dropped);
                // indistinguishable from a timeout for the caller.
                Err(_) => ApprovalOutcome::TimedOut,
            },
            _ = tokio::time::sleep(self.timeout) => {
                if self.take(&id) {
                    ApprovalOutcome::TimedOut
                } else {
                    // A response won the race for the table entry; its
                    // decision is already in flight on the oneshot.
                    match rx.await {
                        Ok(true) => ApprovalOutcome::Approved,
                        Ok(false) => ApprovalOutcome::Rejected,
                        Err(_) => ApprovalOutcome::TimedOut,
                    }
                }
            }
        }
    }

    /// List outstanding requests (for front-end redraws).
    pub fn list_pending(&self) -> Vec<ApprovalInfo> {
        self.pending
            .lock()
            .expect("approval table lock poisoned")
            .iter()
            .map(|(id, e)| ApprovalInfo {
                id: id.clone(),
                tool_name: e.tool_name.clone(),
                created_at: e.created_at,
            })
            .collect()
    }

    fn take(&self, id: &str) -> bool {
        self.pending
            .lock()
            .expect("approval table lock poisoned")
            .remove(id)
            .is_some()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;

    fn coordinator(timeout_ms: u64) -> Arc<ApprovalCoordinator> {
        Arc::new(ApprovalCoordinator::new(Duration::from_millis(timeout_ms)))
    }

    #[tokio::test]
    async fn response_approves_waiting_request() {
        let coord = coordinator(5_000);
        let scope = CancellationToken::new();
        let ticket = coord.request("write_file");
        let id = ticket.id().to_string();

        let c2 = Arc::clone(&coord);
        tokio::spawn(async move {
            assert!(c2.handle_response(&id, true));
        });

        assert_eq!(coord.wait(ticket, &scope).await, ApprovalOutcome::Approved);
        assert!(coord.list_pending().is_empty());
    }

    #[tokio::test]
    async fn response_rejects_waiting_request() {
        let coord = coordinator(5_000);
        let scope = CancellationToken::new();
        let ticket = coord.request("write_file");
        let id = ticket.id().to_string();
        coord.handle_response(&id, false);
        assert_eq!(coord.wait(ticket, &scope).await, ApprovalOutcome::Rejected);
    }

    #[tokio::test]
    async fn timeout_fires_without_response() {
        let coord = coordinator(20);
        let scope = CancellationToken::new();
        let ticket = coord.request("write_file");
        assert_eq!(coord.wait(ticket, &scope).await, ApprovalOutcome::TimedOut);
        assert!(coord.list_pending().is_empty());
    }

    #[tokio::test]
    async fn duplicate_response_is_discarded() {
        let coord = coordinator(5_000);
        let scope = CancellationToken::new();
        let ticket = coord.request("t");
        let id = ticket.id().to_string();

        assert!(coord.handle_response(&id, true));
        assert!(!coord.handle_response(&id, false), "second response must be discarded");
        assert_eq!(coord.wait(ticket, &scope).await, ApprovalOutcome::Approved);
    }

    #[tokio::test]
    async fn response_for_unknown_id_is_discarded() {
        let coord = coordinator(5_000);
        assert!(!coord.handle_response("no-such-id", true));
    }

    #[tokio::test]
    async fn cancellation_unblocks_the_wait() {
        let coord = coordinator(60_000);
        let scope = CancellationToken::new();
        let ticket = coord.request("t");

        let s2 = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            s2.cancel();
        });

        assert_eq!(coord.wait(ticket, &scope).await, ApprovalOutcome::Cancelled);
        assert!(coord.list_pending().is_empty());
    }

    #[tokio::test]
    async fn concurrent_timeout_and_response_resolve_exactly_once() {
        // Race a response against an immediate timeout many times; every
        // run must resolve to exactly one outcome and leave a clean table.
        for _ in 0..50 {
            let coord = coordinator(1);
            let scope = CancellationToken::new();
            let ticket = coord.request("t");
            let id = ticket.id().to_string();

            let c2 = Arc::clone(&coord);
            let responder = tokio::spawn(async move {
                c2.handle_response(&id, true)
            });

            let outcome = coord.wait(ticket, &scope).await;
            assert!(
                matches!(outcome, ApprovalOutcome::Approved | ApprovalOutcome::TimedOut),
                "unexpected outcome: {outcome:?}"
            );
            let delivered = responder.await.unwrap();
            // When the response won the race for the table entry, the
            // waiter must have observed it.
            if delivered {
                assert_eq!(outcome, ApprovalOutcome::Approved);
            }
            assert!(coord.list_pending().is_empty());
        }
    }

    #[tokio::test]
    async fn pending_snapshot_lists_request() {
        let coord = coordinator(5_000);
        let ticket = coord.request("write_file");
        let pending = coord.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool_name, "write_file");
        assert_eq!(pending[0].id, ticket.id());
    }
}
