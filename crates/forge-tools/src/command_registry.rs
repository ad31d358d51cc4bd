// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// Tracks in-flight tool executions by id so that a front-end cancellation
/// request can reach the specific execution's scope.
///
/// Entries are registered when a tool reports a `CommandExecutionStart`
/// event and removed on the terminal event or when the call finishes.
pub struct CommandRegistry {
    handles: Mutex<HashMap<String, CancellationToken>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Register the cancel handle for an execution id.  A second start event
    /// with the same id replaces the handle.
    pub fn register(&self, execution_id: &str, scope: CancellationToken) {
        self.handles
            .lock()
            .expect("command registry lock poisoned")
            .insert(execution_id.to_string(), scope);
    }

    /// Cancel the execution's scope and drop the entry.  Unknown ids are a
    /// no-op; returns whether a handle was found.
    pub fn cancel(&self, execution_id: &str) -> bool {
        let handle = self
            .handles
            .lock()
            .expect("command registry lock poisoned")
            .remove(execution_id);
        match handle {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the entry without cancelling (normal completion).
    pub fn deregister(&self, execution_id: &str) {
        self.handles
            .lock()
            .expect("command registry lock poisoned")
            .remove(execution_id);
    }

    /// Number of executions currently tracked.
    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .expect("command registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
