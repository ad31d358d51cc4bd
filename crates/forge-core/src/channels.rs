// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Agent actor and its four front-end channels.
//!
//! The front-end talks to a spawned agent exclusively through channels:
//! Input (user messages, turn cancel), Event (progress out), Approval
//! (yes/no on a tool), Cancel (interrupt a specific execution).  Approval
//! and cancel traffic is routed by a small side task so it reaches the
//! coordinator and command registry while the main task is busy inside a
//! turn.  User inputs arriving mid-turn are queued and processed in order.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use forge_config::Config;
use forge_model::ModelProvider;
use forge_tools::{CommandRegistry, ToolRegistry};

use crate::{
    agent::{approval_coordinator, Agent},
    approval::{ApprovalCoordinator, ApprovalInfo},
    emitter::EventEmitter,
    events::{AgentEvent, ApprovalResponse, CancellationRequest, InputEvent},
};

/// Capacity of the inbound control channels.  The event channel bound comes
/// from configuration instead (it back-pressures the loop).
const CONTROL_CHANNEL_CAPACITY: usize = 10;

/// Handle to a running agent actor.
pub struct AgentHandle {
    input_tx: mpsc::Sender<InputEvent>,
    approval_tx: mpsc::Sender<ApprovalResponse>,
    cancel_tx: mpsc::Sender<CancellationRequest>,
    events_rx: Option<mpsc::Receiver<AgentEvent>>,
    approvals: Arc<ApprovalCoordinator>,
    shutdown: CancellationToken,
    done_rx: Option<oneshot::Receiver<()>>,
}

impl AgentHandle {
    /// Take the event receiver.  Callable once; the front-end owns it.
    pub fn take_events(&mut self) -> mpsc::Receiver<AgentEvent> {
        self.events_rx
            .take()
            .expect("event receiver already taken")
    }

    /// Submit a user utterance.  Queued when a turn is already running.
    pub async fn send_user_input(&self, content: impl Into<String>) -> anyhow::Result<()> {
        self.send(InputEvent::user(content.into())).await
    }

    pub async fn send(&self, input: InputEvent) -> anyhow::Result<()> {
        self.input_tx
            .send(input)
            .await
            .map_err(|_| anyhow::anyhow!("agent input channel closed"))
    }

    /// Cancel the currently running turn, if any.
    pub async fn cancel_turn(&self) -> anyhow::Result<()> {
        self.send(InputEvent::CancelTurn).await
    }

    /// Answer an outstanding approval request.
    pub async fn respond_approval(
        &self,
        approval_id: impl Into<String>,
        approved: bool,
    ) -> anyhow::Result<()> {
        self.approval_tx
            .send(ApprovalResponse {
                approval_id: approval_id.into(),
                approved,
            })
            .await
            .map_err(|_| anyhow::anyhow!("agent approval channel closed"))
    }

    /// Cancel one in-flight tool execution by its reported id.
    pub async fn cancel_execution(&self, execution_id: impl Into<String>) -> anyhow::Result<()> {
        self.cancel_tx
            .send(CancellationRequest {
                execution_id: execution_id.into(),
            })
            .await
            .map_err(|_| anyhow::anyhow!("agent cancel channel closed"))
    }

    /// Outstanding approval requests, for re-rendering after a redraw.
    pub fn pending_approvals(&self) -> Vec<ApprovalInfo> {
        self.approvals.list_pending()
    }

    /// Begin shutdown: the running turn is cancelled, the loop exits and
    /// closes its channels.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the actor to finish after [`AgentHandle::shutdown`].
    pub async fn join(&mut self) {
        if let Some(done) = self.done_rx.take() {
            let _ = done.await;
        }
    }
}

/// Spawn an agent actor and return its handle.
pub fn spawn_agent(
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    config: Arc<Config>,
) -> AgentHandle {
    let (input_tx, input_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    let (approval_tx, approval_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    let (cancel_tx, cancel_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    let (emitter, events_rx) = EventEmitter::channel(config.agent.event_channel_capacity);

    let approvals = approval_coordinator(&config);
    let commands = Arc::new(CommandRegistry::new());
    let shutdown = CancellationToken::new();
    let (done_tx, done_rx) = oneshot::channel();

    let agent = Agent::new(
        model,
        tools,
        config,
        emitter.clone(),
        Arc::clone(&approvals),
        Arc::clone(&commands),
    );

    // Side router: approval and cancel traffic must reach the coordinator
    // and command registry while the main task is inside a turn.
    tokio::spawn(route_control_traffic(
        approval_rx,
        cancel_rx,
        Arc::clone(&approvals),
        Arc::clone(&commands),
        shutdown.clone(),
    ));

    tokio::spawn(actor_loop(
        agent,
        input_rx,
        emitter,
        shutdown.clone(),
        done_tx,
    ));

    AgentHandle {
        input_tx,
        approval_tx,
        cancel_tx,
        events_rx: Some(events_rx),
        approvals,
        shutdown,
        done_rx: Some(done_rx),
    }
}

async fn route_control_traffic(
    mut approval_rx: mpsc::Receiver<ApprovalResponse>,
    mut cancel_rx: mpsc::Receiver<CancellationRequest>,
    approvals: Arc<ApprovalCoordinator>,
    commands: Arc<CommandRegistry>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(resp) = approval_rx.recv() => {
                if !approvals.handle_response(&resp.approval_id, resp.approved) {
                    tracing::debug!(id = %resp.approval_id, "approval response for unknown id discarded");
                }
            }
            Some(req) = cancel_rx.recv() => {
                if !commands.cancel(&req.execution_id) {
                    tracing::debug!(id = %req.execution_id, "cancellation for unknown execution id ignored");
                }
            }
        }
    }
}

async fn actor_loop(
    mut agent: Agent,
    mut input_rx: mpsc::Receiver<InputEvent>,
    emitter: EventEmitter,
    shutdown: CancellationToken,
    done_tx: oneshot::Sender<()>,
) {
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut input_open = true;

    'outer: loop {
        if shutdown.is_cancelled() {
            break;
        }

        // Pick the next user input: queued first, then the channel.
        let content = if let Some(c) = queue.pop_front() {
            c
        } else if input_open {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'outer,
                msg = input_rx.recv() => match msg {
                    None => {
                        input_open = false;
                        continue 'outer;
                    }
                    Some(InputEvent::UserInput { content, .. }) => content,
                    Some(InputEvent::FormInput { .. }) => {
                        emitter.emit(AgentEvent::Error("form input is not supported".into()));
                        continue 'outer;
                    }
                    // No turn is running; nothing to cancel.
                    Some(InputEvent::CancelTurn) => continue 'outer,
                }
            }
        } else {
            // Input channel closed and the queue is drained.
            break 'outer;
        };

        // Drive the turn while still listening for CancelTurn and queueing
        // further inputs.  The turn scope inherits shutdown cancellation.
        let turn_scope = shutdown.child_token();
        let turn = agent.run_turn(&content, turn_scope.clone());
        tokio::pin!(turn);
        loop {
            tokio::select! {
                biased;
                _ = turn.as_mut() => break,
                msg = input_rx.recv(), if input_open => match msg {
                    Some(InputEvent::CancelTurn) => turn_scope.cancel(),
                    Some(InputEvent::UserInput { content, .. }) => queue.push_back(content),
                    Some(InputEvent::FormInput { .. }) => {
                        emitter.emit(AgentEvent::Error("form input is not supported".into()));
                    }
                    None => input_open = false,
                },
            }
        }
    }

    let _ = done_tx.send(());
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
