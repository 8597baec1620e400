//! Message entry point: session lock, graph invocation, lock resolution.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::clients::{ApiError, CrudApi};
use crate::error::GraphError;
use crate::graph::CompiledStateGraph;
use crate::memory::{Checkpoint, CheckpointError, Checkpointer, RunnableConfig};
use crate::message::Message;
use crate::session::{Continuation, SessionCoordinator, SessionError, SessionState};
use crate::state::OrchestratorState;
use crate::tools::BUSY_NOTICE;
use crate::transport::{ChatTransport, IncomingMessage, OutgoingMessage, TransportError};

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("session: {0}")]
    Session(#[from] SessionError),
    #[error("graph: {0}")]
    Graph(#[from] GraphError),
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("api: {0}")]
    Api(#[from] ApiError),
}

/// Wires the session coordinator, the compiled graph, and the transport into
/// one per-message entry point.
pub struct Orchestrator {
    graph: CompiledStateGraph<OrchestratorState>,
    sessions: SessionCoordinator,
    checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
    transport: Arc<dyn ChatTransport>,
    crud: Arc<dyn CrudApi>,
}

impl Orchestrator {
    pub fn new(
        graph: CompiledStateGraph<OrchestratorState>,
        sessions: SessionCoordinator,
        checkpointer: Arc<dyn Checkpointer<OrchestratorState>>,
        transport: Arc<dyn ChatTransport>,
        crud: Arc<dyn CrudApi>,
    ) -> Self {
        Self {
            graph,
            sessions,
            checkpointer,
            transport,
            crud,
        }
    }

    /// Handles one incoming user message end to end.
    ///
    /// Busy sessions are rejected with a notice and the message is **not**
    /// enqueued. On any execution error the lock is released so the user is
    /// never stuck behind a dead thread.
    pub async fn handle_incoming(&self, incoming: IncomingMessage) -> Result<(), HandleError> {
        let user_id = incoming.user_id;
        let (thread_id, continuation) = match self.sessions.continue_or_start(user_id).await? {
            Continuation::Busy => {
                info!(user_id, "busy-reject");
                self.transport
                    .publish(OutgoingMessage {
                        user_id,
                        chat_id: incoming.chat_id,
                        text: BUSY_NOTICE.to_string(),
                        correlation_id: incoming.correlation_id.clone(),
                    })
                    .await?;
                return Ok(());
            }
            Continuation::Started { thread_id } => (thread_id, false),
            Continuation::Continued { thread_id } => (thread_id, true),
        };

        let result = self
            .run_thread(&incoming, &thread_id, continuation)
            .await;
        match result {
            Ok(final_state) => {
                if final_state.user_confirmed_complete {
                    // Task complete: session released, history cleared.
                    let mut cleared = final_state;
                    cleared.messages.clear();
                    self.checkpointer
                        .put(
                            &RunnableConfig::for_thread(&thread_id),
                            &Checkpoint::from_state(cleared, u64::MAX),
                        )
                        .await?;
                    self.sessions.release(user_id).await?;
                } else {
                    // The conversation is open (explicitly awaiting, or the turn
                    // ended without completion): hold the session so the next
                    // message continues this thread. The lock is cleared only on
                    // task completion; TTL expiry covers abandonment.
                    self.sessions
                        .update_state(user_id, SessionState::Awaiting)
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                error!(user_id, %thread_id, error = %e, "thread execution failed; releasing lock");
                if let Err(release_err) = self.sessions.release(user_id).await {
                    warn!(user_id, error = %release_err, "lock release after failure also failed");
                }
                let _ = self
                    .transport
                    .publish(OutgoingMessage {
                        user_id,
                        chat_id: incoming.chat_id,
                        text: "Something went wrong handling that request; please try again."
                            .to_string(),
                        correlation_id: incoming.correlation_id.clone(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn run_thread(
        &self,
        incoming: &IncomingMessage,
        thread_id: &str,
        continuation: bool,
    ) -> Result<OrchestratorState, HandleError> {
        let user = self.crud.upsert_user(incoming.user_id).await?;
        let config = RunnableConfig::for_thread(thread_id);

        let mut state = if continuation {
            self.checkpointer
                .latest(&config)
                .await?
                .map(|cp| cp.state)
                .unwrap_or_default()
        } else {
            OrchestratorState::default()
        };
        state.awaiting_user_response = false;
        state.telegram_user_id = Some(incoming.user_id);
        state.chat_id = Some(incoming.chat_id);
        state.user_id = Some(user.id);
        state.thread_id = Some(thread_id.to_string());
        state.correlation_id = Some(incoming.correlation_id.clone());
        state.messages.push(Message::user(incoming.text.clone()));

        let final_state = self.graph.invoke(state, Some(config)).await?;
        Ok(final_state)
    }
}

/// Chat service loop: reads the incoming stream and handles each message in its
/// own task (the session lock serializes per-user work).
pub async fn run_chat_service(
    orchestrator: Arc<Orchestrator>,
    transport: Arc<dyn ChatTransport>,
    shutdown: tokio_util::sync::CancellationToken,
) -> Result<(), TransportError> {
    info!("chat service started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("chat service stopping");
                return Ok(());
            }
            incoming = transport.next_incoming() => {
                let incoming = incoming?;
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.handle_incoming(incoming).await {
                        error!(error = %e, "message handling failed");
                    }
                });
            }
        }
    }
}
