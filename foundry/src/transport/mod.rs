//! Chat transport: incoming and outgoing message streams.
//!
//! The front-end (bot process, whitelist enforcement) is external; the core
//! trusts `user_id` once a payload arrives. Conceptually two streams: incoming
//! user messages and outgoing replies. Implementations: [`RedisChatTransport`]
//! (Redis streams) and [`InMemoryTransport`] (tests).

mod in_memory;
mod redis_streams;

pub use in_memory::InMemoryTransport;
pub use redis_streams::{RedisChatTransport, INCOMING_STREAM, OUTGOING_STREAM};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inbound user message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub user_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub text: String,
    pub correlation_id: String,
}

/// Outbound message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub user_id: i64,
    pub chat_id: i64,
    pub text: String,
    pub correlation_id: String,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transient: {0}")]
    Transient(String),
    #[error("codec: {0}")]
    Codec(String),
}

/// Pub/sub chat transport.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Next incoming user message; blocks until one arrives.
    async fn next_incoming(&self) -> Result<IncomingMessage, TransportError>;

    /// Publishes one outgoing message.
    async fn publish(&self, message: OutgoingMessage) -> Result<(), TransportError>;
}
