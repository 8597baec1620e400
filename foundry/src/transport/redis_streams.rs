//! Redis-stream chat transport.
//!
//! Incoming messages arrive on `chat:incoming`, replies go to `chat:outgoing`.
//! Entries carry one field `payload` holding the JSON message. The reader keeps
//! its own cursor (`$` at startup, then last seen id) and blocks on XREAD.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::StreamReadReply;
use tokio::sync::Mutex;

use super::{ChatTransport, IncomingMessage, OutgoingMessage, TransportError};

/// Stream of inbound user messages.
pub const INCOMING_STREAM: &str = "chat:incoming";
/// Stream of outbound replies.
pub const OUTGOING_STREAM: &str = "chat:outgoing";

/// Chat transport over Redis streams.
pub struct RedisChatTransport {
    conn: ConnectionManager,
    cursor: Mutex<String>,
}

impl RedisChatTransport {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            cursor: Mutex::new("$".to_string()),
        }
    }

    fn decode(reply: StreamReadReply) -> Result<Option<(String, IncomingMessage)>, TransportError> {
        for key in reply.keys {
            for entry in key.ids {
                let payload: String = entry
                    .get("payload")
                    .ok_or_else(|| TransportError::Codec("missing payload field".into()))?;
                let message = serde_json::from_str(&payload)
                    .map_err(|e| TransportError::Codec(e.to_string()))?;
                return Ok(Some((entry.id.clone(), message)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ChatTransport for RedisChatTransport {
    async fn next_incoming(&self) -> Result<IncomingMessage, TransportError> {
        loop {
            let cursor = self.cursor.lock().await.clone();
            let mut conn = self.conn.clone();
            let reply: StreamReadReply = redis::cmd("XREAD")
                .arg("COUNT")
                .arg(1)
                .arg("BLOCK")
                .arg(5_000)
                .arg("STREAMS")
                .arg(INCOMING_STREAM)
                .arg(&cursor)
                .query_async(&mut conn)
                .await
                .map_err(|e| TransportError::Transient(e.to_string()))?;
            if let Some((id, message)) = Self::decode(reply)? {
                *self.cursor.lock().await = id;
                return Ok(message);
            }
        }
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        let payload =
            serde_json::to_string(&message).map_err(|e| TransportError::Codec(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(OUTGOING_STREAM)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        Ok(())
    }
}
