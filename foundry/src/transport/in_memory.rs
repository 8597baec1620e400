//! In-memory chat transport for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChatTransport, IncomingMessage, OutgoingMessage, TransportError};

/// Channel-backed transport: tests push incoming messages and assert on the
/// outgoing log.
pub struct InMemoryTransport {
    incoming_tx: mpsc::Sender<IncomingMessage>,
    incoming_rx: tokio::sync::Mutex<mpsc::Receiver<IncomingMessage>>,
    outgoing: Mutex<Vec<OutgoingMessage>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::channel(64);
        Self {
            incoming_tx,
            incoming_rx: tokio::sync::Mutex::new(incoming_rx),
            outgoing: Mutex::new(Vec::new()),
        }
    }

    /// Queue an incoming message as if the front-end had relayed it.
    pub async fn push_incoming(&self, message: IncomingMessage) {
        let _ = self.incoming_tx.send(message).await;
    }

    /// Snapshot of everything published so far.
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.outgoing.lock().expect("poisoned").clone()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for InMemoryTransport {
    async fn next_incoming(&self) -> Result<IncomingMessage, TransportError> {
        self.incoming_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<(), TransportError> {
        self.outgoing.lock().expect("poisoned").push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Messages pushed in are received in order; published messages
    /// are visible in the sent log.
    #[tokio::test]
    async fn roundtrip_in_memory() {
        let transport = InMemoryTransport::new();
        transport
            .push_incoming(IncomingMessage {
                user_id: 1,
                chat_id: 10,
                message_id: 100,
                text: "hello".into(),
                correlation_id: "c-1".into(),
            })
            .await;
        let got = transport.next_incoming().await.unwrap();
        assert_eq!(got.text, "hello");

        transport
            .publish(OutgoingMessage {
                user_id: 1,
                chat_id: 10,
                text: "hi".into(),
                correlation_id: "c-1".into(),
            })
            .await
            .unwrap();
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].text, "hi");
    }
}
