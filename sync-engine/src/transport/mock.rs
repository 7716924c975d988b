//! Mock transport for testing.
//!
//! Allows injecting incoming messages and capturing sent messages for
//! verification.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use logsync_core::DisconnectReason;
use logsync_types::Message;

use super::{Transport, TransportError, TransportEvent};
use crate::events::{lock, EventHub, Subscription};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while a node owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    events: EventHub<TransportEvent>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connect_attempts: u32,
    sent_messages: Vec<Message>,
    disconnect_reasons: Vec<DisconnectReason>,
    failing_connects: u32,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message as if the peer had sent it.
    pub fn inject(&self, message: Message) {
        self.events.emit(TransportEvent::Message(message));
    }

    /// Deliver undecodable input.
    pub fn inject_malformed(&self, reason: &str) {
        self.events
            .emit(TransportEvent::Malformed(reason.to_string()));
    }

    /// Simulate the peer or the network closing the connection.
    pub fn drop_connection(&self) {
        let was_connected = std::mem::replace(&mut lock(&self.inner).connected, false);
        if was_connected {
            self.events
                .emit(TransportEvent::Disconnected(DisconnectReason::Remote));
        }
    }

    /// Get all messages that were sent.
    pub fn sent_messages(&self) -> Vec<Message> {
        lock(&self.inner).sent_messages.clone()
    }

    /// Get the last message that was sent.
    pub fn last_sent(&self) -> Option<Message> {
        lock(&self.inner).sent_messages.last().cloned()
    }

    /// Reasons passed to `disconnect()`, oldest first.
    pub fn disconnect_reasons(&self) -> Vec<DisconnectReason> {
        lock(&self.inner).disconnect_reasons.clone()
    }

    /// Number of `connect()` calls made while disconnected.
    pub fn connect_attempts(&self) -> u32 {
        lock(&self.inner).connect_attempts
    }

    /// Cause the next `count` connect() calls to fail.
    pub fn fail_next_connects(&self, count: u32) {
        lock(&self.inner).failing_connects = count;
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        lock(&self.inner).fail_next_send = Some(error.to_string());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        {
            let mut inner = lock(&self.inner);
            if inner.connected {
                return Err(TransportError::AlreadyConnecting);
            }
            inner.connect_attempts += 1;

            // Check for forced failure
            if inner.failing_connects > 0 {
                inner.failing_connects -= 1;
                return Err(TransportError::ConnectionFailed(
                    "network unreachable".to_string(),
                ));
            }
            inner.connected = true;
        }
        self.events.emit(TransportEvent::Connecting);
        self.events.emit(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self, reason: DisconnectReason) {
        let was_connected = {
            let mut inner = lock(&self.inner);
            inner.disconnect_reasons.push(reason);
            std::mem::replace(&mut inner.connected, false)
        };
        if was_connected {
            self.events.emit(TransportEvent::Disconnected(reason));
        }
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_messages.push(message);
        Ok(())
    }

    fn subscribe(&self) -> Subscription<TransportEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsync_types::{Cursor, Ping};

    fn ping(n: u64) -> Message {
        Message::Ping(Ping {
            received: Cursor::new(n),
        })
    }

    #[tokio::test]
    async fn connect_emits_connecting_then_connected() {
        let transport = MockTransport::new();
        let mut events = transport.subscribe();
        assert!(!transport.is_connected());

        transport.connect().await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(events.try_recv(), Some(TransportEvent::Connecting));
        assert_eq!(events.try_recv(), Some(TransportEvent::Connected));
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();

        let result = transport.connect().await;
        assert_eq!(result, Err(TransportError::AlreadyConnecting));
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn records_sent_messages() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();

        transport.send(ping(1)).await.unwrap();
        transport.send(ping(2)).await.unwrap();

        assert_eq!(transport.sent_messages(), vec![ping(1), ping(2)]);
        assert_eq!(transport.last_sent(), Some(ping(2)));
    }

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.send(ping(0)).await;
        assert_eq!(result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn forced_connect_failures() {
        let transport = MockTransport::new();
        transport.fail_next_connects(2);

        assert!(matches!(
            transport.connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
        assert!(transport.connect().await.is_err());
        transport.connect().await.unwrap();
        assert_eq!(transport.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();
        transport.fail_next_send("buffer full");

        let result = transport.send(ping(0)).await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));

        // Next send should work
        transport.send(ping(0)).await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_reports_reason_once() {
        let transport = MockTransport::new();
        let mut events = transport.subscribe();
        transport.connect().await.unwrap();
        events.try_recv();
        events.try_recv();

        transport.disconnect(DisconnectReason::Manual).await;
        transport.disconnect(DisconnectReason::Manual).await;

        assert_eq!(
            events.try_recv(),
            Some(TransportEvent::Disconnected(DisconnectReason::Manual))
        );
        assert_eq!(events.try_recv(), None);
        assert_eq!(transport.disconnect_reasons().len(), 2);
    }

    #[tokio::test]
    async fn injected_messages_reach_subscribers() {
        let transport = MockTransport::new();
        let mut events = transport.subscribe();

        transport.inject(ping(4));
        transport.drop_connection();

        assert_eq!(events.try_recv(), Some(TransportEvent::Message(ping(4))));
        // Not connected, so dropping is silent.
        assert_eq!(events.try_recv(), None);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect().await.unwrap();
        assert!(transport2.is_connected());

        transport2.send(ping(9)).await.unwrap();
        assert_eq!(transport1.sent_messages().len(), 1);
    }
}
