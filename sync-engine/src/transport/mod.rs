//! Transport abstraction for logsync.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (in-process pair, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` starts a connection
//! - `send()` transmits one protocol message
//! - `subscribe()` delivers lifecycle events and incoming messages
//! - `disconnect()` tears the connection down
//!
//! # Example
//!
//! ```ignore
//! let pair = LocalPair::new();
//! let mut events = pair.right.subscribe();
//! pair.left.connect().await?;
//! pair.right.connect().await?;
//! pair.left.send(message).await?;
//! ```

mod local;
mod mock;

pub use local::{LocalEndpoint, LocalPair};
pub use mock::MockTransport;

use std::sync::Arc;

use async_trait::async_trait;
use logsync_core::DisconnectReason;
use logsync_types::Message;
use thiserror::Error;

use crate::events::Subscription;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// `connect()` while already connecting or connected.
    #[error("already connecting")]
    AlreadyConnecting,

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Connection closed.
    #[error("connection closed")]
    Closed,
}

/// Events published by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connection attempt started.
    Connecting,
    /// The connection is up.
    Connected,
    /// The connection closed.
    Disconnected(DisconnectReason),
    /// A message arrived.
    Message(Message),
    /// Bytes arrived that do not decode to a message.
    Malformed(String),
    /// A transport-level problem that did not close the connection.
    Error(String),
}

/// Transport trait for sending and receiving sync protocol messages.
///
/// Implementations handle the underlying connection mechanism
/// (in-process pair, WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting.
    ///
    /// Fails with [`TransportError::AlreadyConnecting`] unless disconnected.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the connection. Safe to call in any state.
    async fn disconnect(&self, reason: DisconnectReason);

    /// Send one message. Messages from one instance arrive in send order.
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Listen for transport events.
    fn subscribe(&self) -> Subscription<TransportEvent>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self) -> Result<(), TransportError> {
        (**self).connect().await
    }

    async fn disconnect(&self, reason: DisconnectReason) {
        (**self).disconnect(reason).await
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        (**self).send(message).await
    }

    fn subscribe(&self) -> Subscription<TransportEvent> {
        (**self).subscribe()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
