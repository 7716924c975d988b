//! # sync-engine
//!
//! Async runtime for logsync peer-to-peer event-log synchronization.
//!
//! This is the main library that applications use to sync a log.
//!
//! ## Features
//!
//! - **Sync node**: drives the sync-core state machine on its own task
//! - **Transport Abstraction**: Pluggable transport layer (local pair, mock)
//! - **Reconnection**: jittered exponential backoff around any transport
//! - **Collaborators**: storage and credential checks are traits
//!
//! ## Example
//!
//! ```ignore
//! use logsync_engine::{LocalPair, MemoryLog, NodeConfig, SharedToken, SyncNode};
//!
//! let pair = LocalPair::new();
//! let server = SyncNode::responder(
//!     NodeConfig::new("server"),
//!     pair.right,
//!     MemoryLog::new(),
//!     SharedToken::new("secret"),
//! );
//! let client = SyncNode::initiator(
//!     NodeConfig::new("client").with_credentials("secret"),
//!     pair.left,
//!     MemoryLog::with_entries(entries),
//! );
//! server.connect().await?;
//! client.connect().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod events;
pub mod node;
pub mod reconnect;
pub mod store;
pub mod transport;

pub use auth::{AllowAll, Authenticator, SharedToken};
pub use config::{Config, ConfigError, NodeConfig, ReconnectConfig};
pub use events::{EventHub, Subscription};
pub use node::{NodeError, NodeEvent, NodeStatus, SyncNode};
pub use reconnect::Reconnect;
pub use store::{LogStore, MemoryLog, StoreError};
pub use transport::{
    LocalEndpoint, LocalPair, MockTransport, Transport, TransportError, TransportEvent,
};

pub use logsync_core::{ConnectionState, DisconnectReason, PeerInfo, Role, SyncCursors, Verdict};
pub use logsync_types::{Cursor, Entry, ErrorKind, Message, NodeId, ProtocolVersion, SyncError};
