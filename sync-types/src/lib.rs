//! # sync-types
//!
//! Wire format types for the logsync event-log synchronization protocol.
//!
//! This crate provides the foundational types used across all logsync crates:
//! - [`NodeId`], [`Cursor`], [`ProtocolVersion`] - Identity and ordering types
//! - [`Message`] - Protocol messages (connect, sync, ping, etc.)
//! - [`SyncError`], [`ErrorKind`] - The protocol error taxonomy
//! - [`WireError`] - Encoding errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;

pub use error::{ErrorKind, SyncError, WireError};
pub use ids::{Cursor, NodeId, ProtocolVersion};
pub use messages::{
    Connect, Connected, DebugInfo, Entry, ErrorReport, HandshakeOptions, Message, Ping, Pong,
    SyncBatch, Synced,
};
