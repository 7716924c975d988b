//! # sync-core
//!
//! Pure logic for logsync (no I/O, instant tests).
//!
//! This crate implements the connection state machine and the algorithms
//! around it without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (transport, storage, timers) is performed by
//! `sync-engine`, which interprets the actions produced by [`Protocol`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod cursor;
pub mod role;
pub mod state;
pub mod window;

pub use backoff::Backoff;
pub use cursor::{BatchPosition, SyncCursors};
pub use role::{Role, Verdict};
pub use state::{
    Action, ConnectionState, DisconnectReason, Event, NodeIdentity, PeerInfo, Protocol,
    SyncEvent, Timer,
};
pub use window::{Ack, SendWindow};
