//! Connection state machine for logsync.
//!
//! This module provides a pure, side-effect-free state machine for one end
//! of a sync connection. It takes events as input and produces a list of
//! actions to execute; the actual I/O (transport, storage, timers) is
//! performed by the runtime in sync-engine. This enables instant unit
//! testing without network mocks.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──transport up──▶ Handshaking ──▶ Synchronized
//!      ▲                                                     │               │
//!      └──────────── transport down / fatal error ───────────┴───────────────┘
//! ```
//!
//! Every connection attempt gets a new generation number. Timers, storage
//! calls and authentication requests carry the generation they were issued
//! for, and results from an older generation are ignored.

use std::fmt;

use logsync_types::{
    Connect, Connected, Cursor, DebugInfo, Entry, ErrorKind, ErrorReport, HandshakeOptions,
    Message, NodeId, Ping, Pong, ProtocolVersion, SyncBatch, SyncError, Synced,
};
use serde_json::Value;

use crate::cursor::{BatchPosition, SyncCursors};
use crate::role::{Role, Verdict};
use crate::window::SendWindow;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection. Cursors are kept for the next session.
    Disconnected,
    /// Transport connection in progress.
    Connecting,
    /// Transport is up, protocol handshake in progress.
    Handshaking,
    /// Handshake done, entries flow in both directions.
    Synchronized,
}

impl ConnectionState {
    /// Check if the handshake has completed.
    pub fn is_synchronized(&self) -> bool {
        matches!(self, Self::Synchronized)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Handshaking)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The other side or the network closed the connection.
    Remote,
    /// The owner asked to disconnect.
    Manual,
    /// No traffic within the allowed time.
    Timeout,
    /// A fatal protocol error.
    Error(ErrorKind),
    /// The storage collaborator failed.
    StoreFailure,
    /// The node was shut down for good.
    Destroy,
}

impl DisconnectReason {
    /// Disconnect reason used when tearing down after a fatal error.
    pub fn for_error(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Timeout => Self::Timeout,
            kind => Self::Error(kind),
        }
    }

    /// Whether a reconnecting transport should try again after this reason.
    ///
    /// Protocol errors recur deterministically (same credentials, same
    /// version), so they are only retried when the policy asks for it.
    pub fn is_retryable(&self, retry_protocol_errors: bool) -> bool {
        match self {
            Self::Remote | Self::Timeout | Self::StoreFailure => true,
            Self::Error(_) => retry_protocol_errors,
            Self::Manual | Self::Destroy => false,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => f.write_str("remote"),
            Self::Manual => f.write_str("manual"),
            Self::Timeout => f.write_str("timeout"),
            Self::Error(kind) => write!(f, "error ({})", kind),
            Self::StoreFailure => f.write_str("store failure"),
            Self::Destroy => f.write_str("destroy"),
        }
    }
}

/// Timers owned by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Handshake must finish before this fires.
    Handshake,
    /// Quiet period after which a `ping` is sent.
    Ping,
    /// Time allowed for any reply after a `ping`.
    Reply,
}

/// Who this node is and what it announces in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Local node id.
    pub node_id: NodeId,
    /// Local protocol version.
    pub version: ProtocolVersion,
    /// Credentials sent in `connect` (initiator only).
    pub credentials: Option<Value>,
    /// Sub-protocol both sides must agree on, if any.
    pub subprotocol: Option<String>,
}

impl NodeIdentity {
    /// Identity with the current protocol version and no credentials.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            version: ProtocolVersion::CURRENT,
            credentials: None,
            subprotocol: None,
        }
    }

    /// Set the protocol version.
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the credentials.
    pub fn with_credentials(mut self, credentials: Value) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the sub-protocol.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }

    fn options(&self) -> HandshakeOptions {
        HandshakeOptions {
            subprotocol: self.subprotocol.clone(),
        }
    }
}

/// The peer as learned during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer node id.
    pub node_id: NodeId,
    /// Negotiated protocol version.
    pub version: ProtocolVersion,
    /// Sub-protocol the peer announced.
    pub subprotocol: Option<String>,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Owner asked to connect.
    ConnectRequested,
    /// Owner asked to disconnect.
    DisconnectRequested {
        /// Reason passed on to the transport.
        reason: DisconnectReason,
    },
    /// Transport started connecting on its own (e.g. a scheduled reconnect).
    TransportConnecting,
    /// Transport connection established.
    TransportConnected,
    /// Transport connection closed.
    TransportDisconnected {
        /// Why it closed.
        reason: DisconnectReason,
    },
    /// Transport refused to connect.
    ConnectFailed,
    /// Message received from the peer.
    MessageReceived(Message),
    /// Transport received something that could not be decoded.
    MalformedReceived {
        /// Decoder error.
        reason: String,
    },
    /// Authenticator finished.
    AuthVerdict {
        /// Generation the request was issued for.
        generation: u64,
        /// The decision.
        verdict: Verdict,
    },
    /// Storage applied a batch.
    EntriesApplied {
        /// Generation the request was issued for.
        generation: u64,
        /// Cursor after the applied entries.
        end: Cursor,
    },
    /// Storage failed to apply a batch.
    ApplyFailed {
        /// Generation the request was issued for.
        generation: u64,
        /// Storage error.
        reason: String,
    },
    /// Storage returned local entries to send.
    EntriesLoaded {
        /// Generation the request was issued for.
        generation: u64,
        /// Cursor the entries start at.
        since: Cursor,
        /// Entries in log order; empty when nothing is pending.
        entries: Vec<Entry>,
    },
    /// Storage failed to read local entries.
    LoadFailed {
        /// Generation the request was issued for.
        generation: u64,
        /// Storage error.
        reason: String,
    },
    /// Owner appended local entries.
    LocalEntriesAvailable,
    /// A timer expired.
    TimerFired {
        /// Which timer.
        timer: Timer,
        /// Generation the timer was started in.
        generation: u64,
    },
}

/// Actions to be executed by the runtime.
///
/// These are instructions, not side effects. The runtime interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Ask the transport to connect.
    ConnectTransport,
    /// Ask the transport to disconnect.
    DisconnectTransport {
        /// Reason passed to the transport.
        reason: DisconnectReason,
    },
    /// Send a message to the peer.
    Send(Message),
    /// Verify the peer's credentials, then feed back [`Event::AuthVerdict`].
    Authenticate {
        /// Generation to echo back.
        generation: u64,
        /// Peer node id.
        node_id: NodeId,
        /// Credentials from `connect`.
        credentials: Option<Value>,
    },
    /// Apply entries to storage in order, then feed back [`Event::EntriesApplied`].
    ApplyEntries {
        /// Generation to echo back.
        generation: u64,
        /// Entries not yet applied.
        entries: Vec<Entry>,
        /// Cursor after these entries.
        end: Cursor,
    },
    /// Read local entries from `since`, then feed back [`Event::EntriesLoaded`].
    LoadEntries {
        /// Generation to echo back.
        generation: u64,
        /// First position to read.
        since: Cursor,
    },
    /// (Re)start a timer.
    StartTimer {
        /// Which timer.
        timer: Timer,
        /// Generation to echo back when it fires.
        generation: u64,
    },
    /// Cancel one timer.
    StopTimer(Timer),
    /// Cancel every timer.
    StopAllTimers,
    /// Emit an event to the application.
    Emit(SyncEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// Handshake completed.
    Synchronized(PeerInfo),
    /// The connection closed.
    Disconnected(DisconnectReason),
    /// A protocol error, local or reported by the peer.
    Error(SyncError),
    /// Entries from the peer were applied.
    EntriesReceived {
        /// New `received` cursor.
        received: Cursor,
    },
    /// The peer acknowledged local entries.
    Acknowledged {
        /// New `sent` cursor.
        sent: Cursor,
    },
    /// The storage collaborator failed.
    StoreFailed(String),
    /// The peer sent diagnostics.
    Debug(DebugInfo),
}

/// Sync protocol state machine - NO I/O, just state transitions.
#[derive(Debug, Clone)]
pub struct Protocol {
    role: Role,
    identity: NodeIdentity,
    state: ConnectionState,
    generation: u64,
    cursors: SyncCursors,
    window: SendWindow,
    peer: Option<PeerInfo>,
    pending_peer: Option<PeerInfo>,
    awaiting_reply: bool,
    loading: bool,
}

impl Protocol {
    /// Create a state machine in the Disconnected state with zero cursors.
    pub fn new(role: Role, identity: NodeIdentity) -> Self {
        Self::resume(role, identity, SyncCursors::new())
    }

    /// Create a state machine that continues from persisted cursors.
    pub fn resume(role: Role, identity: NodeIdentity, cursors: SyncCursors) -> Self {
        Self {
            role,
            identity,
            state: ConnectionState::Disconnected,
            generation: 0,
            cursors,
            window: SendWindow::new(),
            peer: None,
            pending_peer: None,
            awaiting_reply: false,
            loading: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current sync counters.
    pub fn cursors(&self) -> SyncCursors {
        self.cursors
    }

    /// Current connection generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// This node's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// This node's identity.
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// The peer of the current session, once synchronized.
    pub fn peer(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    /// Process an event and return the actions to execute, in order.
    pub fn on_event(&mut self, event: Event) -> Vec<Action> {
        let mut out = Vec::new();
        match event {
            Event::ConnectRequested => {
                if self.state == ConnectionState::Disconnected {
                    self.next_generation();
                    self.set_state(ConnectionState::Connecting, &mut out);
                    out.push(Action::ConnectTransport);
                }
            }
            Event::DisconnectRequested { reason } => {
                // Always forwarded: a reconnecting transport may have a retry
                // pending even while we are disconnected.
                out.push(Action::DisconnectTransport { reason });
                if self.state != ConnectionState::Disconnected {
                    self.enter_disconnected(reason, &mut out);
                }
            }
            Event::TransportConnecting => {
                if self.state == ConnectionState::Disconnected {
                    self.next_generation();
                    self.set_state(ConnectionState::Connecting, &mut out);
                }
            }
            Event::TransportConnected => self.on_transport_connected(&mut out),
            Event::TransportDisconnected { reason } => {
                if self.state != ConnectionState::Disconnected {
                    self.enter_disconnected(reason, &mut out);
                }
            }
            Event::ConnectFailed => {
                if self.state == ConnectionState::Connecting {
                    self.enter_disconnected(DisconnectReason::Remote, &mut out);
                }
            }
            Event::MessageReceived(message) => self.on_message(message, &mut out),
            Event::MalformedReceived { reason } => {
                if self.is_open() {
                    self.unexpected(reason, &mut out);
                }
            }
            Event::AuthVerdict {
                generation,
                verdict,
            } => self.on_verdict(generation, verdict, &mut out),
            Event::EntriesApplied { generation, end } => {
                // Storage has the entries no matter which session asked for
                // them, so the cursor moves even for a stale generation.
                if self.cursors.mark_received(end) {
                    out.push(Action::Emit(SyncEvent::EntriesReceived {
                        received: self.cursors.received(),
                    }));
                }
                if generation == self.generation && self.state.is_synchronized() {
                    out.push(Action::Send(Message::Synced(Synced {
                        cursor: self.cursors.received(),
                    })));
                }
            }
            Event::ApplyFailed { generation, reason } => {
                if generation == self.generation && self.is_open() {
                    self.store_failed(reason, &mut out);
                } else {
                    out.push(Action::Emit(SyncEvent::StoreFailed(reason)));
                }
            }
            Event::EntriesLoaded {
                generation,
                since,
                entries,
            } => self.on_entries_loaded(generation, since, entries, &mut out),
            Event::LoadFailed { generation, reason } => {
                if generation == self.generation && self.is_open() {
                    self.loading = false;
                    self.store_failed(reason, &mut out);
                }
            }
            Event::LocalEntriesAvailable => self.request_batch(&mut out),
            Event::TimerFired { timer, generation } => {
                if generation == self.generation {
                    self.on_timer(timer, &mut out);
                }
            }
        }
        out
    }

    fn is_open(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Handshaking | ConnectionState::Synchronized
        )
    }

    fn next_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn set_state(&mut self, next: ConnectionState, out: &mut Vec<Action>) {
        if self.state != next {
            self.state = next;
            out.push(Action::Emit(SyncEvent::StateChanged(next)));
        }
    }

    fn reset_session(&mut self) {
        self.window.reset();
        self.peer = None;
        self.pending_peer = None;
        self.awaiting_reply = false;
        self.loading = false;
    }

    fn enter_disconnected(&mut self, reason: DisconnectReason, out: &mut Vec<Action>) {
        self.next_generation();
        self.reset_session();
        out.push(Action::StopAllTimers);
        self.set_state(ConnectionState::Disconnected, out);
        out.push(Action::Emit(SyncEvent::Disconnected(reason)));
    }

    fn on_transport_connected(&mut self, out: &mut Vec<Action>) {
        match self.state {
            ConnectionState::Disconnected => self.next_generation(),
            ConnectionState::Connecting => {}
            ConnectionState::Handshaking | ConnectionState::Synchronized => return,
        }
        self.reset_session();
        self.set_state(ConnectionState::Handshaking, out);
        if self.role.sends_connect() {
            out.push(Action::Send(Message::Connect(Connect {
                version: self.identity.version,
                node_id: self.identity.node_id.clone(),
                credentials: self.identity.credentials.clone(),
                options: self.identity.options(),
            })));
        }
        out.push(Action::StartTimer {
            timer: Timer::Handshake,
            generation: self.generation,
        });
    }

    fn on_message(&mut self, message: Message, out: &mut Vec<Action>) {
        if !self.is_open() {
            // Late delivery from a connection we already left.
            return;
        }
        if self.state.is_synchronized() {
            self.note_traffic(out);
        }
        match message {
            Message::Connect(connect) => self.on_connect(connect, out),
            Message::Connected(connected) => self.on_connected(connected, out),
            Message::Error(report) => {
                let err = report.into_sync_error();
                if err.is_fatal() {
                    self.fail(err, out);
                } else {
                    out.push(Action::Emit(SyncEvent::Error(err)));
                }
            }
            Message::Ping(_) if self.state.is_synchronized() => {
                out.push(Action::Send(Message::Pong(Pong {
                    received: self.cursors.received(),
                })));
            }
            Message::Pong(_) if self.state.is_synchronized() => {}
            Message::Sync(batch) if self.state.is_synchronized() => self.on_sync(batch, out),
            Message::Synced(synced) if self.state.is_synchronized() => {
                self.on_synced(synced.cursor, out)
            }
            Message::Debug(info) => out.push(Action::Emit(SyncEvent::Debug(info))),
            other => {
                let reason = format!("unexpected {} during {:?}", other.kind(), self.state);
                self.unexpected(reason, out);
            }
        }
    }

    fn note_traffic(&mut self, out: &mut Vec<Action>) {
        if self.awaiting_reply {
            self.awaiting_reply = false;
            out.push(Action::StopTimer(Timer::Reply));
        }
        out.push(Action::StartTimer {
            timer: Timer::Ping,
            generation: self.generation,
        });
    }

    fn on_connect(&mut self, connect: Connect, out: &mut Vec<Action>) {
        let expecting = self.role.verifies_credentials()
            && self.state == ConnectionState::Handshaking
            && self.pending_peer.is_none();
        if !expecting {
            let reason = format!("unexpected connect during {:?}", self.state);
            return self.unexpected(reason, out);
        }
        let peer = match self.check_peer(connect.node_id, connect.version, &connect.options) {
            Ok(peer) => peer,
            Err(err) => return self.fail(err, out),
        };
        self.pending_peer = Some(peer.clone());
        out.push(Action::Authenticate {
            generation: self.generation,
            node_id: peer.node_id,
            credentials: connect.credentials,
        });
    }

    fn on_verdict(&mut self, generation: u64, verdict: Verdict, out: &mut Vec<Action>) {
        if generation != self.generation || self.state != ConnectionState::Handshaking {
            return;
        }
        let Some(peer) = self.pending_peer.take() else {
            return;
        };
        match verdict {
            Verdict::Accept => {
                out.push(Action::Send(Message::Connected(Connected {
                    version: self.identity.version,
                    node_id: self.identity.node_id.clone(),
                    options: self.identity.options(),
                })));
                self.synchronize(peer, out);
            }
            Verdict::Reject(reason) => {
                self.fail(SyncError::local(ErrorKind::WrongCredentials, reason), out);
            }
        }
    }

    fn on_connected(&mut self, connected: Connected, out: &mut Vec<Action>) {
        if !self.role.sends_connect() || self.state != ConnectionState::Handshaking {
            let reason = format!("unexpected connected during {:?}", self.state);
            return self.unexpected(reason, out);
        }
        match self.check_peer(connected.node_id, connected.version, &connected.options) {
            Ok(peer) => self.synchronize(peer, out),
            Err(err) => self.fail(err, out),
        }
    }

    fn check_peer(
        &self,
        node_id: NodeId,
        version: ProtocolVersion,
        options: &HandshakeOptions,
    ) -> Result<PeerInfo, SyncError> {
        let ours = self.identity.version;
        let negotiated = ours.negotiate(&version).ok_or_else(|| {
            SyncError::local(
                ErrorKind::WrongProtocol,
                format!("peer speaks {}, this node speaks {}", version, ours),
            )
        })?;
        if let Some(expected) = &self.identity.subprotocol {
            if options.subprotocol.as_ref() != Some(expected) {
                return Err(SyncError::local(
                    ErrorKind::WrongSubprotocol,
                    format!(
                        "expected subprotocol {}, peer announced {}",
                        expected,
                        options.subprotocol.as_deref().unwrap_or("none")
                    ),
                ));
            }
        }
        Ok(PeerInfo {
            node_id,
            version: negotiated,
            subprotocol: options.subprotocol.clone(),
        })
    }

    fn synchronize(&mut self, peer: PeerInfo, out: &mut Vec<Action>) {
        out.push(Action::StopTimer(Timer::Handshake));
        self.peer = Some(peer.clone());
        self.set_state(ConnectionState::Synchronized, out);
        out.push(Action::Emit(SyncEvent::Synchronized(peer)));
        out.push(Action::StartTimer {
            timer: Timer::Ping,
            generation: self.generation,
        });
        self.request_batch(out);
    }

    fn on_sync(&mut self, batch: SyncBatch, out: &mut Vec<Action>) {
        match self.cursors.classify(&batch) {
            BatchPosition::Gap { expected } => {
                let err = SyncError::local(
                    ErrorKind::WrongPosition,
                    format!("expected sync from {}, got {}", expected, batch.since),
                );
                self.fail(err, out);
            }
            BatchPosition::Overflow => {
                let err = SyncError::local(
                    ErrorKind::WrongPosition,
                    format!(
                        "sync from {} with {} entries runs past the cursor range",
                        batch.since,
                        batch.entries.len()
                    ),
                );
                self.fail(err, out);
            }
            BatchPosition::Duplicate => {
                out.push(Action::Send(Message::Synced(Synced {
                    cursor: self.cursors.received(),
                })));
            }
            BatchPosition::Extends { skip, end } => {
                let entries = batch.entries.into_iter().skip(skip).collect();
                out.push(Action::ApplyEntries {
                    generation: self.generation,
                    entries,
                    end,
                });
            }
        }
    }

    fn on_synced(&mut self, cursor: Cursor, out: &mut Vec<Action>) {
        let Some(ack) = self.window.acknowledge(cursor) else {
            return;
        };
        if self.cursors.mark_sent(ack.cursor) {
            out.push(Action::Emit(SyncEvent::Acknowledged {
                sent: self.cursors.sent(),
            }));
        }
        if ack.released {
            self.request_batch(out);
        }
    }

    fn request_batch(&mut self, out: &mut Vec<Action>) {
        if self.state.is_synchronized() && self.window.is_idle() && !self.loading {
            self.loading = true;
            out.push(Action::LoadEntries {
                generation: self.generation,
                since: self.cursors.sent(),
            });
        }
    }

    fn on_entries_loaded(
        &mut self,
        generation: u64,
        since: Cursor,
        entries: Vec<Entry>,
        out: &mut Vec<Action>,
    ) {
        if generation != self.generation {
            return;
        }
        self.loading = false;
        if !self.state.is_synchronized() || since != self.cursors.sent() || entries.is_empty() {
            return;
        }
        let batch = SyncBatch { since, entries };
        let Some(end) = batch.end() else {
            let reason = format!("local log runs past the cursor range at {}", since);
            self.store_failed(reason, out);
            return;
        };
        if self.window.open(end) {
            out.push(Action::Send(Message::Sync(batch)));
        }
    }

    fn on_timer(&mut self, timer: Timer, out: &mut Vec<Action>) {
        match timer {
            Timer::Ping => {
                if self.state.is_synchronized() && !self.awaiting_reply {
                    self.awaiting_reply = true;
                    out.push(Action::Send(Message::Ping(Ping {
                        received: self.cursors.received(),
                    })));
                    out.push(Action::StartTimer {
                        timer: Timer::Reply,
                        generation: self.generation,
                    });
                }
            }
            Timer::Reply => {
                if self.state.is_synchronized() && self.awaiting_reply {
                    let err = SyncError::local(ErrorKind::Timeout, "no reply to ping");
                    self.fail(err, out);
                }
            }
            Timer::Handshake => {
                if self.state == ConnectionState::Handshaking {
                    let err = SyncError::local(ErrorKind::Timeout, "handshake did not complete");
                    self.fail(err, out);
                }
            }
        }
    }

    /// Report a non-fatal protocol violation to the application and the peer.
    fn unexpected(&mut self, reason: String, out: &mut Vec<Action>) {
        let err = SyncError::local(ErrorKind::UnknownMessage, reason);
        out.push(Action::Send(Message::Error(ErrorReport::from(&err))));
        out.push(Action::Emit(SyncEvent::Error(err)));
    }

    /// Tear the connection down after a fatal error.
    fn fail(&mut self, err: SyncError, out: &mut Vec<Action>) {
        // Errors from the peer are never echoed back.
        if !err.received_from_peer {
            out.push(Action::Send(Message::Error(ErrorReport::from(&err))));
        }
        let reason = DisconnectReason::for_error(err.kind);
        out.push(Action::Emit(SyncEvent::Error(err)));
        out.push(Action::DisconnectTransport { reason });
        self.enter_disconnected(reason, out);
    }

    fn store_failed(&mut self, reason: String, out: &mut Vec<Action>) {
        out.push(Action::Emit(SyncEvent::StoreFailed(reason)));
        out.push(Action::DisconnectTransport {
            reason: DisconnectReason::StoreFailure,
        });
        self.enter_disconnected(DisconnectReason::StoreFailure, out);
    }
}
