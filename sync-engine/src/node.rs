//! SyncNode - the main interface for logsync.
//!
//! This module provides [`SyncNode`], the primary API for applications to
//! keep an event log synchronized with one peer.
//!
//! # Architecture
//!
//! SyncNode uses the pure state machine from sync-core for protocol logic
//! and runs it on a dedicated task that interprets the resulting actions:
//! sending over the [`Transport`], calling the [`LogStore`] and
//! [`Authenticator`], and keeping timer deadlines.
//!
//! ```text
//! Application → SyncNode ─commands─▶ node task → Transport → Network
//!                                        ↓
//!                               sync-core (pure state machine)
//! ```
//!
//! Every transition happens on that task, one at a time. Storage and
//! authentication calls are awaited in place, so nothing else happens
//! to the connection while they run.
//!
//! # Example
//!
//! ```ignore
//! use logsync_engine::{LocalPair, MemoryLog, NodeConfig, SyncNode};
//!
//! let pair = LocalPair::new();
//! let client = SyncNode::initiator(NodeConfig::new("client"), pair.left, MemoryLog::new());
//! client.connect().await?;
//! client.wait_for_state(ConnectionState::Synchronized).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use logsync_core::{
    Action, ConnectionState, DisconnectReason, Event, Protocol, Role, SyncCursors, SyncEvent,
    Timer,
};
use logsync_types::{ErrorKind, NodeId, SyncError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant};

use crate::auth::{AllowAll, Authenticator};
use crate::config::NodeConfig;
use crate::events::{EventHub, Subscription};
use crate::store::{LogStore, StoreError};
use crate::transport::{Transport, TransportError, TransportEvent};

/// Events a node publishes to the application.
pub type NodeEvent = SyncEvent;

/// Node errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Sync(#[from] SyncError),

    /// The node was destroyed.
    #[error("node was destroyed")]
    WasDestroyed,
}

/// Snapshot of a node's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    /// Connection state.
    pub state: ConnectionState,
    /// Sync counters.
    pub cursors: SyncCursors,
}

enum Command {
    Connect(oneshot::Sender<Result<(), NodeError>>),
    Disconnect(oneshot::Sender<()>),
    LocalEntries,
    Destroy(oneshot::Sender<()>),
}

/// Handle to a running sync node.
///
/// Dropping the handle destroys the node.
pub struct SyncNode {
    node_id: NodeId,
    role: Role,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<NodeStatus>,
    events: EventHub<NodeEvent>,
}

impl SyncNode {
    /// Start a node that opens the handshake.
    pub fn initiator<T, S>(config: NodeConfig, transport: T, store: S) -> Self
    where
        T: Transport + 'static,
        S: LogStore + 'static,
    {
        Self::spawn(
            Role::Initiator,
            config,
            transport,
            store,
            Arc::new(AllowAll),
            SyncCursors::new(),
        )
    }

    /// Start a node that waits for the handshake and checks credentials.
    pub fn responder<T, S, A>(config: NodeConfig, transport: T, store: S, auth: A) -> Self
    where
        T: Transport + 'static,
        S: LogStore + 'static,
        A: Authenticator + 'static,
    {
        Self::spawn(
            Role::Responder,
            config,
            transport,
            store,
            Arc::new(auth),
            SyncCursors::new(),
        )
    }

    /// Start a node with every option spelled out.
    ///
    /// `cursors` resumes a previous session; pass `SyncCursors::new()` for
    /// a fresh peer. Must be called inside a tokio runtime.
    pub fn spawn<T, S>(
        role: Role,
        config: NodeConfig,
        transport: T,
        store: S,
        auth: Arc<dyn Authenticator>,
        cursors: SyncCursors,
    ) -> Self
    where
        T: Transport + 'static,
        S: LogStore + 'static,
    {
        let node_id = config.identity.node_id.clone();
        let protocol = Protocol::resume(role, config.identity.clone(), cursors);
        let (status_tx, status) = watch::channel(NodeStatus {
            state: protocol.state(),
            cursors: protocol.cursors(),
        });
        let (commands, command_rx) = mpsc::unbounded_channel();
        let events = EventHub::new();
        let transport_events = transport.subscribe();

        let runtime = Runtime {
            protocol,
            transport,
            store,
            auth,
            config,
            events: events.clone(),
            status: status_tx,
            timers: HashMap::new(),
            connect_error: None,
        };
        tokio::spawn(runtime.run(command_rx, transport_events));

        Self {
            node_id,
            role,
            commands,
            status,
            events,
        }
    }

    /// This node's id.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// This node's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Current sync counters. Persist these to resume later.
    pub fn cursors(&self) -> SyncCursors {
        self.status.borrow().cursors
    }

    /// Listen for node events.
    pub fn subscribe(&self) -> Subscription<NodeEvent> {
        self.events.subscribe()
    }

    /// Start connecting.
    ///
    /// Returns once the transport accepted the request; the handshake
    /// continues in the background. No-op unless disconnected.
    pub async fn connect(&self) -> Result<(), NodeError> {
        let (reply, result) = oneshot::channel();
        self.command(Command::Connect(reply))?;
        result.await.map_err(|_| NodeError::WasDestroyed)?
    }

    /// Close the connection and stop any reconnection.
    pub async fn disconnect(&self) -> Result<(), NodeError> {
        let (reply, done) = oneshot::channel();
        self.command(Command::Disconnect(reply))?;
        done.await.map_err(|_| NodeError::WasDestroyed)
    }

    /// Tell the node that new local entries were appended to the store.
    pub fn notify_local_entries(&self) -> Result<(), NodeError> {
        self.command(Command::LocalEntries)
    }

    /// Wait until the node reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<(), NodeError> {
        let mut status = self.status.clone();
        loop {
            if status.borrow_and_update().state == state {
                return Ok(());
            }
            status
                .changed()
                .await
                .map_err(|_| NodeError::WasDestroyed)?;
        }
    }

    /// Disconnect and stop the node task. Idempotent.
    ///
    /// Operations issued afterwards fail with [`NodeError::WasDestroyed`].
    pub async fn destroy(&self) {
        let (reply, done) = oneshot::channel();
        if self.command(Command::Destroy(reply)).is_ok() {
            let _ = done.await;
        }
    }

    fn command(&self, command: Command) -> Result<(), NodeError> {
        self.commands
            .send(command)
            .map_err(|_| NodeError::WasDestroyed)
    }
}

impl std::fmt::Debug for SyncNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncNode")
            .field("node_id", &self.node_id)
            .field("role", &self.role)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

/// State owned by the node task.
struct Runtime<T, S> {
    protocol: Protocol,
    transport: T,
    store: S,
    auth: Arc<dyn Authenticator>,
    config: NodeConfig,
    events: EventHub<NodeEvent>,
    status: watch::Sender<NodeStatus>,
    /// Armed timers: deadline and the generation they were started in.
    timers: HashMap<Timer, (Instant, u64)>,
    /// Failure of the last transport connect, reported to `connect()`.
    connect_error: Option<TransportError>,
}

impl<T: Transport, S: LogStore> Runtime<T, S> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: Subscription<TransportEvent>,
    ) {
        tracing::debug!(node = %self.node_id(), role = ?self.protocol.role(), "node started");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect(reply)) => {
                        let result = self.connect().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Disconnect(reply)) => {
                        let reason = DisconnectReason::Manual;
                        self.dispatch(Event::DisconnectRequested { reason }).await;
                        let _ = reply.send(());
                    }
                    Some(Command::LocalEntries) => {
                        self.dispatch(Event::LocalEntriesAvailable).await;
                    }
                    Some(Command::Destroy(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        // Every handle is gone.
                        self.shutdown().await;
                        break;
                    }
                },
                event = transport_events.recv() => match event {
                    Some(event) => self.on_transport_event(event).await,
                    None => break,
                },
                _ = sleep_until(deadline) => self.fire_timers().await,
            }
        }

        // Anything still queued is answered with WasDestroyed by dropping
        // its reply channel.
        commands.close();
        while commands.try_recv().is_ok() {}
        tracing::debug!(node = %self.node_id(), "node stopped");
    }

    fn node_id(&self) -> &NodeId {
        &self.protocol.identity().node_id
    }

    async fn connect(&mut self) -> Result<(), NodeError> {
        self.connect_error = None;
        self.dispatch(Event::ConnectRequested).await;
        match self.connect_error.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!(node = %self.node_id(), "destroying node");
        let reason = DisconnectReason::Destroy;
        self.dispatch(Event::DisconnectRequested { reason }).await;
        self.events.emit(NodeEvent::Error(SyncError::local(
            ErrorKind::WasDestroyed,
            "node destroyed",
        )));
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        let event = match event {
            TransportEvent::Connecting => Event::TransportConnecting,
            TransportEvent::Connected => Event::TransportConnected,
            TransportEvent::Disconnected(reason) => Event::TransportDisconnected { reason },
            TransportEvent::Message(message) => {
                tracing::trace!(node = %self.node_id(), kind = message.kind(), "received");
                Event::MessageReceived(message)
            }
            TransportEvent::Malformed(reason) => {
                tracing::warn!(node = %self.node_id(), "malformed message: {}", reason);
                Event::MalformedReceived { reason }
            }
            TransportEvent::Error(reason) => {
                tracing::warn!(node = %self.node_id(), "transport error: {}", reason);
                return;
            }
        };
        self.dispatch(event).await;
    }

    /// Feed an event to the state machine and execute the resulting
    /// actions, including any events they produce in turn.
    async fn dispatch(&mut self, event: Event) {
        let mut queue = vec![event];
        while let Some(event) = queue.pop() {
            let actions = self.protocol.on_event(event);
            let mut follow_ups = Vec::new();
            for action in actions {
                if let Some(next) = self.execute(action).await {
                    follow_ups.push(next);
                }
            }
            // Keep follow-ups in the order they were produced.
            queue.extend(follow_ups.into_iter().rev());
        }
        self.publish_status();
    }

    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::ConnectTransport => match self.transport.connect().await {
                Ok(()) | Err(TransportError::AlreadyConnecting) => None,
                Err(err) => {
                    tracing::warn!(node = %self.node_id(), "connect failed: {}", err);
                    self.connect_error = Some(err);
                    Some(Event::ConnectFailed)
                }
            },
            Action::DisconnectTransport { reason } => {
                tracing::debug!(node = %self.node_id(), %reason, "disconnecting transport");
                self.transport.disconnect(reason).await;
                None
            }
            Action::Send(message) => {
                let kind = message.kind();
                if let Err(err) = self.transport.send(message).await {
                    tracing::debug!(node = %self.node_id(), kind, "dropping message: {}", err);
                }
                None
            }
            Action::Authenticate {
                generation,
                node_id,
                credentials,
            } => {
                let verdict = self.auth.verify(&node_id, credentials.as_ref()).await;
                tracing::debug!(node = %self.node_id(), peer = %node_id, ?verdict, "authenticated");
                Some(Event::AuthVerdict {
                    generation,
                    verdict,
                })
            }
            Action::ApplyEntries {
                generation,
                entries,
                end,
            } => match self.store.apply_entries(entries).await {
                Ok(()) => Some(Event::EntriesApplied { generation, end }),
                Err(err) => Some(Event::ApplyFailed {
                    generation,
                    reason: err.to_string(),
                }),
            },
            Action::LoadEntries { generation, since } => {
                let limit = self.config.batch_size;
                match self.store.entries_since(since, limit).await {
                    Ok(entries) => Some(Event::EntriesLoaded {
                        generation,
                        since,
                        entries,
                    }),
                    Err(err) => Some(Event::LoadFailed {
                        generation,
                        reason: err.to_string(),
                    }),
                }
            }
            Action::StartTimer { timer, generation } => {
                let deadline = Instant::now() + self.timeout_for(timer);
                self.timers.insert(timer, (deadline, generation));
                None
            }
            Action::StopTimer(timer) => {
                self.timers.remove(&timer);
                None
            }
            Action::StopAllTimers => {
                self.timers.clear();
                None
            }
            Action::Emit(event) => {
                self.log_event(&event);
                self.events.emit(event);
                None
            }
        }
    }

    fn log_event(&self, event: &NodeEvent) {
        let node = self.node_id();
        match event {
            NodeEvent::StateChanged(state) => {
                tracing::debug!(node = %node, ?state, "state changed");
            }
            NodeEvent::Synchronized(peer) => {
                tracing::info!(node = %node, peer = %peer.node_id, version = %peer.version, "synchronized");
            }
            NodeEvent::Disconnected(reason) => {
                tracing::info!(node = %node, %reason, "disconnected");
            }
            NodeEvent::Error(err) if err.is_fatal() => {
                tracing::warn!(node = %node, from_peer = err.received_from_peer, "fatal protocol error: {}", err);
            }
            NodeEvent::Error(err) => {
                tracing::debug!(node = %node, from_peer = err.received_from_peer, "protocol error: {}", err);
            }
            NodeEvent::StoreFailed(reason) => {
                tracing::error!(node = %node, "storage failed: {}", reason);
            }
            NodeEvent::EntriesReceived { .. }
            | NodeEvent::Acknowledged { .. }
            | NodeEvent::Debug(_) => {}
        }
    }

    fn timeout_for(&self, timer: Timer) -> Duration {
        match timer {
            Timer::Handshake => self.config.handshake_timeout,
            Timer::Ping => self.config.ping_interval,
            Timer::Reply => self.config.reply_timeout,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|(deadline, _)| *deadline).min()
    }

    async fn fire_timers(&mut self) {
        let now = Instant::now();
        let mut due: Vec<(Timer, Instant, u64)> = self
            .timers
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(timer, (deadline, generation))| (*timer, *deadline, *generation))
            .collect();
        due.sort_by_key(|(_, deadline, _)| *deadline);
        for (timer, _, generation) in due {
            // An earlier firing may have stopped or re-armed this one.
            match self.timers.get(&timer) {
                Some((deadline, _)) if *deadline <= now => {
                    self.timers.remove(&timer);
                }
                _ => continue,
            }
            self.dispatch(Event::TimerFired { timer, generation }).await;
        }
    }

    fn publish_status(&self) {
        let next = NodeStatus {
            state: self.protocol.state(),
            cursors: self.protocol.cursors(),
        };
        self.status.send_if_modified(|status| {
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} (sent {}, received {})",
            self.state,
            self.cursors.sent(),
            self.cursors.received()
        )
    }
}
