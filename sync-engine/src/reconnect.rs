//! Reconnecting transport decorator.
//!
//! [`Reconnect`] wraps any [`Transport`] and brings the connection back
//! after it drops, waiting a jittered, exponentially growing delay between
//! attempts (see [`Backoff`]). Events of the wrapped transport are passed
//! through unchanged.
//!
//! Whether a drop is retried depends on its [`DisconnectReason`]: network
//! drops, timeouts and storage failures are; manual disconnects and
//! shutdowns are not; protocol errors only if configured. A peer that
//! closes right after reporting a fatal error counts as a protocol error.
//!
//! Every retry belongs to an epoch. An explicit disconnect or
//! [`Reconnect::reconnect_now`] starts a new epoch, which cancels the
//! scheduled retry and disowns one that is already connecting.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use logsync_core::{Backoff, DisconnectReason};
use logsync_types::{ErrorKind, Message};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ReconnectConfig;
use crate::events::{lock, EventHub, Subscription};
use crate::transport::{Transport, TransportError, TransportEvent};

struct RetryState {
    backoff: Backoff,
    /// False once the owner disconnected for good.
    enabled: bool,
    epoch: u64,
    pending: Option<JoinHandle<()>>,
    connected_at: Option<Instant>,
    /// Fatal error the peer reported on the current connection.
    peer_error: Option<ErrorKind>,
}

impl RetryState {
    /// Drop the scheduled retry and disown any attempt in flight.
    fn supersede(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.enabled && self.epoch == epoch
    }

    fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }
}

struct Inner<T> {
    transport: T,
    config: ReconnectConfig,
    events: EventHub<TransportEvent>,
    state: Mutex<RetryState>,
}

/// Transport decorator that reconnects after unsolicited drops.
///
/// Must be created inside a tokio runtime.
pub struct Reconnect<T: Transport + 'static> {
    inner: Arc<Inner<T>>,
    forward: JoinHandle<()>,
}

impl<T: Transport + 'static> Reconnect<T> {
    /// Wrap `transport`.
    pub fn new(transport: T, config: ReconnectConfig) -> Self {
        let backoff = Backoff::new(config.base_delay, config.max_delay, config.stable_after);
        let upstream = transport.subscribe();
        let inner = Arc::new(Inner {
            transport,
            config,
            events: EventHub::new(),
            state: Mutex::new(RetryState {
                backoff,
                enabled: false,
                epoch: 0,
                pending: None,
                connected_at: None,
                peer_error: None,
            }),
        });
        let forward = tokio::spawn(forward(Arc::downgrade(&inner), upstream));
        Self { inner, forward }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Consecutive attempts since the last stable connection.
    pub fn attempt(&self) -> u32 {
        lock(&self.inner.state).backoff.attempt()
    }

    /// Whether a retry is scheduled or connecting.
    pub fn is_retry_pending(&self) -> bool {
        lock(&self.inner.state).is_pending()
    }

    /// Skip the pending delay and try to connect right away.
    ///
    /// Succeeds if the link is already up or on its way up.
    pub async fn reconnect_now(&self) -> Result<(), TransportError> {
        let epoch = {
            let mut state = lock(&self.inner.state);
            state.enabled = true;
            state.supersede();
            state.epoch
        };
        self.inner.retry(epoch, false).await
    }
}

impl<T: Transport + 'static> Drop for Reconnect<T> {
    fn drop(&mut self) {
        self.forward.abort();
        if let Some(task) = lock(&self.inner.state).pending.take() {
            task.abort();
        }
    }
}

impl<T: Transport + 'static> std::fmt::Debug for Reconnect<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("Reconnect")
            .field("attempt", &state.backoff.attempt())
            .field("enabled", &state.enabled)
            .field("epoch", &state.epoch)
            .finish()
    }
}

/// Re-emit upstream events, reacting to connection changes first.
async fn forward<T: Transport + 'static>(
    inner: Weak<Inner<T>>,
    mut upstream: Subscription<TransportEvent>,
) {
    while let Some(event) = upstream.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let follow_up = inner.observe(&event);
        inner.events.emit(event);
        if let Some(follow_up) = follow_up {
            inner.events.emit(follow_up);
        }
    }
}

impl<T: Transport + 'static> Inner<T> {
    /// Track uptime and schedule retries. Returns an extra event to emit
    /// after the observed one.
    fn observe(self: &Arc<Self>, event: &TransportEvent) -> Option<TransportEvent> {
        let mut state = lock(&self.state);
        match event {
            TransportEvent::Connected => {
                state.connected_at = Some(Instant::now());
                state.peer_error = None;
                None
            }
            TransportEvent::Message(Message::Error(report)) if report.kind.is_fatal() => {
                state.peer_error = Some(report.kind);
                None
            }
            TransportEvent::Disconnected(reason) => {
                if let Some(since) = state.connected_at.take() {
                    if state.backoff.connection_lasted(since.elapsed()) {
                        tracing::debug!("connection was stable, backoff reset");
                    }
                }
                let reason = match (*reason, state.peer_error.take()) {
                    (DisconnectReason::Remote, Some(kind)) => DisconnectReason::for_error(kind),
                    (reason, _) => reason,
                };
                if !state.enabled || !reason.is_retryable(self.config.retry_protocol_errors) {
                    return None;
                }
                self.schedule(&mut state)
            }
            _ => None,
        }
    }

    /// Start the retry timer, or give up if attempts are exhausted.
    fn schedule(self: &Arc<Self>, state: &mut RetryState) -> Option<TransportEvent> {
        if let Some(max) = self.config.max_attempts {
            if state.backoff.attempt() >= max {
                tracing::warn!(attempts = max, "reconnect attempts exhausted");
                state.enabled = false;
                return Some(TransportEvent::Error(
                    "reconnect attempts exhausted".to_string(),
                ));
            }
        }
        let delay = state.backoff.next_delay();
        let epoch = state.epoch;
        tracing::info!(
            attempt = state.backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        if let Some(task) = state.pending.take() {
            task.abort();
        }
        let inner = Arc::clone(self);
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = lock(&inner.state).is_current(epoch);
            if !current {
                return;
            }
            let _ = inner.retry(epoch, true).await;
        }));
        None
    }

    /// One retry in `epoch`. A failure schedules the next one.
    ///
    /// `in_task` is set when running as the pending retry task.
    async fn retry(self: &Arc<Self>, epoch: u64, in_task: bool) -> Result<(), TransportError> {
        match self.transport.connect().await {
            Ok(()) => {
                let current = lock(&self.state).is_current(epoch);
                if !current {
                    // The owner disconnected while this attempt was connecting.
                    tracing::debug!(epoch, "dropping superseded reconnect");
                    self.transport.disconnect(DisconnectReason::Manual).await;
                }
                Ok(())
            }
            // Already up or on its way up.
            Err(TransportError::AlreadyConnecting) => Ok(()),
            Err(err) => {
                self.connect_failed(epoch, &err, in_task);
                Err(err)
            }
        }
    }

    /// Schedule the next retry after a failed connect in `epoch`.
    ///
    /// When `in_task` is set the caller is the pending retry task, whose
    /// handle is released rather than aborted.
    fn connect_failed(self: &Arc<Self>, epoch: u64, err: &TransportError, in_task: bool) {
        tracing::warn!("reconnect attempt failed: {}", err);
        let follow_up = {
            let mut state = lock(&self.state);
            if !state.is_current(epoch) {
                return;
            }
            if in_task {
                state.pending = None;
            }
            self.schedule(&mut state)
        };
        if let Some(event) = follow_up {
            self.events.emit(event);
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> Transport for Reconnect<T> {
    async fn connect(&self) -> Result<(), TransportError> {
        let epoch = {
            let mut state = lock(&self.inner.state);
            if state.is_pending() {
                // A retry is already scheduled; let it run.
                return Err(TransportError::AlreadyConnecting);
            }
            state.enabled = true;
            state.epoch
        };
        let result = self.inner.transport.connect().await;
        match &result {
            Ok(()) | Err(TransportError::AlreadyConnecting) => {}
            Err(err) => self.inner.connect_failed(epoch, err, false),
        }
        result
    }

    async fn disconnect(&self, reason: DisconnectReason) {
        let keep_retrying = reason.is_retryable(self.inner.config.retry_protocol_errors);
        if !keep_retrying {
            let mut state = lock(&self.inner.state);
            state.enabled = false;
            state.supersede();
        }
        self.inner.transport.disconnect(reason).await;
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.inner.transport.send(message).await
    }

    fn subscribe(&self) -> Subscription<TransportEvent> {
        self.inner.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }
}
