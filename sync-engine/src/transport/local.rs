//! In-process transport pair.
//!
//! [`LocalPair`] links two endpoints inside one process. Each direction is
//! a FIFO queue drained by its own delivery task, so `send` returns
//! immediately and the message shows up on the other side asynchronously,
//! optionally after a fixed delay.
//!
//! A connection is established once both endpoints have called `connect()`.
//! Every established connection gets a new generation; delivery tasks of
//! an older generation never deliver into a newer one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use logsync_core::DisconnectReason;
use logsync_types::Message;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Transport, TransportError, TransportEvent};
use crate::events::{lock, EventHub, Subscription};

const LEFT: usize = 0;
const RIGHT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Waiting,
    Connected,
}

enum Delivery {
    Message { at: Instant, message: Message },
    Close { at: Instant },
}

impl Delivery {
    fn at(&self) -> Instant {
        match self {
            Delivery::Message { at, .. } | Delivery::Close { at } => *at,
        }
    }
}

struct Side {
    phase: Phase,
    events: EventHub<TransportEvent>,
    /// Queue towards the other side, present while connected.
    outbox: Option<mpsc::UnboundedSender<Delivery>>,
}

struct Shared {
    delay: Duration,
    generation: u64,
    sides: [Side; 2],
}

impl Shared {
    fn new(delay: Duration) -> Self {
        let side = || Side {
            phase: Phase::Idle,
            events: EventHub::new(),
            outbox: None,
        };
        Self {
            delay,
            generation: 0,
            sides: [side(), side()],
        }
    }
}

/// Two linked in-process endpoints.
#[derive(Debug)]
pub struct LocalPair {
    /// First endpoint (by convention the initiator).
    pub left: LocalEndpoint,
    /// Second endpoint (by convention the responder).
    pub right: LocalEndpoint,
}

impl LocalPair {
    /// Create a pair that delivers as soon as the runtime schedules it.
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Create a pair that delays every delivery by `delay`.
    pub fn with_delay(delay: Duration) -> Self {
        let shared = Arc::new(Mutex::new(Shared::new(delay)));
        Self {
            left: LocalEndpoint {
                shared: Arc::clone(&shared),
                side: LEFT,
            },
            right: LocalEndpoint { shared, side: RIGHT },
        }
    }
}

impl Default for LocalPair {
    fn default() -> Self {
        Self::new()
    }
}

/// One end of a [`LocalPair`].
pub struct LocalEndpoint {
    shared: Arc<Mutex<Shared>>,
    side: usize,
}

impl LocalEndpoint {
    fn other(&self) -> usize {
        1 - self.side
    }
}

impl std::fmt::Debug for LocalEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = if self.side == LEFT { "left" } else { "right" };
        f.debug_struct("LocalEndpoint").field("side", &name).finish()
    }
}

/// Link both sides: open one queue per direction and announce the connection.
fn establish(shared_arc: &Arc<Mutex<Shared>>, shared: &mut Shared) {
    shared.generation += 1;
    let generation = shared.generation;
    for from in [LEFT, RIGHT] {
        let (tx, rx) = mpsc::unbounded_channel();
        shared.sides[from].outbox = Some(tx);
        shared.sides[from].phase = Phase::Connected;
        tokio::spawn(deliver(Arc::clone(shared_arc), generation, 1 - from, rx));
    }
    tracing::debug!(generation, "local pair connected");
    for side in &shared.sides {
        side.events.emit(TransportEvent::Connected);
    }
}

/// Drain one direction of the pair into the `to` side.
async fn deliver(
    shared: Arc<Mutex<Shared>>,
    generation: u64,
    to: usize,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
) {
    while let Some(delivery) = rx.recv().await {
        let at = delivery.at();
        if at > Instant::now() {
            tokio::time::sleep_until(at).await;
        }
        let mut guard = lock(&shared);
        let live = guard.generation == generation && guard.sides[to].phase == Phase::Connected;
        if !live {
            // Receiver left this connection; whatever is still queued is lost.
            continue;
        }
        let side = &mut guard.sides[to];
        match delivery {
            Delivery::Message { message, .. } => {
                side.events.emit(TransportEvent::Message(message));
            }
            Delivery::Close { .. } => {
                side.phase = Phase::Idle;
                side.outbox = None;
                side.events
                    .emit(TransportEvent::Disconnected(DisconnectReason::Remote));
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for LocalEndpoint {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        if shared.sides[self.side].phase != Phase::Idle {
            return Err(TransportError::AlreadyConnecting);
        }
        shared.sides[self.side].phase = Phase::Waiting;
        shared.sides[self.side].events.emit(TransportEvent::Connecting);
        if shared.sides[self.other()].phase == Phase::Waiting {
            establish(&self.shared, shared);
        }
        Ok(())
    }

    async fn disconnect(&self, reason: DisconnectReason) {
        let mut shared = lock(&self.shared);
        let at = Instant::now() + shared.delay;
        let side = &mut shared.sides[self.side];
        match side.phase {
            Phase::Idle => return,
            Phase::Waiting => {}
            Phase::Connected => {
                // The close travels behind everything this side already sent.
                if let Some(outbox) = side.outbox.take() {
                    let _ = outbox.send(Delivery::Close { at });
                }
            }
        }
        side.phase = Phase::Idle;
        side.events.emit(TransportEvent::Disconnected(reason));
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let shared = lock(&self.shared);
        let side = &shared.sides[self.side];
        if side.phase != Phase::Connected {
            return Err(TransportError::NotConnected);
        }
        let outbox = side.outbox.as_ref().ok_or(TransportError::NotConnected)?;
        let at = Instant::now() + shared.delay;
        outbox
            .send(Delivery::Message { at, message })
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> Subscription<TransportEvent> {
        lock(&self.shared).sides[self.side].events.subscribe()
    }

    fn is_connected(&self) -> bool {
        lock(&self.shared).sides[self.side].phase == Phase::Connected
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

    async fn next(events: &mut Subscription<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("event hub closed")
    }

    async fn connected_pair(pair: &LocalPair) {
        pair.left.connect().await.unwrap();
        pair.right.connect().await.unwrap();
    }

    #[tokio::test]
    async fn connects_once_both_sides_connect() {
        let pair = LocalPair::new();
        let mut left = pair.left.subscribe();
        let mut right = pair.right.subscribe();

        pair.left.connect().await.unwrap();
        assert_eq!(next(&mut left).await, TransportEvent::Connecting);
        assert!(!pair.left.is_connected());
        assert_eq!(left.try_recv(), None);

        pair.right.connect().await.unwrap();
        assert_eq!(next(&mut right).await, TransportEvent::Connecting);
        assert_eq!(next(&mut right).await, TransportEvent::Connected);
        assert_eq!(next(&mut left).await, TransportEvent::Connected);
        assert!(pair.left.is_connected());
        assert!(pair.right.is_connected());
    }

    #[tokio::test]
    async fn connect_twice_fails() {
        let pair = LocalPair::new();
        pair.left.connect().await.unwrap();
        assert_eq!(
            pair.left.connect().await,
            Err(TransportError::AlreadyConnecting)
        );
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let pair = LocalPair::new();
        assert_eq!(
            pair.left.send(ping(0)).await,
            Err(TransportError::NotConnected)
        );
    }

    #[tokio::test]
    async fn delivers_in_order_without_loss() {
        let pair = LocalPair::new();
        let mut right = pair.right.subscribe();
        connected_pair(&pair).await;

        for n in 0..50 {
            pair.left.send(ping(n)).await.unwrap();
        }

        let mut got = Vec::new();
        while got.len() < 50 {
            if let TransportEvent::Message(message) = next(&mut right).await {
                got.push(message);
            }
        }
        assert_eq!(got, (0..50).map(ping).collect::<Vec<_>>());
        assert_eq!(right.try_recv(), None);
    }

    #[tokio::test]
    async fn disconnect_reaches_both_sides() {
        let pair = LocalPair::new();
        let mut left = pair.left.subscribe();
        let mut right = pair.right.subscribe();
        connected_pair(&pair).await;

        pair.left.disconnect(DisconnectReason::Manual).await;

        let mut left_events = Vec::new();
        while left_events.last() != Some(&TransportEvent::Disconnected(DisconnectReason::Manual)) {
            left_events.push(next(&mut left).await);
        }
        let mut right_events = Vec::new();
        while right_events.last() != Some(&TransportEvent::Disconnected(DisconnectReason::Remote)) {
            right_events.push(next(&mut right).await);
        }
        assert!(!pair.left.is_connected());
        assert!(!pair.right.is_connected());
    }

    #[tokio::test]
    async fn messages_sent_before_close_arrive_first() {
        let pair = LocalPair::new();
        let mut right = pair.right.subscribe();
        connected_pair(&pair).await;

        pair.left.send(ping(1)).await.unwrap();
        pair.left.disconnect(DisconnectReason::Manual).await;

        let mut tail = Vec::new();
        loop {
            let event = next(&mut right).await;
            let done = matches!(event, TransportEvent::Disconnected(_));
            tail.push(event);
            if done {
                break;
            }
        }
        assert_eq!(
            &tail[tail.len() - 2..],
            &[
                TransportEvent::Message(ping(1)),
                TransportEvent::Disconnected(DisconnectReason::Remote)
            ]
        );
    }

    #[tokio::test]
    async fn in_flight_messages_to_closed_side_are_dropped() {
        let pair = LocalPair::new();
        let mut left = pair.left.subscribe();
        connected_pair(&pair).await;

        pair.right.send(ping(1)).await.unwrap();
        pair.left.disconnect(DisconnectReason::Manual).await;

        // Give the delivery tasks time to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut messages = 0;
        while let Some(event) = left.try_recv() {
            if matches!(event, TransportEvent::Message(_)) {
                messages += 1;
            }
        }
        assert_eq!(messages, 0);
    }

    #[tokio::test]
    async fn disconnect_while_waiting_only_notifies_caller() {
        let pair = LocalPair::new();
        let mut right = pair.right.subscribe();
        pair.left.connect().await.unwrap();

        pair.left.disconnect(DisconnectReason::Manual).await;
        assert_eq!(right.try_recv(), None);

        // Left is idle again and can retry.
        pair.left.connect().await.unwrap();
    }

    #[tokio::test]
    async fn pair_reconnects_after_disconnect() {
        let pair = LocalPair::new();
        let mut right = pair.right.subscribe();
        connected_pair(&pair).await;
        pair.right.disconnect(DisconnectReason::Manual).await;

        // Wait until left has seen the close.
        while pair.left.is_connected() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        connected_pair(&pair).await;
        pair.left.send(ping(7)).await.unwrap();

        loop {
            if let TransportEvent::Message(message) = next(&mut right).await {
                assert_eq!(message, ping(7));
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delay_holds_messages_back() {
        let pair = LocalPair::with_delay(Duration::from_millis(100));
        let mut right = pair.right.subscribe();
        connected_pair(&pair).await;
        while right.try_recv().is_some() {}

        let sent_at = Instant::now();
        pair.left.send(ping(1)).await.unwrap();
        assert_eq!(next(&mut right).await, TransportEvent::Message(ping(1)));
        assert!(sent_at.elapsed() >= Duration::from_millis(100));
    }
}
