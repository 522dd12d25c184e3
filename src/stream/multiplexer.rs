// =============================================================================
// Subscription Multiplexer — many consumers, one upstream connection
// =============================================================================
//
// UI widgets ask for live ticks per symbol; upstream wants one WebSocket
// with one subscribe/unsubscribe frame per distinct symbol. The multiplexer
// sits between: an actor task owns the single connection and a
// `symbol -> listener set` table, and arbitrates every transition.
//
// Guarantees:
//   - At most one upstream subscribe/unsubscribe frame per symbol per
//     refcount transition (0 -> 1 and -> 0), never per consumer.
//   - Listener sets survive connection loss; on reconnect every tracked
//     symbol is re-subscribed because upstream has no memory across
//     connections.
//   - Reconnects use exponential backoff, bounded, retried for as long as at
//     least one listener remains. Connection errors never reach listeners.
//   - A tick fans out to the symbol's listeners in registration order; one
//     slow or dead listener cannot block the rest (per-listener unbounded
//     channels).
//
// Idle policy: at total refcount 0 the connection is left open; the next
// subscribe reuses it, and a loss while idle is simply not retried.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{InboundMessage, OutgoingMessage};
use super::transport::{Connection, Connector};
use crate::types::TickEvent;

// =============================================================================
// Connection state
// =============================================================================

/// Lifecycle of the single upstream connection. Exactly one instance,
/// process-wide, owned by the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
        }
    }
}

// =============================================================================
// Backoff
// =============================================================================

/// Bounded exponential backoff for reconnect scheduling.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    /// The delay to wait before the next attempt. Doubles per call, capped
    /// at `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.unwrap_or(self.initial);
        self.current = Some((delay * 2).min(self.max));
        delay
    }

    /// Call on a successful connect so the next loss starts small again.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

// =============================================================================
// Public handle
// =============================================================================

enum Command {
    Subscribe {
        symbol: String,
        listener: ListenerHandle,
    },
    Release {
        symbol: String,
        id: Uuid,
    },
}

struct ListenerHandle {
    id: Uuid,
    sender: mpsc::UnboundedSender<TickEvent>,
}

/// Shared handle to the multiplexer. Cheap to clone; all clones talk to the
/// same actor and the same connection.
#[derive(Clone)]
pub struct TickMultiplexer {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<ConnectionState>>,
}

impl TickMultiplexer {
    /// Spawn the multiplexer actor. `connector` is the only way the actor
    /// ever reaches the network.
    pub fn new(connector: Arc<dyn Connector>, backoff: Backoff) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let actor = MuxActor {
            connector,
            commands: commands_rx,
            table: HashMap::new(),
            conn: None,
            pending_connect: None,
            reconnect_at: None,
            backoff,
            state: state.clone(),
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            state,
        }
    }

    /// Register interest in `symbol`. The returned [`Subscription`] starts
    /// receiving ticks as soon as the upstream subscription is live; if the
    /// connection is down it receives nothing until recovery, never an
    /// error.
    pub fn subscribe(&self, symbol: &str) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let _ = self.commands.send(Command::Subscribe {
            symbol: symbol.to_string(),
            listener: ListenerHandle { id, sender: tx },
        });

        Subscription {
            symbol: symbol.to_string(),
            id,
            events: rx,
            commands: self.commands.clone(),
            released: false,
        }
    }

    /// Current state of the single upstream connection.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }
}

/// One consumer's live-tick stream for one symbol.
///
/// Owned exclusively by its caller. `release` is idempotent and safe while
/// the connection is down; dropping the subscription releases as a safety
/// net.
pub struct Subscription {
    symbol: String,
    id: Uuid,
    events: mpsc::UnboundedReceiver<TickEvent>,
    commands: mpsc::UnboundedSender<Command>,
    released: bool,
}

impl Subscription {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Next event for this symbol. `None` once released or after the
    /// multiplexer shuts down.
    pub async fn recv(&mut self) -> Option<TickEvent> {
        self.events.recv().await
    }

    /// Stop receiving and drop this consumer's refcount. Calling more than
    /// once is a no-op.
    pub fn release(&mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = self.commands.send(Command::Release {
            symbol: self.symbol.clone(),
            id: self.id,
        });
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_inner();
    }
}

// =============================================================================
// Actor
// =============================================================================

enum Step {
    Command(Option<Command>),
    Inbound(Option<InboundMessage>),
    ConnectDone(Result<Connection>),
    RetryDue,
}

struct MuxActor {
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// symbol -> listeners in registration order. An entry exists iff its
    /// refcount (listener count) is > 0.
    table: HashMap<String, Vec<ListenerHandle>>,
    conn: Option<Connection>,
    pending_connect: Option<BoxFuture<'static, Result<Connection>>>,
    reconnect_at: Option<Instant>,
    backoff: Backoff,
    state: Arc<RwLock<ConnectionState>>,
}

/// Pends forever while there is no live connection.
async fn recv_inbound(conn: &mut Option<Connection>) -> Option<InboundMessage> {
    match conn {
        Some(c) => c.inbound.recv().await,
        None => std::future::pending().await,
    }
}

/// Drives an in-flight connect attempt; pends forever while there is none.
/// The future lives in the actor, so partial progress survives each
/// `select!` round.
async fn poll_connect(
    pending: &mut Option<BoxFuture<'static, Result<Connection>>>,
) -> Result<Connection> {
    match pending {
        Some(f) => f.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Fires at the reconnect deadline; pends forever while none is scheduled.
async fn wait_deadline(at: Option<Instant>) {
    match at {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl MuxActor {
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                cmd = self.commands.recv() => Step::Command(cmd),
                msg = recv_inbound(&mut self.conn) => Step::Inbound(msg),
                res = poll_connect(&mut self.pending_connect) => Step::ConnectDone(res),
                _ = wait_deadline(self.reconnect_at) => Step::RetryDue,
            };

            match step {
                Step::Command(Some(cmd)) => self.handle_command(cmd),
                Step::Command(None) => {
                    // Every handle and subscription is gone.
                    info!("multiplexer shutting down");
                    *self.state.write() = ConnectionState::Closing;
                    self.conn = None;
                    *self.state.write() = ConnectionState::Disconnected;
                    break;
                }
                Step::Inbound(Some(msg)) => self.handle_inbound(msg),
                Step::Inbound(None) => self.handle_connection_loss(),
                Step::ConnectDone(res) => {
                    self.pending_connect = None;
                    match res {
                        Ok(conn) => self.handle_connected(conn),
                        Err(e) => {
                            warn!(error = %e, "connect attempt failed");
                            *self.state.write() = ConnectionState::Disconnected;
                            self.schedule_reconnect();
                        }
                    }
                }
                Step::RetryDue => {
                    self.reconnect_at = None;
                    self.begin_connect();
                }
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe { symbol, listener } => {
                let entry = self.table.entry(symbol.clone()).or_default();
                let first = entry.is_empty();
                entry.push(listener);

                if first {
                    debug!(symbol = %symbol, "first listener — tracking symbol");
                    if self.conn.is_some() {
                        self.send_upstream(OutgoingMessage::subscribe(&symbol));
                    } else {
                        self.ensure_connecting();
                    }
                }
            }
            Command::Release { symbol, id } => {
                let Some(entry) = self.table.get_mut(&symbol) else {
                    return;
                };
                let before = entry.len();
                entry.retain(|l| l.id != id);
                if entry.len() == before {
                    // Already-released handle; idempotent no-op.
                    return;
                }
                if entry.is_empty() {
                    self.table.remove(&symbol);
                    debug!(symbol = %symbol, "last listener released — untracking symbol");
                    // Best effort: if the connection is down the upstream
                    // subscription died with it anyway.
                    self.send_upstream(OutgoingMessage::unsubscribe(&symbol));
                    if self.table.is_empty() {
                        // No desired state left; stop any retry schedule.
                        self.reconnect_at = None;
                    }
                }
            }
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    /// Start a connect attempt unless one is already in flight or a backoff
    /// timer is pending.
    fn ensure_connecting(&mut self) {
        if self.conn.is_some() || self.pending_connect.is_some() || self.reconnect_at.is_some() {
            return;
        }
        self.begin_connect();
    }

    fn begin_connect(&mut self) {
        if self.pending_connect.is_some() {
            return;
        }
        *self.state.write() = ConnectionState::Connecting;
        debug!("opening upstream connection");
        self.pending_connect = Some(self.connector.connect());
    }

    fn handle_connected(&mut self, conn: Connection) {
        self.backoff.reset();
        *self.state.write() = ConnectionState::Open;

        // Upstream has no memory of prior subscriptions; replay every
        // tracked symbol.
        for symbol in self.table.keys() {
            let _ = conn.outgoing.send(OutgoingMessage::subscribe(symbol));
        }
        info!(symbols = self.table.len(), "connected — subscriptions replayed");

        self.conn = Some(conn);
    }

    fn handle_connection_loss(&mut self) {
        self.conn = None;
        *self.state.write() = ConnectionState::Disconnected;

        if self.table.is_empty() {
            info!("connection lost while idle — not reconnecting");
            return;
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.table.is_empty() {
            return;
        }
        let delay = self.backoff.next_delay();
        self.reconnect_at = Some(Instant::now() + delay);
        warn!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
    }

    fn send_upstream(&mut self, frame: OutgoingMessage) {
        if let Some(conn) = &self.conn {
            if conn.outgoing.send(frame).is_err() {
                // Write pump is gone; the read side will close shortly and
                // trigger the normal loss path.
                warn!("upstream send failed — connection closing");
            }
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    fn handle_inbound(&mut self, msg: InboundMessage) {
        match msg {
            InboundMessage::Trades(ticks) => {
                for tick in ticks {
                    match self.table.get(&tick.symbol) {
                        Some(listeners) => {
                            // Registration order; a closed receiver is
                            // skipped without affecting the rest.
                            for listener in listeners {
                                let _ = listener.sender.send(TickEvent::Trade(tick.clone()));
                            }
                        }
                        None => {
                            // Race after unsubscribe, or never requested.
                            debug!(symbol = %tick.symbol, "dropping tick for untracked symbol");
                        }
                    }
                }
            }
            InboundMessage::Rejected { symbol, reason } => match symbol {
                Some(symbol) => {
                    warn!(symbol = %symbol, reason = %reason, "upstream rejected subscription");
                    if let Some(listeners) = self.table.get(&symbol) {
                        for listener in listeners {
                            let _ = listener.sender.send(TickEvent::Rejected {
                                reason: reason.clone(),
                            });
                        }
                    }
                }
                None => {
                    warn!(reason = %reason, "upstream error without symbol attribution");
                }
            },
            InboundMessage::Ping => {
                debug!("upstream ping");
            }
            InboundMessage::Ignored => {
                debug!("ignoring unrecognised upstream message");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tick;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Fake connector ──────────────────────────────────────────────────

    /// Test-side view of one established fake connection.
    struct FakeConn {
        /// Frames the multiplexer sent upstream.
        sent: mpsc::UnboundedReceiver<OutgoingMessage>,
        /// Feed inbound messages to the multiplexer. Dropping this simulates
        /// connection loss.
        inbound: mpsc::UnboundedSender<InboundMessage>,
    }

    struct FakeConnector {
        handles: mpsc::UnboundedSender<FakeConn>,
        fail_first: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl FakeConnector {
        fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeConn>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    handles: tx,
                    fail_first: AtomicUsize::new(0),
                    attempts: AtomicUsize::new(0),
                }),
                rx,
            )
        }

        fn pair_failing(fail_first: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeConn>) {
            let (c, rx) = Self::pair();
            c.fail_first.store(fail_first, Ordering::SeqCst);
            (c, rx)
        }
    }

    impl Connector for FakeConnector {
        fn connect(&self) -> BoxFuture<'static, Result<Connection>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);

            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return async { Err(anyhow::anyhow!("simulated connect failure")) }.boxed();
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let _ = self.handles.send(FakeConn {
                sent: out_rx,
                inbound: in_tx,
            });

            async move {
                Ok(Connection {
                    outgoing: out_tx,
                    inbound: in_rx,
                })
            }
            .boxed()
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn test_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(10), Duration::from_millis(50))
    }

    async fn expect_conn(handles: &mut mpsc::UnboundedReceiver<FakeConn>) -> FakeConn {
        tokio::time::timeout(Duration::from_secs(1), handles.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("connector gone")
    }

    async fn expect_frame(conn: &mut FakeConn) -> OutgoingMessage {
        tokio::time::timeout(Duration::from_secs(1), conn.sent.recv())
            .await
            .expect("timed out waiting for upstream frame")
            .expect("connection gone")
    }

    /// Round-trip a sentinel subscribe/unsubscribe through the actor.
    /// Because the command channel is FIFO, once the sentinel frames appear
    /// every previously issued command has been processed.
    async fn sync_actor(mux: &TickMultiplexer, conn: &mut FakeConn, tag: &str) {
        let mut s = mux.subscribe(tag);
        assert_eq!(expect_frame(conn).await, OutgoingMessage::subscribe(tag));
        s.release();
        assert_eq!(expect_frame(conn).await, OutgoingMessage::unsubscribe(tag));
    }

    fn trade(symbol: &str, price: f64) -> InboundMessage {
        InboundMessage::Trades(vec![Tick {
            symbol: symbol.to_string(),
            price,
            timestamp: 1_582_641_900_000,
            volume: None,
        }])
    }

    async fn expect_trade(sub: &mut Subscription) -> Tick {
        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for tick")
            .expect("subscription closed");
        match event {
            TickEvent::Trade(t) => t,
            other => panic!("expected trade, got {other:?}"),
        }
    }

    // ── Tests ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn two_consumers_one_upstream_subscribe() {
        let (connector, mut handles) = FakeConnector::pair();
        let mux = TickMultiplexer::new(connector, test_backoff());

        let mut a = mux.subscribe("AAPL");
        let mut conn = expect_conn(&mut handles).await;
        assert_eq!(expect_frame(&mut conn).await, OutgoingMessage::subscribe("AAPL"));
        assert_eq!(mux.connection_state(), ConnectionState::Open);

        let mut b = mux.subscribe("AAPL");
        sync_actor(&mux, &mut conn, "SYNC").await;

        // Both consumers see the tick, and no second subscribe went out.
        let _ = conn.inbound.send(trade("AAPL", 261.74));
        assert_eq!(expect_trade(&mut a).await.price, 261.74);
        assert_eq!(expect_trade(&mut b).await.price, 261.74);
        assert!(conn.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_only_after_last_release_then_fresh_subscribe() {
        let (connector, mut handles) = FakeConnector::pair();
        let mux = TickMultiplexer::new(connector, test_backoff());

        let mut a = mux.subscribe("AAPL");
        let mut b = mux.subscribe("AAPL");
        let mut conn = expect_conn(&mut handles).await;
        assert_eq!(expect_frame(&mut conn).await, OutgoingMessage::subscribe("AAPL"));

        // First release: symbol still wanted, no upstream traffic.
        a.release();
        sync_actor(&mux, &mut conn, "SYNC1").await;
        assert!(conn.sent.try_recv().is_err());

        // Second release: exactly one unsubscribe.
        b.release();
        assert_eq!(
            expect_frame(&mut conn).await,
            OutgoingMessage::unsubscribe("AAPL")
        );

        // Fresh interest emits a fresh subscribe.
        let _c = mux.subscribe("AAPL");
        assert_eq!(expect_frame(&mut conn).await, OutgoingMessage::subscribe("AAPL"));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (connector, mut handles) = FakeConnector::pair();
        let mux = TickMultiplexer::new(connector, test_backoff());

        let mut a = mux.subscribe("AAPL");
        let mut conn = expect_conn(&mut handles).await;
        assert_eq!(expect_frame(&mut conn).await, OutgoingMessage::subscribe("AAPL"));

        a.release();
        assert_eq!(
            expect_frame(&mut conn).await,
            OutgoingMessage::unsubscribe("AAPL")
        );

        // Second release (and the eventual Drop) must not emit anything.
        a.release();
        drop(a);
        sync_actor(&mux, &mut conn, "SYNC").await;
        assert!(conn.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn reconnect_replays_all_tracked_symbols() {
        let (connector, mut handles) = FakeConnector::pair();
        let mux = TickMultiplexer::new(connector.clone(), test_backoff());

        let _a = mux.subscribe("AAPL");
        let _m = mux.subscribe("MSFT");

        let mut conn = expect_conn(&mut handles).await;
        let first = expect_frame(&mut conn).await;
        let second = expect_frame(&mut conn).await;
        let mut initial = vec![first, second];
        initial.sort_by_key(|f| f.to_json());

        // Kill the connection; refcounts are desired state and must survive.
        drop(conn);

        let mut conn2 = expect_conn(&mut handles).await;
        let mut replayed = vec![
            expect_frame(&mut conn2).await,
            expect_frame(&mut conn2).await,
        ];
        replayed.sort_by_key(|f| f.to_json());
        assert_eq!(initial, replayed);
        assert_eq!(mux.connection_state(), ConnectionState::Open);
        assert!(connector.attempts.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn ticks_route_only_to_their_symbols_listeners() {
        let (connector, mut handles) = FakeConnector::pair();
        let mux = TickMultiplexer::new(connector, test_backoff());

        let mut a = mux.subscribe("AAPL");
        let mut m = mux.subscribe("MSFT");
        let mut conn = expect_conn(&mut handles).await;
        let _ = expect_frame(&mut conn).await;
        let _ = expect_frame(&mut conn).await;

        let _ = conn.inbound.send(trade("AAPL", 261.74));
        let tick = expect_trade(&mut a).await;
        assert_eq!(tick.symbol, "AAPL");

        // Delivery happens in the same actor turn, so by now MSFT's channel
        // would hold the tick if it had been misrouted.
        assert!(m.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn tick_for_untracked_symbol_is_dropped_silently() {
        let (connector, mut handles) = FakeConnector::pair();
        let mux = TickMultiplexer::new(connector, test_backoff());

        let mut a = mux.subscribe("AAPL");
        let mut conn = expect_conn(&mut handles).await;
        let _ = expect_frame(&mut conn).await;

        let _ = conn.inbound.send(trade("TSLA", 900.0));
        let _ = conn.inbound.send(trade("AAPL", 261.74));

        // The AAPL tick arrives; the TSLA one vanished without harm.
        assert_eq!(expect_trade(&mut a).await.symbol, "AAPL");
    }

    #[tokio::test]
    async fn dead_listener_does_not_block_delivery_to_the_rest() {
        let (connector, mut handles) = FakeConnector::pair();
        let mux = TickMultiplexer::new(connector, test_backoff());

        // A listener whose receiver is already gone, registered first.
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        drop(dead_rx);
        let _ = mux.commands.send(Command::Subscribe {
            symbol: "AAPL".into(),
            listener: ListenerHandle {
                id: Uuid::new_v4(),
                sender: dead_tx,
            },
        });

        let mut healthy = mux.subscribe("AAPL");
        let mut conn = expect_conn(&mut handles).await;
        let _ = expect_frame(&mut conn).await;

        let _ = conn.inbound.send(trade("AAPL", 261.74));
        assert_eq!(expect_trade(&mut healthy).await.price, 261.74);
    }

    #[tokio::test]
    async fn rejection_reaches_only_that_symbols_listeners() {
        let (connector, mut handles) = FakeConnector::pair();
        let mux = TickMultiplexer::new(connector, test_backoff());

        let mut bogus = mux.subscribe("BOGUS");
        let mut ok = mux.subscribe("AAPL");
        let mut conn = expect_conn(&mut handles).await;
        let _ = expect_frame(&mut conn).await;
        let _ = expect_frame(&mut conn).await;

        let _ = conn.inbound.send(InboundMessage::Rejected {
            symbol: Some("BOGUS".into()),
            reason: "unknown symbol".into(),
        });

        let event = tokio::time::timeout(Duration::from_secs(1), bogus.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            TickEvent::Rejected {
                reason: "unknown symbol".into()
            }
        );
        assert!(ok.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_reconnect_once_last_listener_released() {
        let (connector, mut handles) = FakeConnector::pair();
        let mux = TickMultiplexer::new(connector, test_backoff());

        let mut a = mux.subscribe("AAPL");
        let mut conn = expect_conn(&mut handles).await;
        let _ = expect_frame(&mut conn).await;

        a.release();
        assert_eq!(
            expect_frame(&mut conn).await,
            OutgoingMessage::unsubscribe("AAPL")
        );

        // Lose the idle connection: nothing left to want it back.
        drop(conn);
        let reconnected =
            tokio::time::timeout(Duration::from_millis(100), handles.recv()).await;
        assert!(reconnected.is_err(), "reconnected with zero listeners");
    }

    #[tokio::test]
    async fn connect_failures_are_retried_until_success() {
        let (connector, mut handles) = FakeConnector::pair_failing(2);
        let mux = TickMultiplexer::new(connector.clone(), test_backoff());

        let _a = mux.subscribe("AAPL");
        let mut conn = expect_conn(&mut handles).await;
        assert_eq!(expect_frame(&mut conn).await, OutgoingMessage::subscribe("AAPL"));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(mux.connection_state(), ConnectionState::Open);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        assert_eq!(b.next_delay(), Duration::from_millis(500));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(30));

        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(500));
    }
}
