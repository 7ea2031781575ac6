//! Connection manager for the status feed.
//!
//! Owns one logical duplex channel: connect, reconnect with exponential
//! backoff, idle teardown, and frame parsing. Constructed with explicit
//! config and owned by whichever component needs live data; there is no
//! module-level socket.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use suds_proto::{ClientFrame, Machine};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Consecutive failed reconnects tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// No-traffic window: closes the channel when no inbound frame arrives
    /// in time. The close is reconnect-eligible.
    pub idle_timeout: Duration,
    /// No-user-activity window: closes the channel when the consumer stops
    /// reporting interaction. The channel parks until `connect()` is called
    /// again.
    pub activity_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            idle_timeout: Duration::from_secs(90),
            activity_timeout: Duration::from_secs(600),
        }
    }
}

/// Everything the consumer hears from the channel.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The channel opened and a snapshot was requested.
    Open,
    /// A full snapshot arrived from the feed.
    Snapshot { seq: u64, machines: Vec<Machine> },
    ConnectivityChanged(ConnectionState),
    /// Transport-level trouble; does not itself change state.
    TransportError(String),
    /// The reconnect ceiling was hit. Reported once; the channel stays
    /// closed until `connect()` is called again.
    ReconnectsExhausted,
}

struct Driver {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    reconnect_attempt: Arc<AtomicU32>,
    last_activity: Arc<StdMutex<Instant>>,
    driver: StdMutex<Option<Driver>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Idle)),
            events,
            reconnect_attempt: Arc::new(AtomicU32::new(0)),
            last_activity: Arc::new(StdMutex::new(Instant::now())),
            driver: StdMutex::new(None),
        };
        (manager, receiver)
    }

    /// Open the channel. No-op while a connect or open session is already
    /// running; after a close, starts a fresh reconnect cycle.
    pub fn connect(&self) {
        let mut slot = self.driver.lock().unwrap();
        if let Some(driver) = slot.as_ref() {
            if !driver.task.is_finished() {
                debug!("connect ignored: channel already active");
                return;
            }
        }
        self.reconnect_attempt.store(0, Ordering::Relaxed);
        self.record_activity();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_driver(
            self.config.clone(),
            Arc::clone(&self.state),
            self.events.clone(),
            Arc::clone(&self.reconnect_attempt),
            Arc::clone(&self.last_activity),
            shutdown_rx,
        ));
        *slot = Some(Driver { shutdown, task });
    }

    /// Tear the channel down for good: cancels any pending reconnect timer
    /// and closes the socket. Only an explicit `connect()` leaves this state.
    pub async fn disconnect(&self) {
        let driver = { self.driver.lock().unwrap().take() };
        match driver {
            Some(driver) => {
                let _ = driver.shutdown.send(true);
                let _ = driver.task.await;
            }
            None => set_state(&self.state, &self.events, ConnectionState::Closed).await,
        }
    }

    /// The consumer reports user interaction to keep the channel alive.
    pub fn record_activity(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt.load(Ordering::Relaxed)
    }
}

async fn set_state(
    state: &RwLock<ConnectionState>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    next: ConnectionState,
) {
    let mut guard = state.write().await;
    if *guard != next {
        *guard = next;
        let _ = events.send(ConnectionEvent::ConnectivityChanged(next));
    }
}

enum CloseCause {
    Explicit,
    Unexpected,
    IdleTimeout,
    UserInactivity,
}

async fn run_driver(
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    attempt: Arc<AtomicU32>,
    last_activity: Arc<StdMutex<Instant>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        set_state(&state, &events, ConnectionState::Connecting).await;

        let connected = tokio::select! {
            result = connect_async(config.url.as_str()) => result,
            _ = shutdown.changed() => {
                set_state(&state, &events, ConnectionState::Closed).await;
                return;
            }
        };

        match connected {
            Ok((socket, _response)) => {
                attempt.store(0, Ordering::Relaxed);
                set_state(&state, &events, ConnectionState::Open).await;
                let _ = events.send(ConnectionEvent::Open);

                match drive_open(socket, &config, &events, &last_activity, &mut shutdown).await {
                    CloseCause::Explicit => {
                        set_state(&state, &events, ConnectionState::Closed).await;
                        return;
                    }
                    CloseCause::UserInactivity => {
                        debug!("user inactivity window elapsed, parking channel");
                        set_state(&state, &events, ConnectionState::Closed).await;
                        return;
                    }
                    // Both take the reconnect path below.
                    CloseCause::Unexpected | CloseCause::IdleTimeout => {}
                }
            }
            Err(err) => {
                let _ = events.send(ConnectionEvent::TransportError(err.to_string()));
            }
        }

        let failures = attempt.load(Ordering::Relaxed);
        if failures >= config.max_reconnect_attempts {
            warn!(attempts = failures, "reconnect attempts exhausted");
            let _ = events.send(ConnectionEvent::ReconnectsExhausted);
            set_state(&state, &events, ConnectionState::Closed).await;
            return;
        }
        let next = failures + 1;
        attempt.store(next, Ordering::Relaxed);
        let delay = reconnect_delay(&config, next);
        debug!(attempt = next, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                set_state(&state, &events, ConnectionState::Closed).await;
                return;
            }
        }
    }
}

async fn drive_open(
    socket: WsStream,
    config: &ConnectionConfig,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    last_activity: &StdMutex<Instant>,
    shutdown: &mut watch::Receiver<bool>,
) -> CloseCause {
    let (mut sink, mut stream) = socket.split();

    // The feed does not push an initial state unsolicited.
    if let Ok(request) = serde_json::to_string(&ClientFrame::SnapshotRequest) {
        if let Err(err) = sink.send(Message::text(request)).await {
            let _ = events.send(ConnectionEvent::TransportError(err.to_string()));
            return CloseCause::Unexpected;
        }
    }

    let mut idle_deadline = Instant::now() + config.idle_timeout;
    loop {
        let activity_deadline = {
            let last = *last_activity.lock().unwrap();
            last + config.activity_timeout
        };

        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    idle_deadline = Instant::now() + config.idle_timeout;
                    handle_frame(text.as_str(), events);
                }
                Some(Ok(Message::Close(_))) | None => return CloseCause::Unexpected,
                Some(Ok(_)) => {
                    // Pings and the like still count as traffic.
                    idle_deadline = Instant::now() + config.idle_timeout;
                }
                Some(Err(err)) => {
                    let _ = events.send(ConnectionEvent::TransportError(err.to_string()));
                    return CloseCause::Unexpected;
                }
            },
            _ = sleep_until(idle_deadline) => {
                warn!("no inbound traffic within idle window, closing channel");
                let _ = sink.send(Message::Close(None)).await;
                return CloseCause::IdleTimeout;
            }
            _ = sleep_until(activity_deadline) => {
                let _ = sink.send(Message::Close(None)).await;
                return CloseCause::UserInactivity;
            }
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return CloseCause::Explicit;
            }
        }
    }
}

fn handle_frame(text: &str, events: &mpsc::UnboundedSender<ConnectionEvent>) {
    match parse_snapshot(text) {
        Some((seq, machines, skipped)) => {
            if skipped > 0 {
                warn!(skipped, "excluded malformed machine entries from snapshot");
            }
            let _ = events.send(ConnectionEvent::Snapshot { seq, machines });
        }
        None => warn!("discarding malformed feed frame"),
    }
}

/// Lenient snapshot decode: a bad machine entry is excluded, not fatal.
/// Returns `None` when the frame as a whole is not a snapshot.
fn parse_snapshot(text: &str) -> Option<(u64, Vec<Machine>, usize)> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "snapshot" {
        return None;
    }
    let seq = value.get("seq")?.as_u64()?;
    let entries = value.get("machines")?.as_array()?;

    let mut machines = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        match serde_json::from_value::<Machine>(entry.clone()) {
            Ok(machine) => machines.push(machine),
            Err(err) => {
                debug!(error = %err, "skipping malformed machine entry");
                skipped += 1;
            }
        }
    }
    Some((seq, machines, skipped))
}

fn reconnect_delay(config: &ConnectionConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    config
        .reconnect_initial_delay
        .saturating_mul(1u32 << exponent)
        .min(config.reconnect_max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_and_caps() {
        let config = ConnectionConfig::new("ws://localhost/ws");
        assert_eq!(reconnect_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(reconnect_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(reconnect_delay(&config, 6), Duration::from_secs(30));
        assert_eq!(reconnect_delay(&config, 40), Duration::from_secs(30));
    }

    #[test]
    fn parse_snapshot_accepts_well_formed_frames() {
        let frame = r#"{"type":"snapshot","seq":3,"machines":[
            {"id":"RVREB-W1","shortName":"W1","kind":"washer","status":"available",
             "timeRemainingSeconds":0,"position":{"x":1.0,"y":2.0}}
        ]}"#;
        let (seq, machines, skipped) = parse_snapshot(frame).unwrap();
        assert_eq!(seq, 3);
        assert_eq!(machines.len(), 1);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn parse_snapshot_excludes_bad_entries() {
        let frame = r#"{"type":"snapshot","seq":4,"machines":[
            {"id":"RVREB-W1","shortName":"W1","kind":"washer","status":"available",
             "timeRemainingSeconds":0,"position":{"x":1.0,"y":2.0}},
            {"id":"RVREB-W2","kind":"mangler"}
        ]}"#;
        let (_, machines, skipped) = parse_snapshot(frame).unwrap();
        assert_eq!(machines.len(), 1);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn parse_snapshot_rejects_other_shapes() {
        assert!(parse_snapshot("not json").is_none());
        assert!(parse_snapshot(r#"{"type":"pong"}"#).is_none());
        assert!(parse_snapshot(r#"[1,2,3]"#).is_none());
    }
}
