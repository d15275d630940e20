//! Push-channel connection lifecycle.
//!
//! [`ReconnectState`] is the clock-free state machine; [`ConnectionManager`]
//! drives it over a websocket and feeds decoded frames to a [`TopicRegistry`].

use crate::registry::{Subscription, TopicRegistry};
use futures_util::{SinkExt, StreamExt};
use ptrack_core::wire::{classify_frame, PushEvent, Topic, DEFAULT_MAX_FRAME_BYTES};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid push url: {0}")]
    InvalidUrl(String),
    #[error("push handshake failed: {0}")]
    Handshake(String),
    #[error("no push url has been configured")]
    NoUrl,
    #[error("connection manager was disconnected")]
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    /// Upper bound on TCP connect plus websocket upgrade.
    pub handshake_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    GivenUp,
    Terminated,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Open => "open",
            ConnectionPhase::Reconnecting => "reconnecting",
            ConnectionPhase::GivenUp => "given-up",
            ConnectionPhase::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    phase: ConnectionPhase,
    attempt: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            phase: ConnectionPhase::Idle,
            attempt: 0,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// An explicit connect request starts a fresh attempt budget.
    pub fn begin_connect(&mut self) {
        self.phase = ConnectionPhase::Connecting;
        self.attempt = 0;
    }

    pub fn on_open(&mut self) {
        if self.phase == ConnectionPhase::Terminated {
            return;
        }
        self.phase = ConnectionPhase::Open;
        self.attempt = 0;
    }

    /// Returns the delay before the next reconnect, or `None` once the
    /// attempt budget is spent or the manager was terminated.
    pub fn on_close(&mut self) -> Option<Duration> {
        match self.phase {
            ConnectionPhase::Terminated | ConnectionPhase::GivenUp => None,
            _ if self.attempt < self.policy.max_attempts => {
                self.attempt += 1;
                self.phase = ConnectionPhase::Reconnecting;
                Some(self.policy.delay_for(self.attempt))
            }
            _ => {
                self.phase = ConnectionPhase::GivenUp;
                None
            }
        }
    }

    pub fn terminate(&mut self) {
        self.phase = ConnectionPhase::Terminated;
    }
}

struct Link {
    machine: ReconnectState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    url: Option<Url>,
}

struct Shared {
    registry: TopicRegistry,
    max_frame_bytes: usize,
    handshake_timeout: Duration,
    link: Mutex<Link>,
    open: AtomicBool,
    wake: Notify,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        let link = lock(&self.link);
        link.generation == generation && link.machine.phase() != ConnectionPhase::Terminated
    }

    fn mark_open(&self, generation: u64) -> Option<mpsc::UnboundedReceiver<Message>> {
        let mut link = lock(&self.link);
        if link.generation != generation || link.machine.phase() == ConnectionPhase::Terminated {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        link.machine.on_open();
        link.outbound = Some(tx);
        self.open.store(true, Ordering::SeqCst);
        Some(rx)
    }

    fn mark_closed(&self, generation: u64) -> Option<Duration> {
        let mut link = lock(&self.link);
        if link.generation != generation {
            return None;
        }
        self.open.store(false, Ordering::SeqCst);
        link.outbound = None;
        link.machine.on_close()
    }

    /// Handshake bounded by the policy timeout. Abandoned early when the
    /// manager is disconnected or a newer attempt starts.
    async fn dial(&self, url: &Url, generation: u64) -> Result<Session, ConnectError> {
        let handshake = tokio::time::timeout(self.handshake_timeout, connect_async(url.clone()));
        let ws = tokio::select! {
            result = handshake => match result {
                Ok(Ok((ws, _))) => ws,
                Ok(Err(err)) => return Err(ConnectError::Handshake(err.to_string())),
                Err(_) => {
                    return Err(ConnectError::Handshake(format!(
                        "no upgrade response within {}ms",
                        self.handshake_timeout.as_millis()
                    )))
                }
            },
            _ = self.wake.notified() => return Err(ConnectError::Terminated),
        };
        let outbound = self.mark_open(generation).ok_or(ConnectError::Terminated)?;
        Ok((ws, outbound))
    }

    fn deliver(&self, text: &str) {
        match classify_frame(text, self.max_frame_bytes) {
            Ok(events) => {
                for event in &events {
                    self.registry.dispatch(event);
                }
            }
            Err(err) => {
                warn!(event = "push_frame_dropped", error = %err);
            }
        }
    }

    async fn pump(&self, mut ws: WsStream, mut outbound: mpsc::UnboundedReceiver<Message>) {
        loop {
            tokio::select! {
                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.deliver(&text),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => self.deliver(&text),
                            Err(err) => warn!(event = "push_frame_dropped", error = %err),
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(event = "push_read_error", error = %err);
                            break;
                        }
                    }
                }
                out = outbound.recv() => {
                    match out {
                        Some(message) => {
                            if let Err(err) = ws.send(message).await {
                                warn!(event = "push_write_error", error = %err);
                                break;
                            }
                        }
                        // Sender dropped: this session was superseded or disconnected.
                        None => break,
                    }
                }
            }
        }
        let _ = ws.close(None).await;
    }
}

type Session = (WsStream, mpsc::UnboundedReceiver<Message>);

async fn drive(
    shared: Arc<Shared>,
    url: Url,
    generation: u64,
    mut session: Option<Session>,
    mut dial_now: bool,
) {
    loop {
        if dial_now {
            let attempt = lock(&shared.link).machine.attempt();
            match shared.dial(&url, generation).await {
                Ok(opened) => {
                    info!(event = "push_connected", url = %url, attempt);
                    session = Some(opened);
                }
                Err(ConnectError::Terminated) => break,
                Err(err) => warn!(event = "push_connect_error", attempt, error = %err),
            }
        }
        if let Some((ws, outbound)) = session.take() {
            shared.pump(ws, outbound).await;
        }

        let Some(delay) = shared.mark_closed(generation) else {
            let phase = lock(&shared.link).machine.phase();
            info!(event = "push_driver_stopped", phase = phase.as_str());
            break;
        };
        let attempt = lock(&shared.link).machine.attempt();
        info!(
            event = "push_reconnect_scheduled",
            attempt,
            delay_ms = delay.as_millis() as u64
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.wake.notified() => {}
        }
        if !shared.is_current(generation) {
            debug!(event = "push_reconnect_cancelled", attempt);
            break;
        }
        dial_now = true;
    }
}

/// Owns one push-channel session at a time plus the topic registry its
/// frames are delivered to.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(registry: TopicRegistry, policy: ReconnectPolicy) -> Self {
        Self::with_max_frame_bytes(registry, policy, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(
        registry: TopicRegistry,
        policy: ReconnectPolicy,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                max_frame_bytes,
                handshake_timeout: policy.handshake_timeout,
                link: Mutex::new(Link {
                    machine: ReconnectState::new(policy),
                    generation: 0,
                    outbound: None,
                    url: None,
                }),
                open: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.shared.registry
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: FnMut(&PushEvent) -> anyhow::Result<()> + Send + 'static,
    {
        self.shared.registry.subscribe(topic, handler)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ConnectionPhase {
        lock(&self.shared.link).machine.phase()
    }

    pub fn attempt(&self) -> u32 {
        lock(&self.shared.link).machine.attempt()
    }

    /// Open a session and wait for the handshake. A failed first attempt is
    /// reported to the caller and still enters the reconnect schedule.
    pub async fn connect(&self, url: &str) -> Result<(), ConnectError> {
        let url = parse_url(url)?;
        let generation = self.begin_attempt(url.clone());

        match self.shared.dial(&url, generation).await {
            Ok(session) => {
                info!(event = "push_connected", url = %url);
                self.spawn_driver(url, generation, Some(session), false);
                Ok(())
            }
            Err(ConnectError::Terminated) => Err(ConnectError::Terminated),
            Err(err) => {
                warn!(event = "push_connect_error", url = %url, error = %err);
                if self.shared.is_current(generation) {
                    self.spawn_driver(url, generation, None, false);
                }
                Err(err)
            }
        }
    }

    /// Explicit reconnect, also valid after the attempt budget ran out.
    pub async fn reconnect(&self) -> Result<(), ConnectError> {
        let url = self.last_url()?;
        self.connect(url.as_str()).await
    }

    /// Non-blocking [`connect`](Self::connect): the handshake and any retries
    /// run on the driver task. Only an unparsable url is reported here.
    pub fn spawn_connect(&self, url: &str) -> Result<(), ConnectError> {
        let url = parse_url(url)?;
        let generation = self.begin_attempt(url.clone());
        self.spawn_driver(url, generation, None, true);
        Ok(())
    }

    pub fn spawn_reconnect(&self) -> Result<(), ConnectError> {
        let url = self.last_url()?;
        let generation = self.begin_attempt(url.clone());
        self.spawn_driver(url, generation, None, true);
        Ok(())
    }

    fn last_url(&self) -> Result<Url, ConnectError> {
        lock(&self.shared.link).url.clone().ok_or(ConnectError::NoUrl)
    }

    /// Rejected with a warning unless the socket is open; never queued.
    pub fn send(&self, text: impl Into<String>) -> bool {
        let link = lock(&self.shared.link);
        match (&link.outbound, self.is_connected()) {
            (Some(tx), true) => tx.send(Message::Text(text.into())).is_ok(),
            _ => {
                warn!(
                    event = "push_send_rejected",
                    phase = link.machine.phase().as_str()
                );
                false
            }
        }
    }

    pub fn disconnect(&self) {
        {
            let mut link = lock(&self.shared.link);
            if link.machine.phase() == ConnectionPhase::Terminated {
                return;
            }
            link.generation += 1;
            link.machine.terminate();
            link.outbound = None;
        }
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.wake.notify_waiters();
        info!(event = "push_disconnected");
    }

    fn begin_attempt(&self, url: Url) -> u64 {
        let generation = {
            let mut link = lock(&self.shared.link);
            link.generation += 1;
            link.outbound = None;
            link.url = Some(url);
            link.machine.begin_connect();
            link.generation
        };
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.wake.notify_waiters();
        generation
    }

    fn spawn_driver(&self, url: Url, generation: u64, session: Option<Session>, dial_now: bool) {
        let shared = self.shared.clone();
        let handle = tokio::spawn(drive(shared, url, generation, session, dial_now));
        // The previous driver exits on its own once it sees a newer generation.
        *lock(&self.driver) = Some(handle);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(handle) = lock(&self.driver).take() {
            handle.abort();
        }
    }
}

fn parse_url(url: &str) -> Result<Url, ConnectError> {
    Url::parse(url).map_err(|err| ConnectError::InvalidUrl(err.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(TopicRegistry::new(), ReconnectPolicy::default())
    }

    fn test_url() -> Url {
        Url::parse("ws://127.0.0.1:9/state/events").expect("url")
    }

    #[test]
    fn delays_grow_linearly_then_give_up() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        state.begin_connect();
        state.on_open();

        let delays: Vec<Option<Duration>> = (0..6).map(|_| state.on_close()).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(1000)),
                Some(Duration::from_millis(2000)),
                Some(Duration::from_millis(3000)),
                Some(Duration::from_millis(4000)),
                Some(Duration::from_millis(5000)),
                None,
            ]
        );
        assert_eq!(state.phase(), ConnectionPhase::GivenUp);
        assert_eq!(state.on_close(), None);
    }

    #[test]
    fn open_resets_attempt_counter() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        state.begin_connect();
        state.on_close();
        state.on_close();
        state.on_close();
        assert_eq!(state.attempt(), 3);

        state.on_open();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.phase(), ConnectionPhase::Open);
        assert_eq!(state.on_close(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn terminated_state_never_schedules() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        state.begin_connect();
        state.on_open();
        state.terminate();
        assert_eq!(state.on_close(), None);
        state.on_open();
        assert_eq!(state.phase(), ConnectionPhase::Terminated);
    }

    #[test]
    fn repeated_closes_exhaust_the_budget_and_report_disconnected() {
        let manager = manager();
        let generation = manager.begin_attempt(test_url());
        assert!(manager.shared.mark_open(generation).is_some());
        assert!(manager.is_connected());

        let scheduled: Vec<Duration> = (0..6)
            .filter_map(|_| manager.shared.mark_closed(generation))
            .collect();
        assert_eq!(scheduled.len(), 5);
        assert_eq!(scheduled.last(), Some(&Duration::from_millis(5000)));
        assert_eq!(manager.phase(), ConnectionPhase::GivenUp);
        assert!(!manager.is_connected());
    }

    #[test]
    fn disconnect_blocks_stale_sessions() {
        let manager = manager();
        let generation = manager.begin_attempt(test_url());
        manager.disconnect();
        manager.disconnect();

        assert_eq!(manager.phase(), ConnectionPhase::Terminated);
        assert!(!manager.shared.is_current(generation));
        assert!(manager.shared.mark_open(generation).is_none());
        assert_eq!(manager.shared.mark_closed(generation), None);
        assert!(!manager.is_connected());
    }

    #[test]
    fn newer_attempt_supersedes_older_generation() {
        let manager = manager();
        let first = manager.begin_attempt(test_url());
        let second = manager.begin_attempt(test_url());
        assert!(manager.shared.mark_open(first).is_none());
        assert!(manager.shared.mark_open(second).is_some());
        assert_eq!(manager.shared.mark_closed(first), None);
        assert!(manager.is_connected());
    }

    #[test]
    fn send_before_open_is_rejected() {
        let manager = manager();
        assert!(!manager.send("hello"));

        let generation = manager.begin_attempt(test_url());
        let mut outbound = manager.shared.mark_open(generation).expect("open");
        assert!(manager.send("hello"));
        assert_eq!(
            outbound.try_recv().expect("queued frame"),
            Message::Text("hello".to_string())
        );
    }

    #[test]
    fn malformed_frames_are_dropped_before_dispatch() {
        let manager = manager();
        let hits = Arc::new(Mutex::new(0usize));
        let counter = hits.clone();
        let _sub = manager.subscribe(Topic::Log, move |_| {
            *counter.lock().expect("hits lock") += 1;
            Ok(())
        });

        manager.shared.deliver("{not json");
        manager
            .shared
            .deliver(r#"{"type":"system log","message":"Client registered!"}"#);
        assert_eq!(*hits.lock().expect("hits lock"), 1);
    }

    async fn silent_listener() -> (tokio::net::TcpListener, String) {
        // Accepted by the kernel backlog but never upgraded.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}/state/events", listener.local_addr().expect("addr"));
        (listener, url)
    }

    fn impatient_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_secs(60),
            handshake_timeout: Duration::from_millis(100),
            ..ReconnectPolicy::default()
        }
    }

    async fn wait_for_phase(manager: &ConnectionManager, phase: ConnectionPhase) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.phase() != phase {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("phase reached in time");
    }

    #[tokio::test]
    async fn unanswered_upgrade_times_out_into_retry_schedule() {
        let (_listener, url) = silent_listener().await;
        let manager = ConnectionManager::new(TopicRegistry::new(), impatient_policy());

        let result = tokio::time::timeout(Duration::from_secs(5), manager.connect(&url))
            .await
            .expect("handshake is bounded");
        assert!(matches!(result, Err(ConnectError::Handshake(_))));
        assert!(!manager.is_connected());
        wait_for_phase(&manager, ConnectionPhase::Reconnecting).await;
        assert_eq!(manager.attempt(), 1);
        manager.disconnect();
    }

    #[tokio::test]
    async fn spawned_connect_returns_at_once_and_stops_on_disconnect() {
        let (_listener, url) = silent_listener().await;
        let manager = ConnectionManager::new(
            TopicRegistry::new(),
            ReconnectPolicy {
                handshake_timeout: Duration::from_secs(60),
                ..impatient_policy()
            },
        );

        manager.spawn_connect(&url).expect("valid url");
        assert_eq!(manager.phase(), ConnectionPhase::Connecting);
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.disconnect();

        let driver = lock(&manager.driver).take().expect("driver spawned");
        tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .expect("driver abandons the pending handshake")
            .expect("driver finished cleanly");
        assert_eq!(manager.phase(), ConnectionPhase::Terminated);
    }

    #[test]
    fn spawn_reconnect_needs_a_previous_url() {
        assert!(matches!(manager().spawn_reconnect(), Err(ConnectError::NoUrl)));
        assert!(matches!(
            manager().spawn_connect("not a url"),
            Err(ConnectError::InvalidUrl(_))
        ));
    }
}
