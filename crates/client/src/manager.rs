//! Async driver for the session state machine
//!
//! One background task owns the physical connection. It asks the
//! [`ReconnectMachine`] what to do after every outcome, sleeps out backoff
//! delays, keeps the connection alive with pings and reports everything to
//! the application as [`SessionEvent`]s.

use murmur_shared::{AuthErrorKind, ClientEvent, ServerEvent, CLOSE_SUPERSEDED};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::backfill::{Backfill, Resync};
use crate::backoff::ReconnectConfig;
use crate::connector::{ConnectError, Connector, Inbound, Transport};
use crate::credentials::CredentialStore;
use crate::machine::{GiveUpReason, Next, ReconnectMachine, SessionState};

/// What the application hears from the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Live event from the server
    Event(ServerEvent),
    /// Durable state re-fetched after a gap
    Resynced(Backfill),
    /// The credential was rejected for good; show the login screen
    LoginRequired(AuthErrorKind),
}

/// Point-in-time view of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Reconnect attempts since the last successful connection
    pub reconnect_attempts: u32,
    /// Server-confirmed time of the most recent successful connection;
    /// kept while disconnected
    pub connected_at: Option<OffsetDateTime>,
    /// Server session id of the most recent successful connection
    pub session_id: Option<Uuid>,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            state: SessionState::Disconnected,
            reconnect_attempts: 0,
            connected_at: None,
            session_id: None,
        }
    }
}

#[derive(Debug)]
enum Command {
    Reconnect,
    Close,
}

/// Control handle for a running session
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl ManagerHandle {
    /// Drop the current connection (if any) and connect again with a fresh
    /// attempt budget
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    /// Close deliberately; no automatic reconnect follows
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.borrow()
    }

    /// Wait until the session reaches a state matching `predicate`
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&SessionState) -> bool) -> SessionState {
        let reached = self
            .snapshot
            .wait_for(|snapshot| predicate(&snapshot.state))
            .await
            .map(|snapshot| snapshot.state);
        // Driver gone; report the last known state
        reached.unwrap_or_else(|_| self.snapshot.borrow().state)
    }
}

pub struct ReconnectManager {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    resync: Option<Arc<dyn Resync>>,
    config: ReconnectConfig,
}

impl ReconnectManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        config: ReconnectConfig,
    ) -> Self {
        Self {
            connector,
            credentials,
            resync: None,
            config,
        }
    }

    /// Re-fetch durable state with `resync` after every reconnect
    pub fn with_resync(mut self, resync: Arc<dyn Resync>) -> Self {
        self.resync = Some(resync);
        self
    }

    /// Start the session in the background
    pub fn spawn(
        self,
    ) -> (
        ManagerHandle,
        mpsc::UnboundedReceiver<SessionEvent>,
        JoinHandle<()>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::initial());

        let driver = Driver {
            machine: ReconnectMachine::new(self.config.clone()),
            manager: self,
            commands: command_rx,
            events: event_tx,
            snapshot: snapshot_tx,
            last_session: None,
        };
        let task = tokio::spawn(driver.run());

        let handle = ManagerHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        };
        (handle, event_rx, task)
    }
}

/// Outcome of waiting on the live connection
enum SessionStep {
    Inbound(Inbound),
    PingDue,
    Command(Option<Command>),
}

/// A connection the server has acknowledged
struct Established {
    transport: Box<dyn Transport>,
    session_id: Uuid,
    connected_at: OffsetDateTime,
}

/// Outcome of waiting on a connection attempt
enum AttemptStep {
    Done(Result<Established, ConnectError>),
    Command(Option<Command>),
}

struct Driver {
    manager: ReconnectManager,
    machine: ReconnectMachine,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    /// Session id and server connect time of the latest acknowledged connection
    last_session: Option<(Uuid, OffsetDateTime)>,
}

impl Driver {
    async fn run(mut self) {
        let mut next = self.machine.start();
        self.publish();

        loop {
            let step = match next {
                Next::Connect => self.attempt().await,
                Next::RetryAfter(delay) => {
                    tracing::info!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = self.machine.attempts(),
                        "Reconnect scheduled"
                    );
                    let interrupted = tokio::select! {
                        _ = tokio::time::sleep(delay) => None,
                        command = self.commands.recv() => Some(command),
                    };
                    match interrupted {
                        None => Some(self.machine.retry_due()),
                        Some(command) => self.apply(command),
                    }
                }
                Next::GiveUp(reason) => {
                    self.give_up(reason);
                    Some(Next::Idle)
                }
                Next::Idle => {
                    let command = self.commands.recv().await;
                    self.apply(command)
                }
            };

            self.publish();
            match step {
                Some(step) => next = step,
                None => break,
            }
        }

        tracing::debug!("Session driver stopped");
    }

    /// One connection attempt, then the live session if it succeeds
    async fn attempt(&mut self) -> Option<Next> {
        let token = self.manager.credentials.token();
        let connector = Arc::clone(&self.manager.connector);
        let handshake_timeout = self.manager.config.handshake_timeout;

        let step = tokio::select! {
            result = tokio::time::timeout(handshake_timeout, handshake(connector.as_ref(), token.as_deref())) => {
                AttemptStep::Done(result.unwrap_or(Err(ConnectError::Timeout)))
            }
            command = self.commands.recv() => AttemptStep::Command(command),
        };

        match step {
            AttemptStep::Done(Ok(established)) => {
                let Established {
                    transport,
                    session_id,
                    connected_at,
                } = established;
                self.last_session = Some((session_id, connected_at));
                let resync = self.machine.connected();
                self.publish();
                tracing::info!(session_id = %session_id, %connected_at, resync, "Session connected");
                if resync {
                    self.spawn_resync();
                }
                self.live(transport).await
            }
            AttemptStep::Done(Err(e)) => {
                tracing::warn!(error = %e, attempt = self.machine.attempts(), "Connection attempt failed");
                Some(self.machine.handshake_failed(e.failure()))
            }
            AttemptStep::Command(command) => self.apply(command),
        }
    }

    /// Run a live connection until it ends
    async fn live(&mut self, mut transport: Box<dyn Transport>) -> Option<Next> {
        let ping_interval = self.manager.config.ping_interval;
        let pong_timeout = self.manager.config.pong_timeout;
        let mut ping_ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        let mut last_heard = Instant::now();

        loop {
            let step = tokio::select! {
                inbound = transport.recv() => SessionStep::Inbound(inbound),
                _ = ping_ticker.tick() => SessionStep::PingDue,
                command = self.commands.recv() => SessionStep::Command(command),
            };

            match step {
                SessionStep::Inbound(Inbound::Event(event)) => {
                    last_heard = Instant::now();
                    if !matches!(event, ServerEvent::Pong { .. }) {
                        let _ = self.events.send(SessionEvent::Event(event));
                    }
                }
                SessionStep::Inbound(Inbound::Closed { code }) => {
                    if code == Some(CLOSE_SUPERSEDED) {
                        tracing::info!("Connection superseded by a newer one for this user");
                        return Some(self.machine.connection_superseded());
                    }
                    tracing::info!(code = ?code, "Connection closed");
                    return Some(self.machine.connection_lost());
                }
                SessionStep::PingDue => {
                    if last_heard.elapsed() >= pong_timeout {
                        tracing::warn!(
                            silent_ms = last_heard.elapsed().as_millis() as u64,
                            "No pong within timeout"
                        );
                        transport.close().await;
                        return Some(self.machine.connection_lost());
                    }
                    if let Err(e) = transport.send(ClientEvent::Ping).await {
                        tracing::debug!(error = %e, "Ping failed");
                        return Some(self.machine.connection_lost());
                    }
                }
                SessionStep::Command(command) => {
                    // Tear the old connection down before anything new starts
                    transport.close().await;
                    return self.apply(command);
                }
            }
        }
    }

    /// `None` once every handle is gone
    fn apply(&mut self, command: Option<Command>) -> Option<Next> {
        match command? {
            Command::Reconnect => {
                tracing::info!("Manual reconnect requested");
                Some(self.machine.reconnect())
            }
            Command::Close => {
                tracing::info!("Session closed");
                self.machine.close();
                Some(Next::Idle)
            }
        }
    }

    fn give_up(&mut self, reason: GiveUpReason) {
        match reason {
            GiveUpReason::Rejected(kind) => {
                tracing::warn!(reason = %kind, "Credential rejected, login required");
                self.manager.credentials.invalidate();
                let _ = self.events.send(SessionEvent::LoginRequired(kind));
            }
            GiveUpReason::AttemptsExhausted => {
                tracing::warn!(
                    max_attempts = self.manager.config.max_attempts,
                    "Reconnect attempts exhausted, giving up"
                );
            }
        }
    }

    fn spawn_resync(&self) {
        let events = self.events.clone();
        let Some(resync) = self.manager.resync.clone() else {
            // The application re-fetches on its own
            let _ = events.send(SessionEvent::Resynced(Backfill::default()));
            return;
        };
        let token = self.manager.credentials.token();
        tokio::spawn(async move {
            match resync.resync(token.as_deref()).await {
                Ok(backfill) => {
                    let _ = events.send(SessionEvent::Resynced(backfill));
                }
                Err(e) => tracing::warn!(error = %e, "Backfill after reconnect failed"),
            }
        });
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            state: self.machine.state(),
            reconnect_attempts: self.machine.attempts(),
            connected_at: self.last_session.map(|(_, at)| at),
            session_id: self.last_session.map(|(id, _)| id),
        };
        let previous = *self.snapshot.borrow();
        if previous == snapshot {
            return;
        }
        self.snapshot.send_replace(snapshot);
        if previous.state != snapshot.state {
            let _ = self.events.send(SessionEvent::StateChanged(snapshot.state));
        }
    }
}

/// Open a connection and wait for the server's `connected` ack
async fn handshake(connector: &dyn Connector, token: Option<&str>) -> Result<Established, ConnectError> {
    let mut transport = connector.connect(token).await?;
    match transport.recv().await {
        Inbound::Event(ServerEvent::Connected {
            session_id,
            connected_at,
        }) => Ok(Established {
            transport,
            session_id,
            connected_at,
        }),
        Inbound::Event(other) => {
            transport.close().await;
            Err(ConnectError::Handshake(format!(
                "expected connected, got {}",
                other.name()
            )))
        }
        Inbound::Closed { code } => Err(ConnectError::Handshake(format!(
            "closed before acknowledgment (code {code:?})"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentials;
    use crate::machine::Indicator;
    use futures::future::BoxFuture;
    use murmur_shared::{DomainEvent, NotificationPayload, NotificationType, UserSummary};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    enum Script {
        Accept(mpsc::UnboundedReceiver<Inbound>),
        Reject(AuthErrorKind),
        Fail,
    }

    #[derive(Default)]
    struct FakeConnector {
        scripts: Mutex<VecDeque<Script>>,
        attempts: AtomicUsize,
        tokens: Mutex<Vec<Option<String>>>,
        sent: Arc<Mutex<Vec<ClientEvent>>>,
        closes: Arc<AtomicUsize>,
    }

    impl FakeConnector {
        fn push(&self, script: Script) {
            self.scripts.lock().unwrap().push_back(script);
        }

        /// Queue an accepted connection; the returned sender feeds it
        fn accept(&self) -> mpsc::UnboundedSender<Inbound> {
            self.accept_as(Uuid::new_v4(), OffsetDateTime::now_utc())
        }

        fn accept_as(&self, session_id: Uuid, connected_at: OffsetDateTime) -> mpsc::UnboundedSender<Inbound> {
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(Inbound::Event(ServerEvent::Connected {
                session_id,
                connected_at,
            }))
            .unwrap();
            self.push(Script::Accept(rx));
            tx
        }
    }

    struct FakeTransport {
        inbound: mpsc::UnboundedReceiver<Inbound>,
        sent: Arc<Mutex<Vec<ClientEvent>>>,
        closes: Arc<AtomicUsize>,
    }

    impl Transport for FakeTransport {
        fn recv(&mut self) -> BoxFuture<'_, Inbound> {
            Box::pin(async move {
                self.inbound
                    .recv()
                    .await
                    .unwrap_or(Inbound::Closed { code: None })
            })
        }

        fn send(&mut self, event: ClientEvent) -> BoxFuture<'_, Result<(), ConnectError>> {
            self.sent.lock().unwrap().push(event);
            Box::pin(async { Ok(()) })
        }

        fn close(&mut self) -> BoxFuture<'_, ()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    impl Connector for FakeConnector {
        fn connect<'a>(
            &'a self,
            token: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Box<dyn Transport>, ConnectError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.tokens.lock().unwrap().push(token.map(str::to_string));
            let script = self.scripts.lock().unwrap().pop_front();
            let sent = Arc::clone(&self.sent);
            let closes = Arc::clone(&self.closes);
            Box::pin(async move {
                match script {
                    Some(Script::Accept(inbound)) => Ok(Box::new(FakeTransport {
                        inbound,
                        sent,
                        closes,
                    }) as Box<dyn Transport>),
                    Some(Script::Reject(kind)) => Err(ConnectError::Rejected(kind)),
                    Some(Script::Fail) | None => {
                        Err(ConnectError::Handshake("connection refused".to_string()))
                    }
                }
            })
        }
    }

    fn config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts,
            handshake_timeout: Duration::from_secs(1),
            ping_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(12),
        }
    }

    fn start(
        connector: &Arc<FakeConnector>,
        credentials: Arc<MemoryCredentials>,
        max_attempts: u32,
    ) -> (ManagerHandle, mpsc::UnboundedReceiver<SessionEvent>, JoinHandle<()>) {
        let connector: Arc<dyn Connector> = connector.clone();
        ReconnectManager::new(connector, credentials, config(max_attempts)).spawn()
    }

    fn notification() -> ServerEvent {
        ServerEvent::from(DomainEvent::notification(
            "u1",
            NotificationPayload {
                notification_type: NotificationType::Like,
                sender: UserSummary {
                    id: "u2".into(),
                    username: "bob".to_string(),
                    avatar_url: None,
                },
                post: None,
            },
        ))
    }

    async fn next_matching(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        mut predicate: impl FnMut(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(600), events.recv())
                .await
                .expect("timed out waiting for session event")
                .expect("session event stream ended");
            if predicate(&event) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_forwards_events() {
        let connector = Arc::new(FakeConnector::default());
        let server = connector.accept();
        let credentials = Arc::new(MemoryCredentials::new("tok"));
        let (mut handle, mut events, _task) = start(&connector, credentials, 3);

        assert_eq!(
            handle.wait_for(SessionState::is_connected).await,
            SessionState::Connected
        );
        assert_eq!(handle.state().indicator(), Indicator::Hidden);

        let event = notification();
        server.send(Inbound::Event(event.clone())).unwrap();
        let received = next_matching(&mut events, |e| matches!(e, SessionEvent::Event(_))).await;
        assert_eq!(received, SessionEvent::Event(event));
        assert_eq!(
            connector.tokens.lock().unwrap().as_slice(),
            &[Some("tok".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_rejection_requires_login() {
        let connector = Arc::new(FakeConnector::default());
        connector.push(Script::Reject(AuthErrorKind::MalformedToken));
        let credentials = Arc::new(MemoryCredentials::new("garbage"));
        let (mut handle, mut events, _task) = start(&connector, Arc::clone(&credentials), 5);

        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::LoginRequired(_))).await;
        assert_eq!(event, SessionEvent::LoginRequired(AuthErrorKind::MalformedToken));
        let state = handle.wait_for(|s| matches!(s, SessionState::GivenUp(_))).await;
        assert_eq!(state.indicator(), Indicator::LoginRequired);
        assert!(credentials.token().is_none());

        // No automatic retry
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempt_budget() {
        let connector = Arc::new(FakeConnector::default());
        let credentials = Arc::new(MemoryCredentials::new("tok"));
        let (mut handle, _events, _task) = start(&connector, credentials, 3);

        let state = handle.wait_for(|s| matches!(s, SessionState::GivenUp(_))).await;
        assert_eq!(state, SessionState::GivenUp(GiveUpReason::AttemptsExhausted));
        // First attempt plus three reconnects
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_is_refreshed_between_attempts() {
        let connector = Arc::new(FakeConnector::default());
        connector.push(Script::Reject(AuthErrorKind::ExpiredToken));
        let _server = connector.accept();
        let credentials = Arc::new(MemoryCredentials::new("old"));
        let (mut handle, mut events, _task) = start(&connector, Arc::clone(&credentials), 3);

        // The application refreshes while the manager backs off
        next_matching(&mut events, |e| {
            *e == SessionEvent::StateChanged(SessionState::Disconnected)
        })
        .await;
        credentials.set("new");
        handle.wait_for(SessionState::is_connected).await;

        assert_eq!(
            connector.tokens.lock().unwrap().as_slice(),
            &[Some("old".to_string()), Some("new".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_and_resyncs_after_server_close() {
        let connector = Arc::new(FakeConnector::default());
        let first = connector.accept();
        let _second = connector.accept();
        let credentials = Arc::new(MemoryCredentials::new("tok"));
        let (mut handle, mut events, _task) = start(&connector, credentials, 3);

        handle.wait_for(SessionState::is_connected).await;
        first
            .send(Inbound::Closed {
                code: Some(CLOSE_SUPERSEDED),
            })
            .unwrap();

        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::Resynced(_))).await;
        assert_eq!(event, SessionEvent::Resynced(Backfill::default()));
        assert_eq!(handle.state(), SessionState::Connected);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_times_out() {
        let connector = Arc::new(FakeConnector::default());
        // Kept open but never answers
        let _silent = connector.accept();
        let _next = connector.accept();
        let credentials = Arc::new(MemoryCredentials::new("tok"));
        let (mut handle, mut events, _task) = start(&connector, credentials, 3);

        handle.wait_for(SessionState::is_connected).await;
        next_matching(&mut events, |e| matches!(e, SessionEvent::Resynced(_))).await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
        assert!(connector
            .sent
            .lock()
            .unwrap()
            .iter()
            .all(|e| *e == ClientEvent::Ping));
        assert!(connector.sent.lock().unwrap().len() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_final_until_reconnect() {
        let connector = Arc::new(FakeConnector::default());
        let _server = connector.accept();
        let credentials = Arc::new(MemoryCredentials::new("tok"));
        let (mut handle, _events, _task) = start(&connector, credentials, 3);

        handle.wait_for(SessionState::is_connected).await;
        handle.close();
        handle
            .wait_for(|s| *s == SessionState::Disconnected)
            .await;
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        let _again = connector.accept();
        handle.reconnect();
        handle.wait_for(SessionState::is_connected).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_server_session() {
        let connector = Arc::new(FakeConnector::default());
        let session_id = Uuid::new_v4();
        let connected_at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let _server = connector.accept_as(session_id, connected_at);
        let credentials = Arc::new(MemoryCredentials::new("tok"));
        let (mut handle, _events, _task) = start(&connector, credentials, 3);

        assert_eq!(handle.snapshot().connected_at, None);
        handle.wait_for(SessionState::is_connected).await;

        assert_eq!(
            handle.snapshot(),
            SessionSnapshot {
                state: SessionState::Connected,
                reconnect_attempts: 0,
                connected_at: Some(connected_at),
                session_id: Some(session_id),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_counts_reconnect_attempts() {
        let connector = Arc::new(FakeConnector::default());
        let connected_at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let server = connector.accept_as(Uuid::new_v4(), connected_at);
        let credentials = Arc::new(MemoryCredentials::new("tok"));
        let (mut handle, _events, _task) = start(&connector, credentials, 3);

        handle.wait_for(SessionState::is_connected).await;
        server.send(Inbound::Closed { code: None }).unwrap();

        handle
            .wait_for(|s| *s == SessionState::Disconnected)
            .await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.reconnect_attempts, 1);
        // The last confirmed connect time survives the gap
        assert_eq!(snapshot.connected_at, Some(connected_at));

        // Every further attempt fails until the budget is spent
        handle.wait_for(|s| matches!(s, SessionState::GivenUp(_))).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.reconnect_attempts, 3);
        assert_eq!(snapshot.connected_at, Some(connected_at));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_session_waits_max_delay() {
        let connector = Arc::new(FakeConnector::default());
        let first = connector.accept();
        let _second = connector.accept();
        let credentials = Arc::new(MemoryCredentials::new("tok"));
        let (mut handle, mut events, _task) = start(&connector, credentials, 3);

        handle.wait_for(SessionState::is_connected).await;
        let closed_at = Instant::now();
        first
            .send(Inbound::Closed {
                code: Some(CLOSE_SUPERSEDED),
            })
            .unwrap();

        next_matching(&mut events, |e| matches!(e, SessionEvent::Resynced(_))).await;
        // max_delay rather than the 100ms initial delay
        assert!(closed_at.elapsed() >= Duration::from_secs(1));
        assert_eq!(handle.snapshot().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_close_retries_after_initial_delay() {
        let connector = Arc::new(FakeConnector::default());
        let first = connector.accept();
        let _second = connector.accept();
        let credentials = Arc::new(MemoryCredentials::new("tok"));
        let (mut handle, mut events, _task) = start(&connector, credentials, 3);

        handle.wait_for(SessionState::is_connected).await;
        let closed_at = Instant::now();
        first.send(Inbound::Closed { code: Some(1000) }).unwrap();

        next_matching(&mut events, |e| matches!(e, SessionEvent::Resynced(_))).await;
        assert!(closed_at.elapsed() < Duration::from_secs(1));
    }
}
