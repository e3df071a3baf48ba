//! Session state machine
//!
//! Pure bookkeeping for one logical session across many physical
//! connections. The async driver in [`crate::manager`] feeds it what
//! happened and performs whatever it answers with.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> Connecting -> ...
//!                     |                                          |
//!                     +-- non-retryable rejection ---------------+--> GivenUp
//!                                       attempts exhausted ------+
//! ```

use murmur_shared::{AuthErrorKind, Remedy};
use std::fmt;
use std::time::Duration;

use crate::backoff::{BackoffSchedule, ReconnectConfig};

/// Where the session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    GivenUp(GiveUpReason),
}

/// Why the session stopped trying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The server refused the credential; the user has to log in again
    Rejected(AuthErrorKind),
    /// Every reconnect attempt in the budget failed
    AttemptsExhausted,
}

/// User-visible connectivity indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    /// Live; nothing to show
    Hidden,
    /// Transient "reconnecting" banner
    Reconnecting,
    /// Persistent "offline" banner
    Offline,
    /// Persistent "login required" banner
    LoginRequired,
}

impl SessionState {
    pub fn indicator(&self) -> Indicator {
        match self {
            SessionState::Connected => Indicator::Hidden,
            SessionState::Connecting | SessionState::Disconnected => Indicator::Reconnecting,
            SessionState::GivenUp(GiveUpReason::Rejected(_)) => Indicator::LoginRequired,
            SessionState::GivenUp(GiveUpReason::AttemptsExhausted) => Indicator::Offline,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::GivenUp(_) => write!(f, "given_up"),
        }
    }
}

/// Why a connection attempt or a live connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The server rejected the handshake credential
    Auth(AuthErrorKind),
    /// Network error, handshake timeout or lost connection
    Transport,
}

/// What the driver must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Open a connection now
    Connect,
    /// Wait, then call [`ReconnectMachine::retry_due`]
    RetryAfter(Duration),
    /// Stop; the session is terminal until a manual reconnect
    GiveUp(GiveUpReason),
    /// Nothing to do
    Idle,
}

pub struct ReconnectMachine {
    config: ReconnectConfig,
    schedule: BackoffSchedule,
    state: SessionState,
    attempts: u32,
    has_connected: bool,
    closed: bool,
}

impl ReconnectMachine {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            schedule: config.schedule(),
            config,
            state: SessionState::Disconnected,
            attempts: 0,
            has_connected: false,
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Reconnect attempts since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Manager start
    pub fn start(&mut self) -> Next {
        if self.state != SessionState::Disconnected || self.closed {
            return Next::Idle;
        }
        self.state = SessionState::Connecting;
        Next::Connect
    }

    /// Manual reconnect; also revives a closed or given-up session
    pub fn reconnect(&mut self) -> Next {
        self.closed = false;
        self.attempts = 0;
        self.schedule = self.config.schedule();
        self.state = SessionState::Connecting;
        Next::Connect
    }

    /// A scheduled retry delay elapsed
    pub fn retry_due(&mut self) -> Next {
        if self.closed || self.state != SessionState::Disconnected {
            return Next::Idle;
        }
        self.state = SessionState::Connecting;
        Next::Connect
    }

    /// The server acknowledged the handshake. Returns true when this follows
    /// an earlier connection, meaning events may have been missed.
    pub fn connected(&mut self) -> bool {
        self.state = SessionState::Connected;
        self.attempts = 0;
        self.schedule = self.config.schedule();
        std::mem::replace(&mut self.has_connected, true)
    }

    /// A connection attempt failed before the `connected` ack
    pub fn handshake_failed(&mut self, failure: Failure) -> Next {
        if self.closed {
            return Next::Idle;
        }
        match failure {
            Failure::Auth(kind) => match kind.remedy() {
                Remedy::Reauthenticate => self.give_up(GiveUpReason::Rejected(kind)),
                // The credential store is read again before the retry
                Remedy::RefreshAndRetry => self.schedule_retry(),
            },
            Failure::Transport => self.schedule_retry(),
        }
    }

    /// A live connection closed without the manager asking for it
    pub fn connection_lost(&mut self) -> Next {
        if self.closed {
            return Next::Idle;
        }
        self.schedule_retry()
    }

    /// The server replaced this connection with a newer one for the same
    /// identity.
    ///
    /// Two devices sharing an identity evict each other on every connect,
    /// and attempts reset on each successful handshake, so they would never
    /// settle. Waiting the full max delay keeps that alternation slow. The
    /// retry still consumes an attempt.
    pub fn connection_superseded(&mut self) -> Next {
        if self.closed {
            return Next::Idle;
        }
        match self.schedule_retry() {
            Next::RetryAfter(_) => Next::RetryAfter(self.config.max_delay),
            other => other,
        }
    }

    /// Deliberate close; nothing reconnects until [`Self::reconnect`]
    pub fn close(&mut self) {
        self.closed = true;
        self.state = SessionState::Disconnected;
    }

    fn schedule_retry(&mut self) -> Next {
        self.state = SessionState::Disconnected;
        // At least one reconnect is always attempted after a loss
        if self.attempts >= self.config.max_attempts.max(1) {
            return self.give_up(GiveUpReason::AttemptsExhausted);
        }
        self.attempts += 1;
        Next::RetryAfter(self.schedule.next_delay())
    }

    fn give_up(&mut self, reason: GiveUpReason) -> Next {
        self.state = SessionState::GivenUp(reason);
        Next::GiveUp(reason)
    }
}
