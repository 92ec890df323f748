//! Reconnection policy and connection state machine
//!
//! The machine here is pure: it never touches a socket or a timer. The client's
//! session task feeds it transport events (`on_open`, `on_close`) and acts on
//! the [`CloseDecision`] it returns, which keeps the attempt ceiling and the
//! counter-reset rule testable without any I/O.
//!
//! ```text
//!   Disconnected ──connect──▶ Connecting ──open──▶ Open
//!        ▲                       ▲   │               │
//!        │                 timer │   │ close         │ close
//!   disconnect                   │   ▼               ▼
//!   (any state)            Reconnecting(n) ◀── attempts < max
//!                                    │
//!                                    └── attempts >= max ──▶ GaveUp
//! ```
//!
//! # Examples
//!
//! ```rust
//! use crm_telephony_realtime::reconnect::{CloseDecision, ReconnectMachine, ReconnectPolicy};
//! use std::time::Duration;
//!
//! let mut machine = ReconnectMachine::new(ReconnectPolicy::default());
//! machine.begin_connect();
//! machine.on_open();
//!
//! match machine.on_close() {
//!     CloseDecision::Retry { attempt, delay } => {
//!         assert_eq!(attempt, 1);
//!         assert_eq!(delay, Duration::from_millis(2000));
//!     }
//!     CloseDecision::GiveUp => unreachable!(),
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Default ceiling of automatic reconnection attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay of the exponential backoff
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
/// Default cap of the exponential backoff
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Automatic attempts allowed before giving up
    pub max_attempts: u32,
    /// Delay unit multiplied by `2^attempt`
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Set the attempt ceiling
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt`: `min(base * 2^attempt, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Full retry schedule, one entry per automatic attempt
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|n| self.delay_for(n)).collect()
    }
}

/// Lifecycle state of the realtime connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and no pending retry
    Disconnected,
    /// A transport is being opened
    Connecting,
    /// The transport is open
    Open,
    /// Waiting for retry number `n`
    Reconnecting(u32),
    /// Attempts exhausted; only an explicit connect recovers
    GaveUp,
}

impl ConnectionState {
    /// Whether a transport or a retry is currently live
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Reconnecting(n) => write!(f, "reconnecting (attempt {})", n),
            ConnectionState::GaveUp => write!(f, "gave up"),
        }
    }
}

/// What to do after the transport closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Schedule retry number `attempt` after `delay`
    Retry {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// Stop retrying
    GiveUp,
}

/// Connection state plus the reconnect attempt counter
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
}

impl ReconnectMachine {
    /// Create a machine in the `Disconnected` state
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Attempts consumed since the last confirmed open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The backoff policy in use
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// A transport is about to be opened.
    ///
    /// The attempt counter is left alone: only a confirmed open resets it.
    pub fn begin_connect(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connecting;
        self.state
    }

    /// The transport confirmed it is open
    pub fn on_open(&mut self) -> ConnectionState {
        self.attempts = 0;
        self.state = ConnectionState::Open;
        self.state
    }

    /// The transport closed, or failed to open
    pub fn on_close(&mut self) -> CloseDecision {
        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            self.state = ConnectionState::Reconnecting(self.attempts);
            CloseDecision::Retry {
                attempt: self.attempts,
                delay: self.policy.delay_for(self.attempts),
            }
        } else {
            self.state = ConnectionState::GaveUp;
            CloseDecision::GiveUp
        }
    }

    /// Explicit teardown from any state
    pub fn on_disconnect(&mut self) -> ConnectionState {
        self.state = ConnectionState::Disconnected;
        self.state
    }
}

impl Default for ReconnectMachine {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_default_schedule() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), ms(2000));
        assert_eq!(policy.delay_for(2), ms(4000));
        assert_eq!(policy.delay_for(3), ms(8000));
        assert_eq!(policy.delay_for(4), ms(16000));
        // 1000 * 32 = 32000 is capped
        assert_eq!(policy.delay_for(5), ms(30000));
        assert_eq!(
            policy.schedule(),
            vec![ms(2000), ms(4000), ms(8000), ms(16000), ms(30000)]
        );
    }

    #[test]
    fn test_delay_saturates_for_huge_attempts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(40), ms(30000));
        assert_eq!(policy.delay_for(u32::MAX), ms(30000));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut machine = ReconnectMachine::default();
        machine.begin_connect();

        let mut delays = Vec::new();
        for _ in 0..5 {
            match machine.on_close() {
                CloseDecision::Retry { attempt, delay } => {
                    assert_eq!(machine.state(), ConnectionState::Reconnecting(attempt));
                    delays.push(delay);
                    machine.begin_connect();
                }
                CloseDecision::GiveUp => panic!("gave up too early"),
            }
        }
        assert_eq!(delays, ReconnectPolicy::default().schedule());

        assert_eq!(machine.on_close(), CloseDecision::GiveUp);
        assert_eq!(machine.state(), ConnectionState::GaveUp);
        // Still gives up on further closes
        assert_eq!(machine.on_close(), CloseDecision::GiveUp);
    }

    #[test]
    fn test_open_resets_counter() {
        let mut machine = ReconnectMachine::default();
        machine.begin_connect();
        machine.on_close();
        machine.begin_connect();
        machine.on_close();
        machine.begin_connect();
        assert_eq!(machine.attempts(), 2);

        machine.on_open();
        assert_eq!(machine.attempts(), 0);
        assert_eq!(
            machine.on_close(),
            CloseDecision::Retry {
                attempt: 1,
                delay: ms(2000)
            }
        );
    }

    #[test]
    fn test_begin_connect_does_not_reset_counter() {
        let mut machine = ReconnectMachine::default();
        for _ in 0..3 {
            machine.begin_connect();
            machine.on_close();
        }
        machine.on_disconnect();
        machine.begin_connect();
        assert_eq!(machine.attempts(), 3);
        assert_eq!(
            machine.on_close(),
            CloseDecision::Retry {
                attempt: 4,
                delay: ms(16000)
            }
        );
    }

    #[test]
    fn test_disconnect_from_any_state() {
        let mut machine = ReconnectMachine::default();
        assert_eq!(machine.on_disconnect(), ConnectionState::Disconnected);

        machine.begin_connect();
        machine.on_open();
        assert_eq!(machine.on_disconnect(), ConnectionState::Disconnected);

        machine.begin_connect();
        machine.on_close();
        assert!(machine.state().is_active());
        assert_eq!(machine.on_disconnect(), ConnectionState::Disconnected);
        assert!(!machine.state().is_active());
    }

    #[test]
    fn test_zero_attempt_policy_gives_up_immediately() {
        let mut machine = ReconnectMachine::new(ReconnectPolicy::default().with_max_attempts(0));
        machine.begin_connect();
        assert_eq!(machine.on_close(), CloseDecision::GiveUp);
    }
}
