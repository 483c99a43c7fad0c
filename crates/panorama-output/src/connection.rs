//! Live-stream link state and when to re-establish it.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::{BASE_RECONNECT_DELAY_MS, MAX_RECONNECT_ATTEMPTS};

/// Link state of the live-stream writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,

    /// First connection in progress.
    Connecting,

    /// Records are flowing to the receiver.
    Streaming,

    /// The link dropped; `attempt` reconnects made so far.
    Reconnecting { attempt: u32 },

    /// The link cannot be restored.
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Connecting or reconnecting: there is no socket to write to yet.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Streaming => f.write_str("streaming"),
            Self::Reconnecting { attempt } => {
                write!(f, "reconnecting ({attempt}/{MAX_RECONNECT_ATTEMPTS})")
            }
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Whether a socket error may clear up if the connection is retried.
///
/// Refused, reset and timed-out links are worth retrying; an unresolvable
/// or forbidden address is not.
pub fn is_retryable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::UnexpectedEof
    )
}

/// How often, and how patiently, a dropped link is re-established.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for each further one.
    pub base_delay: Duration,

    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_RECONNECT_DELAY_MS),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Whether to try again after `attempt` failures, the last with `error`.
    pub fn should_retry(&self, attempt: u32, error: &io::Error) -> bool {
        attempt < self.max_attempts && is_retryable(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_needs_budget_and_transient_error() {
        let policy = ReconnectPolicy::default();
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);

        assert!(policy.should_retry(0, &refused));
        assert!(policy.should_retry(2, &refused));
        assert!(!policy.should_retry(3, &refused));
        assert!(!policy.should_retry(0, &denied));
        assert!(is_retryable(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_retryable(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 2 }.to_string(),
            "reconnecting (2/3)"
        );
        assert!(ConnectionState::Reconnecting { attempt: 1 }.is_transient());
        assert!(!ConnectionState::Streaming.is_transient());
        assert_eq!(
            ConnectionState::Failed {
                reason: "refused".into()
            }
            .to_string(),
            "failed: refused"
        );
    }
}
