//! Error taxonomy for pool observation.
//!
//! Every failure an observer can hit mid-stream is one of these variants. They are
//! cloneable so a single failure can be fanned out to every registered health sink.

use std::fmt;
use std::time::Duration;

use crate::observer::ObserverState;

/// Coarse classification used for recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal at startup, recovered by reconnecting mid-stream.
    Connection,
    /// A single read failed or timed out; the tick is skipped.
    Read,
    /// Malformed, non-positive or out-of-order snapshot; the tick is skipped.
    Validation,
    /// Upstream asked us to slow down; the next tick is delayed.
    RateLimited,
    /// Misconfiguration or misuse of the observer API.
    Usage,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ObserverError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("read `{call}` failed: {message}")]
    Read { call: String, message: String },

    #[error("read `{call}` timed out after {after:?}")]
    Timeout { call: String, after: Duration },

    #[error("invalid snapshot: {0}")]
    Validation(String),

    #[error("stale snapshot from block {got}, block {last} already emitted")]
    Stale { last: u64, got: u64 },

    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("observer is {0}")]
    InvalidState(ObserverState),
}

impl ObserverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::Read { .. } | Self::Timeout { .. } => ErrorKind::Read,
            Self::Validation(_) | Self::Stale { .. } => ErrorKind::Validation,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Config(_) | Self::InvalidState(_) => ErrorKind::Usage,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind() == ErrorKind::RateLimited
    }

    /// Classify a transport/contract error from a single read.
    ///
    /// Providers signal throttling inconsistently (HTTP 429, JSON-RPC -32005, or plain text),
    /// so the rendered message is inspected.
    pub fn read(call: impl Into<String>, err: impl fmt::Display) -> Self {
        let message = err.to_string();
        if is_rate_limit_message(&message) {
            return Self::RateLimited(format!("{}: {}", call.into(), message));
        }
        Self::Read {
            call: call.into(),
            message,
        }
    }

    pub fn connection(context: impl fmt::Display, err: impl fmt::Display) -> Self {
        Self::Connection(format!("{context}: {err}"))
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("429")
        || lower.contains("too many requests")
        || lower.contains("rate limit")
        || lower.contains("-32005")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_detects_rate_limit() {
        let err = ObserverError::read("slot0", "HTTP error 429 with body: Too Many Requests");
        assert!(err.is_rate_limited());

        let err = ObserverError::read("slot0", "execution reverted");
        assert_eq!(err.kind(), ErrorKind::Read);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            ObserverError::Stale { last: 2, got: 1 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ObserverError::Timeout {
                call: "liquidity".into(),
                after: Duration::from_secs(1)
            }
            .kind(),
            ErrorKind::Read
        );
        assert_eq!(
            ObserverError::Connection("refused".into()).kind(),
            ErrorKind::Connection
        );
    }
}
