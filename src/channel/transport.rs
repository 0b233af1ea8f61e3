//! Push transport abstraction.
//!
//! A transport opens one server-push connection per call and reports back
//! through the `TransportSink` it was given. The channel owns at most one
//! `TransportHandle` at a time.

use thiserror::Error;

use crate::notification::UserId;

use super::live::TransportSink;

/// Connection state as reported by the transport itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl From<u8> for ReadyState {
    fn from(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            _ => ReadyState::Closed,
        }
    }
}

/// Failure reported by a transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach the endpoint
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The endpoint answered with a non-success status
    #[error("Stream rejected with status {0}")]
    Rejected(u16),

    /// An established stream ended or broke
    #[error("Stream disconnected: {0}")]
    Disconnected(String),
}

impl TransportError {
    /// Terminal failures close the channel instead of retrying
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportError::Rejected(401 | 403 | 404))
    }
}

/// Opens push connections
pub trait Transport: Send + Sync {
    /// Start connecting for `user_id`.
    ///
    /// Must return immediately; `sink` is notified later from the transport's
    /// own task, never synchronously from inside `open`.
    fn open(&self, user_id: &UserId, sink: TransportSink) -> Box<dyn TransportHandle>;
}

/// A single open (or opening) push connection
pub trait TransportHandle: Send {
    fn ready_state(&self) -> ReadyState;

    /// Close the connection. No sink callbacks are delivered afterwards.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(TransportError::Rejected(401).is_terminal());
        assert!(TransportError::Rejected(403).is_terminal());
        assert!(TransportError::Rejected(404).is_terminal());
        assert!(!TransportError::Rejected(500).is_terminal());
        assert!(!TransportError::Rejected(503).is_terminal());
        assert!(!TransportError::Connect("refused".into()).is_terminal());
        assert!(!TransportError::Disconnected("eof".into()).is_terminal());
    }

    #[test]
    fn test_ready_state_from_u8() {
        assert_eq!(ReadyState::from(0), ReadyState::Connecting);
        assert_eq!(ReadyState::from(1), ReadyState::Open);
        assert_eq!(ReadyState::from(2), ReadyState::Closed);
        assert_eq!(ReadyState::from(9), ReadyState::Closed);
    }
}
