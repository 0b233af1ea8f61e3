//! In-memory transport.
//!
//! Records every connection the channel opens and lets the caller drive it
//! by hand: open it, push events, fail it. Used with `ManualScheduler` to run
//! the channel without a network.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::notification::UserId;

use super::live::TransportSink;
use super::transport::{ReadyState, Transport, TransportError, TransportHandle};

#[derive(Default)]
pub struct MemoryTransport {
    connections: Mutex<Vec<MemoryConnection>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections opened so far
    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    pub fn connection(&self, index: usize) -> Option<MemoryConnection> {
        self.lock().get(index).cloned()
    }

    /// The most recently opened connection
    pub fn latest(&self) -> Option<MemoryConnection> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MemoryConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn open(&self, user_id: &UserId, sink: TransportSink) -> Box<dyn TransportHandle> {
        let connection = MemoryConnection {
            user_id: user_id.clone(),
            sink,
            state: Arc::new(AtomicU8::new(ReadyState::Connecting as u8)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.lock().push(connection.clone());

        Box::new(MemoryHandle {
            state: connection.state.clone(),
            closed: connection.closed.clone(),
        })
    }
}

/// Test-side view of one opened connection
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    user_id: UserId,
    sink: TransportSink,
    state: Arc<AtomicU8>,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Report the connection as established
    pub fn open(&self) {
        self.state.store(ReadyState::Open as u8, Ordering::SeqCst);
        self.sink.opened();
    }

    /// Deliver a raw named event
    pub fn send(&self, event_name: &str, data: &str) {
        self.sink.message(event_name, data);
    }

    /// Report a failure, marking the connection closed
    pub fn fail(&self, error: TransportError) {
        self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
        self.sink.error(error);
    }

    /// Drop to `Closed` silently, as a stalled stream would
    pub fn stall(&self) {
        self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
    }

    /// Whether the channel closed its handle
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_current(&self) -> bool {
        self.sink.is_current()
    }
}

struct MemoryHandle {
    state: Arc<AtomicU8>,
    closed: Arc<AtomicBool>,
}

impl TransportHandle for MemoryHandle {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from(self.state.load(Ordering::SeqCst))
    }

    fn close(&mut self) {
        self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}
