//! Live update channel
//!
//! Keeps one server-push connection per signed-in user and recovers from
//! connection loss with bounded exponential backoff.
//!
//! # Modules
//!
//! - `LiveUpdateChannel`: the connection state machine and listener fan-out
//! - `ExponentialBackoff`: reconnect delays with an attempt ceiling
//! - `Scheduler`: timer abstraction (`TokioScheduler`, `ManualScheduler`)
//! - `Transport`: push connection abstraction, implemented by `sse::SseTransport`
//!   and the in-memory `MemoryTransport`

mod backoff;
mod listeners;
mod live;
mod memory;
mod scheduler;
mod transport;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use listeners::{DispatchReport, Listener, ListenerId, ListenerRegistry};
pub use live::{
    ChannelState, ConnectionState, LiveUpdateChannel, TransportSink, NOTIFICATION_EVENT,
    PING_EVENT, RECONNECT_EVENT,
};
pub use memory::{MemoryConnection, MemoryTransport};
pub use scheduler::{ManualScheduler, OnceTask, RepeatingTask, Scheduler, TimerHandle, TokioScheduler};
pub use transport::{ReadyState, Transport, TransportError, TransportHandle};
