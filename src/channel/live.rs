//! The live update channel state machine.
//!
//! ```text
//!            connect()                 transport opened
//!  Closed ──────────────▶ Connecting ───────────────────▶ Open
//!    ▲                      ▲    │                          │
//!    │   attempts used up   │    │ error / liveness miss    │
//!    └──────────────────────┴────┴──────────────────────────┘
//!                 (backoff delay, then reopen)
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::config::ChannelConfig;
use crate::error::{ClientError, Result};
use crate::metrics::ChannelMetrics;
use crate::notification::{LiveEvent, UserId};

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::listeners::{ListenerId, ListenerRegistry};
use super::scheduler::{Scheduler, TimerHandle};
use super::transport::{ReadyState, Transport, TransportError, TransportHandle};

/// Stream event carrying a JSON `LiveEvent`
pub const NOTIFICATION_EVENT: &str = "notification";
/// Sent once by the server right after the stream opens
pub const PING_EVENT: &str = "ping";
/// Server asks clients to reconnect; the stream closes right after
pub const RECONNECT_EVENT: &str = "reconnect";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
        }
    }
}

/// Snapshot of the channel's connection bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelState {
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    /// Retries were used up; stays set until the next `connect()`
    pub exhausted: bool,
    pub user_id: Option<UserId>,
}

struct Inner {
    connection: ConnectionState,
    user_id: Option<UserId>,
    /// Bumped whenever the current handle or pending retry is invalidated
    generation: u64,
    handle: Option<Box<dyn TransportHandle>>,
    backoff: ExponentialBackoff,
    liveness_timer: Option<TimerHandle>,
    retry_timer: Option<TimerHandle>,
    exhausted: bool,
}

impl Inner {
    fn snapshot(&self) -> ChannelState {
        ChannelState {
            connection: self.connection,
            reconnect_attempts: self.backoff.attempt(),
            reconnect_delay_ms: self.backoff.current_delay_ms(),
            exhausted: self.exhausted,
            user_id: self.user_id.clone(),
        }
    }

    /// Close the handle and cancel both timers. Returns true if a handle was open.
    fn teardown(&mut self) -> bool {
        if let Some(timer) = self.liveness_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = self.retry_timer.take() {
            timer.cancel();
        }
        match self.handle.take() {
            Some(mut handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    listeners: ListenerRegistry,
    transport: Arc<dyn Transport>,
    scheduler: Arc<dyn Scheduler>,
    liveness_interval: Duration,
    state_tx: watch::Sender<ChannelState>,
}

/// One logical push-notification connection for one user session.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct LiveUpdateChannel {
    shared: Arc<Shared>,
}

impl LiveUpdateChannel {
    pub fn new(
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        config: &ChannelConfig,
    ) -> Self {
        Self::with_backoff(
            transport,
            scheduler,
            config.backoff(),
            config.liveness_interval(),
        )
    }

    pub fn with_backoff(
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
        backoff: BackoffConfig,
        liveness_interval: Duration,
    ) -> Self {
        let inner = Inner {
            connection: ConnectionState::Closed,
            user_id: None,
            generation: 0,
            handle: None,
            backoff: ExponentialBackoff::with_config(backoff),
            liveness_timer: None,
            retry_timer: None,
            exhausted: false,
        };
        let (state_tx, _) = watch::channel(inner.snapshot());

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                listeners: ListenerRegistry::new(),
                transport,
                scheduler,
                liveness_interval,
                state_tx,
            }),
        }
    }

    /// Open a connection for `user_id`, closing any existing one first.
    ///
    /// Clears a previous "reconnect exhausted" condition and the attempt
    /// counter. Fails with `InvalidState` when the id is empty.
    #[tracing::instrument(name = "channel.connect", skip(self, user_id))]
    pub fn connect(&self, user_id: impl Into<UserId>) -> Result<()> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            tracing::error!("Cannot connect live updates: no user id available");
            return Err(ClientError::InvalidState(
                "live update connect requires a user id".to_string(),
            ));
        }

        let mut inner = self.shared.lock();
        if inner.teardown() {
            tracing::info!("Closing existing live update connection");
        }
        inner.backoff.reset();
        inner.exhausted = false;
        inner.user_id = Some(user_id);
        self.shared.open(&mut inner);
        self.shared.publish(&inner);
        Ok(())
    }

    /// Close the connection and cancel pending timers. No-op when closed.
    pub fn disconnect(&self) {
        let mut inner = self.shared.lock();
        let had_handle = inner.teardown();
        let was_closed = inner.connection == ConnectionState::Closed;

        inner.generation += 1;
        inner.connection = ConnectionState::Closed;
        inner.user_id = None;

        if had_handle || !was_closed {
            tracing::info!("Live update channel disconnected");
        }
        self.shared.publish(&inner);
    }

    /// Register a listener for events addressed to the connected user
    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LiveEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// True while the stream is open
    pub fn is_ready(&self) -> bool {
        self.shared.lock().connection == ConnectionState::Open
    }

    pub fn state(&self) -> ChannelState {
        self.shared.lock().snapshot()
    }

    /// Watch state changes, e.g. to notice the exhausted condition
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }
}

impl fmt::Debug for LiveUpdateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveUpdateChannel")
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        ChannelMetrics::set_connection_state(inner.connection);
        self.state_tx.send_replace(inner.snapshot());
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Open a fresh transport handle and arm the liveness check
    fn open(self: &Arc<Self>, inner: &mut Inner) {
        let Some(user_id) = inner.user_id.clone() else {
            return;
        };

        inner.generation += 1;
        let generation = inner.generation;
        inner.connection = ConnectionState::Connecting;

        tracing::info!(user_id = %user_id, generation, "Connecting live update stream");
        ChannelMetrics::record_connect_attempt();

        let sink = TransportSink {
            shared: Arc::downgrade(self),
            generation,
            user_id: user_id.clone(),
        };
        inner.handle = Some(self.transport.open(&user_id, sink));

        let weak = Arc::downgrade(self);
        inner.liveness_timer = Some(self.scheduler.schedule_repeating(
            self.liveness_interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.check_liveness(generation);
                }
            }),
        ));
    }

    fn handle_open(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(generation, "Ignoring open from stale connection");
            return;
        }

        inner.connection = ConnectionState::Open;
        inner.backoff.reset();
        tracing::info!(
            user_id = ?inner.user_id.as_ref().map(|u| u.to_string()),
            "Live update stream established"
        );
        ChannelMetrics::record_open();
        self.publish(&inner);
    }

    fn handle_message(&self, generation: u64, user_id: &UserId, event_name: &str, data: &str) {
        if !self.is_current(generation) {
            tracing::debug!(generation, event = event_name, "Ignoring event from stale connection");
            return;
        }

        match event_name {
            NOTIFICATION_EVENT => self.deliver(generation, user_id, data),
            PING_EVENT => tracing::debug!(data, "Live update stream ping"),
            RECONNECT_EVENT => tracing::info!("Server requested reconnect"),
            other => tracing::debug!(event = other, "Ignoring unknown stream event"),
        }
    }

    /// Parse, filter and fan out one notification. Runs without the state lock.
    fn deliver(&self, generation: u64, user_id: &UserId, data: &str) {
        let event: LiveEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed notification payload");
                ChannelMetrics::record_discarded("malformed");
                return;
            }
        };

        if !event.is_for(user_id) {
            tracing::debug!(
                notification_id = event.id,
                target_user = %event.user_id,
                user_id = %user_id,
                "Dropping notification addressed to another user"
            );
            ChannelMetrics::record_discarded("foreign_user");
            return;
        }

        // Listeners run unlocked; stop as soon as a disconnect or reconnect
        // supersedes this connection
        let report = self
            .listeners
            .dispatch_while(&event, || self.is_current(generation));
        ChannelMetrics::record_delivered();
        tracing::debug!(
            notification_id = event.id,
            event_type = event.kind.as_str(),
            delivered = report.delivered,
            failed = report.failed,
            "Notification delivered to listeners"
        );
    }

    fn handle_error(self: &Arc<Self>, generation: u64, error: TransportError) {
        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(generation, error = %error, "Ignoring error from stale connection");
            return;
        }

        if error.is_terminal() {
            inner.teardown();
            inner.generation += 1;
            inner.connection = ConnectionState::Closed;
            tracing::error!(error = %error, "Live update stream failed permanently");
            ChannelMetrics::record_terminal_failure();
            self.publish(&inner);
            return;
        }

        tracing::warn!(error = %error, "Live update stream error");
        self.reconnect(&mut inner);
    }

    fn check_liveness(self: &Arc<Self>, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }

        let ready_state = inner.handle.as_ref().map(|h| h.ready_state());
        if ready_state == Some(ReadyState::Open) {
            tracing::debug!("Live update stream is alive");
            return;
        }

        tracing::info!(ready_state = ?ready_state, "Live update stream lost, reconnecting");
        self.reconnect(&mut inner);
    }

    /// Tear down and either schedule the next attempt or give up
    fn reconnect(self: &Arc<Self>, inner: &mut Inner) {
        inner.teardown();
        inner.generation += 1;

        match inner.backoff.next_delay() {
            Some(delay) => {
                let generation = inner.generation;
                inner.connection = ConnectionState::Connecting;

                tracing::info!(
                    attempt = inner.backoff.attempt(),
                    max_attempts = inner.backoff.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling live update reconnect"
                );
                ChannelMetrics::record_reconnect_scheduled();

                let weak = Arc::downgrade(self);
                inner.retry_timer = Some(self.scheduler.schedule_once(
                    delay,
                    Box::new(move || {
                        if let Some(shared) = weak.upgrade() {
                            shared.retry(generation);
                        }
                    }),
                ));
            }
            None => {
                inner.connection = ConnectionState::Closed;
                inner.exhausted = true;
                tracing::error!(
                    attempts = inner.backoff.attempt(),
                    "Max reconnection attempts reached; live updates stopped until the next connect"
                );
                ChannelMetrics::record_exhausted();
            }
        }

        self.publish(inner);
    }

    fn retry(self: &Arc<Self>, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.connection != ConnectionState::Connecting {
            return;
        }

        inner.retry_timer = None;
        self.open(&mut inner);
        self.publish(&inner);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self
            .inner
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.teardown();
    }
}

/// Callback side of a transport connection.
///
/// Each sink is bound to the connection it was created for; once the channel
/// has moved on (reconnect, disconnect) its callbacks are ignored.
#[derive(Clone)]
pub struct TransportSink {
    shared: Weak<Shared>,
    generation: u64,
    user_id: UserId,
}

impl TransportSink {
    /// The connection is established
    pub fn opened(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_open(self.generation);
        }
    }

    /// A named event arrived with its raw data
    pub fn message(&self, event_name: &str, data: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_message(self.generation, &self.user_id, event_name, data);
        }
    }

    /// The connection failed or ended
    pub fn error(&self, error: TransportError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_error(self.generation, error);
        }
    }

    /// Whether this sink still belongs to the channel's active connection
    pub fn is_current(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| shared.is_current(self.generation))
            .unwrap_or(false)
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSink")
            .field("generation", &self.generation)
            .field("user_id", &self.user_id)
            .finish()
    }
}
