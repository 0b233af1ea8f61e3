//! Owner of the live update channel for a signed-in session.
//!
//! Loads the notification backlog, keeps the event cache current from the
//! channel, and performs the read-marking side effects against the backend.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::api::NotificationApi;
use crate::channel::{ChannelState, ConnectionState, ListenerId, LiveUpdateChannel};
use crate::error::{ClientError, Result};
use crate::notification::{format, EventCache, EventId, LiveEvent};
use crate::session::Session;

pub struct NotificationCenter {
    api: Arc<dyn NotificationApi>,
    channel: LiveUpdateChannel,
    cache: Arc<EventCache>,
    cache_listener: Mutex<Option<ListenerId>>,
}

impl NotificationCenter {
    pub fn new(api: Arc<dyn NotificationApi>, channel: LiveUpdateChannel) -> Self {
        Self {
            api,
            channel,
            cache: Arc::new(EventCache::new()),
            cache_listener: Mutex::new(None),
        }
    }

    /// Load the backlog and start live updates for `session`.
    ///
    /// A failed backlog fetch leaves the cache empty and continues, except
    /// for an authentication failure, which is returned without connecting.
    #[tracing::instrument(name = "center.start", skip(self, session), fields(user_id = %session.user_id))]
    pub async fn start(&self, session: &Session) -> Result<()> {
        if session.user_id.is_empty() {
            return Err(ClientError::InvalidState(
                "session has no user id".to_string(),
            ));
        }

        match self.api.fetch_backlog().await {
            Ok(backlog) => {
                tracing::info!(count = backlog.len(), "Loaded notifications");
                self.cache.replace(backlog);
            }
            Err(e) if e.is_auth_failure() => {
                tracing::error!(error = %e, "Session rejected while loading notifications");
                self.cache.clear();
                return Err(e);
            }
            Err(e) => {
                tracing::error!(error = %e, error_code = e.code(), "Error loading notifications");
                self.cache.clear();
            }
        }

        self.attach_cache();
        self.channel.connect(session.user_id.clone())
    }

    /// Disconnect and forget cached events
    pub fn stop(&self) {
        self.channel.disconnect();
        if let Some(id) = self.lock_listener().take() {
            self.channel.remove_listener(id);
        }
        self.cache.clear();
    }

    /// Mark one notification read on the backend and in the cache.
    ///
    /// Returns false when the id is not cached.
    pub async fn acknowledge(&self, id: EventId) -> Result<bool> {
        self.api.mark_read(id).await?;
        let found = self.cache.mark_read(id);
        if !found {
            tracing::debug!(notification_id = id, "Acknowledged notification not in cache");
        }
        Ok(found)
    }

    /// Mark everything read. Returns the number of cached events changed.
    pub async fn acknowledge_all(&self) -> Result<usize> {
        if self.cache.is_empty() {
            return Ok(0);
        }
        self.api.mark_all_read().await?;
        Ok(self.cache.mark_all_read())
    }

    /// Register an additional listener on the channel
    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LiveEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.channel.on_event(listener)
    }

    pub fn unread_count(&self) -> usize {
        self.cache.unread_count()
    }

    /// "You have N new notification(s)", or `None` when all are read
    pub fn unread_summary(&self) -> Option<String> {
        format::unread_summary(self.cache.unread_count())
    }

    pub fn is_ready(&self) -> bool {
        self.channel.is_ready()
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.channel.subscribe()
    }

    /// Stream of channel states, starting with the current one
    pub fn state_changes(&self) -> WatchStream<ChannelState> {
        WatchStream::new(self.channel.subscribe())
    }

    /// Resolve once the channel has closed on its own, either because the
    /// retries were used up or because the server rejected the stream.
    /// Returns immediately if that already happened.
    pub async fn stopped(&self) -> ChannelState {
        let mut states = self.state_changes();
        while let Some(state) = states.next().await {
            if state.connection == ConnectionState::Closed && state.user_id.is_some() {
                return state;
            }
        }
        self.channel.state()
    }

    pub fn channel(&self) -> &LiveUpdateChannel {
        &self.channel
    }

    pub fn cache(&self) -> &EventCache {
        &self.cache
    }

    fn attach_cache(&self) {
        let mut listener = self.lock_listener();
        if listener.is_some() {
            return;
        }

        let cache = self.cache.clone();
        *listener = Some(self.channel.on_event(move |event| {
            cache.prepend(event.clone());
            Ok(())
        }));
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<ListenerId>> {
        self.cache_listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{BackoffConfig, ManualScheduler, MemoryTransport, TransportError};
    use crate::notification::UserId;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeApi {
        backlog: Mutex<Option<Vec<LiveEvent>>>,
        unauthorized: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn with_backlog(events: Vec<LiveEvent>) -> Self {
            Self {
                backlog: Mutex::new(Some(events)),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl NotificationApi for FakeApi {
        async fn fetch_backlog(&self) -> Result<Vec<LiveEvent>> {
            self.record("backlog");
            if self.unauthorized {
                return Err(ClientError::Unauthorized("no session".into()));
            }
            self.backlog.lock().unwrap().clone().ok_or(ClientError::Status {
                status: 500,
                context: "backlog".into(),
            })
        }

        async fn fetch_unread(&self) -> Result<Vec<LiveEvent>> {
            self.record("unread");
            Ok(Vec::new())
        }

        async fn unread_count(&self) -> Result<u64> {
            self.record("unread_count");
            Ok(0)
        }

        async fn mark_read(&self, id: EventId) -> Result<()> {
            self.record(format!("mark_read:{id}"));
            Ok(())
        }

        async fn mark_all_read(&self) -> Result<()> {
            self.record("mark_all_read");
            Ok(())
        }
    }

    fn event(id: EventId, user: i64, read: bool) -> LiveEvent {
        LiveEvent {
            id,
            user_id: UserId::from(user),
            kind: crate::notification::NotificationKind::NewComment,
            message: format!("event {id}"),
            resource_id: Some(1),
            read,
            created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        }
    }

    fn setup(api: FakeApi) -> (NotificationCenter, Arc<FakeApi>, Arc<MemoryTransport>) {
        let api = Arc::new(api);
        let transport = Arc::new(MemoryTransport::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let channel = LiveUpdateChannel::with_backoff(
            transport.clone(),
            scheduler,
            BackoffConfig::default(),
            Duration::from_secs(30),
        );
        (
            NotificationCenter::new(api.clone(), channel),
            api,
            transport,
        )
    }

    #[tokio::test]
    async fn test_start_loads_backlog_and_connects() {
        let (center, _api, transport) = setup(FakeApi::with_backlog(vec![
            event(1, 7, true),
            event(2, 7, false),
        ]));

        center.start(&Session::new(7, "alice")).await.unwrap();

        assert_eq!(center.cache().len(), 2);
        assert_eq!(center.cache().snapshot()[0].id, 2);
        assert_eq!(center.unread_summary().as_deref(), Some("You have 1 new notification"));
        assert_eq!(transport.open_count(), 1);
        assert_eq!(center.state().connection, ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_live_events_are_prepended() {
        let (center, _api, transport) = setup(FakeApi::with_backlog(vec![event(1, 7, true)]));
        center.start(&Session::new(7, "alice")).await.unwrap();

        let connection = transport.latest().unwrap();
        connection.open();
        connection.send("notification", &serde_json::to_string(&event(5, 7, false)).unwrap());

        let cached = center.cache().snapshot();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].id, 5);
        assert_eq!(center.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_backlog_failure_still_connects() {
        let (center, _api, transport) = setup(FakeApi::default());

        center.start(&Session::new(7, "alice")).await.unwrap();

        assert!(center.cache().is_empty());
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_does_not_connect() {
        let (center, _api, transport) = setup(FakeApi {
            unauthorized: true,
            ..Default::default()
        });

        let err = center.start(&Session::new(7, "alice")).await.unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_start_rejects_empty_user() {
        let (center, api, _transport) = setup(FakeApi::default());

        let err = center.start(&Session::new("", "nobody")).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge() {
        let (center, api, _transport) = setup(FakeApi::with_backlog(vec![event(3, 7, false)]));
        center.start(&Session::new(7, "alice")).await.unwrap();

        assert!(center.acknowledge(3).await.unwrap());
        assert!(center.cache().get(3).unwrap().read);
        assert!(!center.acknowledge(99).await.unwrap());
        assert!(api.calls().contains(&"mark_read:3".to_string()));
        assert_eq!(center.unread_summary(), None);
    }

    #[tokio::test]
    async fn test_acknowledge_all_skips_empty_cache() {
        let (center, api, _transport) = setup(FakeApi::with_backlog(Vec::new()));
        center.start(&Session::new(7, "alice")).await.unwrap();

        assert_eq!(center.acknowledge_all().await.unwrap(), 0);
        assert!(!api.calls().contains(&"mark_all_read".to_string()));
    }

    #[tokio::test]
    async fn test_acknowledge_all() {
        let (center, api, _transport) = setup(FakeApi::with_backlog(vec![
            event(1, 7, false),
            event(2, 7, false),
        ]));
        center.start(&Session::new(7, "alice")).await.unwrap();

        assert_eq!(center.acknowledge_all().await.unwrap(), 2);
        assert_eq!(center.unread_count(), 0);
        assert!(api.calls().contains(&"mark_all_read".to_string()));
    }

    #[tokio::test]
    async fn test_stop_clears_and_detaches() {
        let (center, _api, transport) = setup(FakeApi::with_backlog(vec![event(1, 7, false)]));
        center.start(&Session::new(7, "alice")).await.unwrap();
        assert_eq!(center.channel().listener_count(), 1);

        center.stop();

        assert!(center.cache().is_empty());
        assert_eq!(center.channel().listener_count(), 0);
        assert_eq!(center.state().connection, ConnectionState::Closed);
        assert!(transport.latest().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_restart_keeps_single_cache_listener() {
        let (center, _api, _transport) = setup(FakeApi::with_backlog(Vec::new()));
        let session = Session::new(7, "alice");

        center.start(&session).await.unwrap();
        center.start(&session).await.unwrap();

        assert_eq!(center.channel().listener_count(), 1);
    }

    #[test]
    fn test_state_changes_stream() {
        use tokio_test::{assert_pending, assert_ready, task};

        let (center, _api, _transport) = setup(FakeApi::default());
        let mut changes = task::spawn(center.state_changes());
        let current = assert_ready!(changes.poll_next()).unwrap();
        assert_eq!(current.connection, ConnectionState::Closed);
        assert_pending!(changes.poll_next());

        center.channel().connect(UserId::from(7)).unwrap();

        let state = assert_ready!(changes.poll_next()).unwrap();
        assert_eq!(state.connection, ConnectionState::Connecting);
        assert_eq!(state.user_id, Some(UserId::from(7)));
    }

    #[tokio::test]
    async fn test_stopped_sees_rejection_that_already_happened() {
        let (center, _api, transport) = setup(FakeApi::with_backlog(Vec::new()));
        center.start(&Session::new(7, "alice")).await.unwrap();

        transport.latest().unwrap().fail(TransportError::Rejected(404));

        let state = tokio::time::timeout(Duration::from_secs(1), center.stopped())
            .await
            .expect("stopped resolves for an earlier rejection");
        assert_eq!(state.connection, ConnectionState::Closed);
        assert!(!state.exhausted);
    }

    #[tokio::test]
    async fn test_stopped_ignores_initial_closed_state() {
        let (center, _api, _transport) = setup(FakeApi::default());

        let result = tokio::time::timeout(Duration::from_millis(50), center.stopped()).await;
        assert!(result.is_err(), "a never-connected channel has not stopped");
    }

    #[tokio::test]
    async fn test_stop_during_delivery_keeps_cache_empty() {
        let (center, _api, transport) = setup(FakeApi::with_backlog(Vec::new()));
        let center = Arc::new(center);

        let owner = Arc::downgrade(&center);
        center.on_event(move |_| {
            if let Some(center) = owner.upgrade() {
                center.stop();
            }
            Ok(())
        });
        center.start(&Session::new(7, "alice")).await.unwrap();

        let connection = transport.latest().unwrap();
        connection.open();
        connection.send("notification", &serde_json::to_string(&event(9, 7, false)).unwrap());

        assert!(center.cache().is_empty());
        assert_eq!(center.state().connection, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_foreign_events_stay_out_of_cache() {
        let (center, _api, transport) = setup(FakeApi::with_backlog(Vec::new()));
        center.start(&Session::new(7, "alice")).await.unwrap();

        let connection = transport.latest().unwrap();
        connection.open();
        connection.send(
            "notification",
            &json!({"id": 1, "userId": 8, "type": "NEW_ARTICLE", "message": "x", "createdAt": 0})
                .to_string(),
        );

        assert!(center.cache().is_empty());
    }
}
