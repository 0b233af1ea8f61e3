//! Ordered listener registry with per-listener failure isolation.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use smallvec::SmallVec;
use uuid::Uuid;

use crate::metrics::ChannelMetrics;
use crate::notification::LiveEvent;

/// Callback invoked for every delivered event
pub type Listener = Arc<dyn Fn(&LiveEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned on registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of delivering one event to every listener
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<SmallVec<[(ListenerId, Listener); 4]>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&LiveEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.lock().push((id, Arc::new(listener) as Listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Invoke every listener in registration order.
    ///
    /// Runs on a snapshot taken without holding the lock during calls, so a
    /// listener may add or remove listeners. Errors and panics are logged and
    /// counted; they never stop delivery to the remaining listeners.
    pub fn dispatch(&self, event: &LiveEvent) -> DispatchReport {
        self.dispatch_while(event, || true)
    }

    /// Like `dispatch`, but stops as soon as `proceed` returns false. A
    /// listener removed after the snapshot was taken is skipped.
    pub fn dispatch_while<P>(&self, event: &LiveEvent, proceed: P) -> DispatchReport
    where
        P: Fn() -> bool,
    {
        let snapshot: SmallVec<[(ListenerId, Listener); 4]> = self.lock().iter().cloned().collect();
        let mut report = DispatchReport::default();

        for (id, listener) in snapshot {
            if !proceed() {
                break;
            }
            if !self.lock().iter().any(|(existing, _)| *existing == id) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    ChannelMetrics::record_listener_failure();
                    tracing::error!(
                        listener_id = %id,
                        notification_id = event.id,
                        error = %e,
                        "Error in notification listener"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    ChannelMetrics::record_listener_failure();
                    tracing::error!(
                        listener_id = %id,
                        notification_id = event.id,
                        panic = %panic_message(&*panic),
                        "Notification listener panicked"
                    );
                }
            }
        }

        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SmallVec<[(ListenerId, Listener); 4]>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
