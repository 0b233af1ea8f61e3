//! Owner-side cache of received notifications.

use std::sync::RwLock;

use super::{EventId, LiveEvent};

/// Newest-first list of notifications for the signed-in user.
///
/// The channel never touches this cache directly; the owner feeds it from
/// the backlog fetch and from live events, and flips `read` after the backend
/// acknowledged the change.
#[derive(Debug, Default)]
pub struct EventCache {
    events: RwLock<Vec<LiveEvent>>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole cache with a backlog fetched from the backend
    pub fn replace(&self, mut backlog: Vec<LiveEvent>) {
        backlog.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        *self.write() = backlog;
    }

    /// Put a newly arrived event at the front. An event with the same id
    /// already in the cache is replaced.
    pub fn prepend(&self, event: LiveEvent) {
        let mut events = self.write();
        events.retain(|e| e.id != event.id);
        events.insert(0, event);
    }

    /// Mark one event read. Returns false if the event is not cached.
    pub fn mark_read(&self, id: EventId) -> bool {
        let mut events = self.write();
        match events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                event.read = true;
                true
            }
            None => false,
        }
    }

    /// Mark every cached event read, returning how many changed
    pub fn mark_all_read(&self) -> usize {
        let mut events = self.write();
        let mut changed = 0;
        for event in events.iter_mut().filter(|e| !e.read) {
            event.read = true;
            changed += 1;
        }
        changed
    }

    pub fn get(&self, id: EventId) -> Option<LiveEvent> {
        self.read().iter().find(|e| e.id == id).cloned()
    }

    pub fn unread_count(&self) -> usize {
        self.read().iter().filter(|e| !e.read).count()
    }

    pub fn unread(&self) -> Vec<LiveEvent> {
        self.read().iter().filter(|e| !e.read).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<LiveEvent> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<LiveEvent>> {
        self.events.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<LiveEvent>> {
        self.events.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{NotificationKind, UserId};
    use chrono::{TimeZone, Utc};

    fn event(id: EventId, minute: u32, read: bool) -> LiveEvent {
        LiveEvent {
            id,
            user_id: UserId::from(1),
            kind: NotificationKind::NewArticle,
            message: format!("event {}", id),
            resource_id: Some(id * 10),
            read,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_replace_orders_newest_first() {
        let cache = EventCache::new();
        cache.replace(vec![event(1, 0, false), event(2, 5, true), event(3, 2, false)]);

        let ids: Vec<_> = cache.snapshot().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(cache.unread_count(), 2);
    }

    #[test]
    fn test_prepend_replaces_duplicate() {
        let cache = EventCache::new();
        cache.replace(vec![event(1, 0, false), event(2, 1, false)]);
        cache.prepend(event(1, 0, true));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, 1);
        assert!(snapshot[0].read);
    }

    #[test]
    fn test_mark_read() {
        let cache = EventCache::new();
        cache.prepend(event(7, 0, false));

        assert!(cache.mark_read(7));
        assert!(!cache.mark_read(8));
        assert_eq!(cache.unread_count(), 0);
        assert!(cache.get(7).unwrap().read);
    }

    #[test]
    fn test_mark_all_read_counts_changes() {
        let cache = EventCache::new();
        cache.replace(vec![event(1, 0, false), event(2, 1, true), event(3, 2, false)]);

        assert_eq!(cache.mark_all_read(), 2);
        assert_eq!(cache.mark_all_read(), 0);
        assert!(cache.unread().is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = EventCache::new();
        cache.prepend(event(1, 0, false));
        cache.clear();
        assert!(cache.is_empty());
    }
}
