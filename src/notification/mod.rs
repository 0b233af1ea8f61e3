//! Notification records and the owner-side cache.

mod cache;
pub mod format;
mod types;

pub use cache::EventCache;
pub use types::{EventId, LiveEvent, NotificationKind, UserId};
