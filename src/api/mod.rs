//! Backend request/response API.
//!
//! `NotificationApi` abstracts the notification endpoints so the owner-side
//! logic can be exercised without a server; `ApiClient` is the `reqwest`
//! implementation, which also handles login/logout.

mod client;

use async_trait::async_trait;

use crate::error::Result;
use crate::notification::{EventId, LiveEvent};

pub use client::{ApiClient, ApiResponse, LoginRequest};

pub const LOGIN_PATH: &str = "/api/auth/login";
pub const LOGOUT_PATH: &str = "/api/auth/logout";
pub const NOTIFICATIONS_PATH: &str = "/api/notifications";
pub const UNREAD_PATH: &str = "/api/notifications/unread";
pub const UNREAD_COUNT_PATH: &str = "/api/notifications/count/unread";
pub const READ_ALL_PATH: &str = "/api/notifications/read-all";

/// Notification endpoints used by the channel's owner
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// All notifications for the session user, newest first
    async fn fetch_backlog(&self) -> Result<Vec<LiveEvent>>;

    async fn fetch_unread(&self) -> Result<Vec<LiveEvent>>;

    async fn unread_count(&self) -> Result<u64>;

    /// Mark one notification read
    async fn mark_read(&self, id: EventId) -> Result<()>;

    /// Mark every notification of the session user read
    async fn mark_all_read(&self) -> Result<()>;
}

/// HTTP client shared by the API and the stream transport.
///
/// Keeps cookies so the login session is sent with every request. No
/// client-wide timeout: the stream request stays open indefinitely.
pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .cookie_store(true)
        .user_agent(concat!("verve-live/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
