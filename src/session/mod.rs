//! Signed-in user session and its optional on-disk persistence.

mod store;

pub use store::SessionStore;

use serde::{Deserialize, Serialize};

use crate::notification::UserId;

/// The signed-in user. Stored with the same `{ id, username }` shape the
/// backend returns on login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "id")]
    pub user_id: UserId,
    pub username: String,
}

impl Session {
    pub fn new(user_id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}
