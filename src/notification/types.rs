use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Notification identifier as assigned by the backend
pub type EventId = i64;

/// Identifier of a signed-in user.
///
/// The backend emits numeric ids while stored sessions may carry them as
/// strings, so both JSON representations are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Only ids in canonical integer form go out as numbers, so "007" survives
        match self.0.parse::<i64>() {
            Ok(n) if n.to_string() == self.0 => serializer.serialize_i64(n),
            _ => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(i64),
            Text(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Number(n) => UserId::from(n),
            Repr::Text(s) => UserId::new(s),
        })
    }
}

/// Kind of notification, as carried in the `type` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    NewArticle,
    NewComment,
    CommentReply,
    Test,
    Other(String),
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::NewArticle => "NEW_ARTICLE",
            NotificationKind::NewComment => "NEW_COMMENT",
            NotificationKind::CommentReply => "COMMENT_REPLY",
            NotificationKind::Test => "TEST_NOTIFICATION",
            NotificationKind::Other(s) => s,
        }
    }

    /// Kinds whose `resource_id` points at an article
    pub fn links_to_article(&self) -> bool {
        matches!(
            self,
            NotificationKind::NewArticle
                | NotificationKind::NewComment
                | NotificationKind::CommentReply
        )
    }
}

impl From<&str> for NotificationKind {
    fn from(s: &str) -> Self {
        match s {
            "NEW_ARTICLE" => NotificationKind::NewArticle,
            "NEW_COMMENT" => NotificationKind::NewComment,
            "COMMENT_REPLY" => NotificationKind::CommentReply,
            "TEST_NOTIFICATION" => NotificationKind::Test,
            other => NotificationKind::Other(other.to_string()),
        }
    }
}

impl Serialize for NotificationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NotificationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(NotificationKind::from(s.as_str()))
    }
}

/// Server-pushed notification record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub id: EventId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<i64>,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl LiveEvent {
    /// Article this notification should open, if any
    pub fn article_link(&self) -> Option<i64> {
        self.resource_id.filter(|_| self.kind.links_to_article())
    }

    pub fn is_for(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }
}

/// `createdAt` arrives as epoch milliseconds from the backend's date
/// serializer, or as RFC 3339 text.
mod created_at {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Millis(i64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
            Repr::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_backend_payload() {
        let event: LiveEvent = serde_json::from_value(json!({
            "id": 17,
            "userId": 3,
            "type": "NEW_COMMENT",
            "message": "alice commented on your article",
            "resourceId": 42,
            "read": false,
            "createdAt": 1_700_000_000_000i64
        }))
        .unwrap();

        assert_eq!(event.id, 17);
        assert_eq!(event.user_id, UserId::from(3));
        assert_eq!(event.kind, NotificationKind::NewComment);
        assert_eq!(event.article_link(), Some(42));
        assert_eq!(event.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_parse_string_user_id_and_rfc3339() {
        let event: LiveEvent = serde_json::from_value(json!({
            "id": 1,
            "userId": "3",
            "type": "SOMETHING_NEW",
            "message": "hi",
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert!(event.is_for(&UserId::from(3)));
        assert_eq!(event.kind, NotificationKind::Other("SOMETHING_NEW".into()));
        assert!(!event.read);
        assert_eq!(event.resource_id, None);
        assert_eq!(event.article_link(), None);
    }

    #[test]
    fn test_test_notification_has_no_article_link() {
        let event: LiveEvent = serde_json::from_value(json!({
            "id": 1,
            "userId": 9,
            "type": "TEST_NOTIFICATION",
            "message": "test",
            "resourceId": 1,
            "createdAt": 0
        }))
        .unwrap();

        assert_eq!(event.article_link(), None);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let result: Result<LiveEvent, _> = serde_json::from_value(json!({
            "id": 1,
            "message": "no user"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_user_id_serializes_numeric() {
        assert_eq!(serde_json::to_value(UserId::from(5)).unwrap(), json!(5));
        assert_eq!(serde_json::to_value(UserId::new("abc")).unwrap(), json!("abc"));
        assert!(UserId::new("  ").is_empty());
    }

    #[test]
    fn test_non_canonical_numeric_id_stays_text() {
        for raw in ["007", "+5", "-0"] {
            let id = UserId::new(raw);
            let value = serde_json::to_value(&id).unwrap();
            assert_eq!(value, json!(raw));
            assert_eq!(serde_json::from_value::<UserId>(value).unwrap(), id);
        }
        assert_eq!(serde_json::to_value(UserId::new("-3")).unwrap(), json!(-3));
    }
}
