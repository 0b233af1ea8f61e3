use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::{ClientError, Result};
use crate::metrics::ApiMetrics;
use crate::notification::{EventId, LiveEvent};
use crate::session::Session;

use super::{
    NotificationApi, LOGIN_PATH, LOGOUT_PATH, NOTIFICATIONS_PATH, READ_ALL_PATH,
    UNREAD_COUNT_PATH, UNREAD_PATH,
};

/// Envelope used by the auth endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// `reqwest` implementation of the backend API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, config: ApiConfig) -> Self {
        Self { http, config }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Authenticate and establish the cookie session
    #[tracing::instrument(name = "api.login", skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let request = self
            .http
            .post(self.config.url(LOGIN_PATH))
            .json(&LoginRequest { username, password });

        let body: ApiResponse<Session> = self.send("login", request).await?.json().await?;

        match body.data {
            Some(session) if body.success => {
                tracing::info!(user_id = %session.user_id, "Login successful");
                Ok(session)
            }
            _ => Err(ClientError::Unauthorized(
                body.message
                    .unwrap_or_else(|| "Invalid username or password".to_string()),
            )),
        }
    }

    pub async fn logout(&self) -> Result<()> {
        let request = self.http.post(self.config.url(LOGOUT_PATH));
        self.send("logout", request).await?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Apply the common request options, send, and map failure statuses
    async fn send(&self, endpoint: &'static str, request: RequestBuilder) -> Result<Response> {
        let result = request
            .header(CACHE_CONTROL, "no-cache")
            .timeout(self.config.request_timeout())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                ApiMetrics::record_failure(endpoint);
                tracing::warn!(endpoint, error = %e, "API request failed");
                return Err(e.into());
            }
        };

        let status = response.status();
        tracing::debug!(endpoint, status = status.as_u16(), "API response");

        if status.is_success() {
            ApiMetrics::record_success(endpoint);
            return Ok(response);
        }

        ApiMetrics::record_failure(endpoint);
        if status == StatusCode::UNAUTHORIZED {
            // Login answers 401 with an envelope carrying the reason
            let message = response
                .json::<ApiResponse<serde_json::Value>>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| format!("{} requires a signed-in session", endpoint));
            return Err(ClientError::Unauthorized(message));
        }

        Err(ClientError::Status {
            status: status.as_u16(),
            context: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl NotificationApi for ApiClient {
    async fn fetch_backlog(&self) -> Result<Vec<LiveEvent>> {
        let request = self.http.get(self.config.url(NOTIFICATIONS_PATH));
        let events: Vec<LiveEvent> = self.send("backlog", request).await?.json().await?;
        tracing::debug!(count = events.len(), "Fetched notification backlog");
        Ok(events)
    }

    async fn fetch_unread(&self) -> Result<Vec<LiveEvent>> {
        let request = self.http.get(self.config.url(UNREAD_PATH));
        Ok(self.send("unread", request).await?.json().await?)
    }

    async fn unread_count(&self) -> Result<u64> {
        let request = self.http.get(self.config.url(UNREAD_COUNT_PATH));
        Ok(self.send("unread_count", request).await?.json().await?)
    }

    async fn mark_read(&self, id: EventId) -> Result<()> {
        let path = format!("{}/{}/read", NOTIFICATIONS_PATH, id);
        let request = self.http.put(self.config.url(&path));
        self.send("mark_read", request).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<()> {
        let request = self.http.put(self.config.url(READ_ALL_PATH));
        self.send("mark_all_read", request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::UserId;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ApiClient {
        let config = ApiConfig {
            base_url: server.uri(),
            request_timeout_secs: 5,
        };
        ApiClient::new(crate::api::http_client().unwrap(), config)
    }

    #[tokio::test]
    async fn test_login_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({"username": "alice", "password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "message": "Login successful",
                "data": {"id": 4, "username": "alice"}
            })))
            .mount(&server)
            .await;

        let session = client(&server).login("alice", "secret").await.unwrap();
        assert_eq!(session.user_id, UserId::from(4));
        assert_eq!(session.username, "alice");
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "success": false,
                "message": "Invalid username or password",
                "data": null
            })))
            .mount(&server)
            .await;

        let err = client(&server).login("alice", "wrong").await.unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(err.to_string(), "Unauthorized: Invalid username or password");
    }

    #[tokio::test]
    async fn test_fetch_backlog_sends_no_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NOTIFICATIONS_PATH))
            .and(header("cache-control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 2, "userId": 4, "type": "NEW_ARTICLE", "message": "new", "resourceId": 9, "read": false, "createdAt": 1_700_000_100_000i64},
                {"id": 1, "userId": 4, "type": "NEW_COMMENT", "message": "old", "read": true, "createdAt": 1_700_000_000_000i64}
            ])))
            .mount(&server)
            .await;

        let events = client(&server).fetch_backlog().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].article_link(), Some(9));
        assert!(events[1].read);
    }

    #[tokio::test]
    async fn test_unread_count_and_unread_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(UNREAD_COUNT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(3)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(UNREAD_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let api = client(&server);
        assert_eq!(api.unread_count().await.unwrap(), 3);
        assert!(api.fetch_unread().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_paths() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/notifications/17/read"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(READ_ALL_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server);
        api.mark_read(17).await.unwrap();
        api.mark_all_read().await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_backlog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NOTIFICATIONS_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).fetch_backlog().await.unwrap_err();
        assert!(matches!(err, ClientError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(READ_ALL_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).mark_all_read().await.unwrap_err();
        match err {
            ClientError::Status { status, context } => {
                assert_eq!(status, 500);
                assert_eq!(context, "mark_all_read");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
