use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::BackoffConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Backend base URL, e.g. `http://localhost:8080`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Timeout for request/response calls in seconds (not applied to the stream)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Delay before the first reconnect attempt in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Upper bound for any reconnect delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Liveness check interval in seconds
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,
    /// Jitter factor (0.0 to 1.0) applied to reconnect delays
    #[serde(default)]
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Where the session is remembered between runs
    #[serde(default = "default_session_path")]
    pub path: PathBuf,
    /// Persist the session after login ("remember me")
    #[serde(default = "default_persist")]
    pub persist: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Emit JSON log lines instead of the human readable format
    #[serde(default)]
    pub json: bool,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_base_delay() -> u64 {
    2_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_liveness_interval() -> u64 {
    30
}

fn default_session_path() -> PathBuf {
    PathBuf::from(".verve/session.json")
}

fn default_persist() -> bool {
    true
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("api.base_url", default_base_url())?
            .set_default("api.request_timeout_secs", default_request_timeout())?
            .set_default("channel.base_delay_ms", default_base_delay())?
            .set_default("channel.max_delay_ms", default_max_delay())?
            .set_default("channel.max_reconnect_attempts", default_max_reconnect_attempts())?
            .set_default("channel.liveness_interval_secs", default_liveness_interval())?
            .set_default("session.persist", default_persist())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // VERVE__API__BASE_URL, VERVE__AUTH__USERNAME, VERVE__TELEMETRY__JSON, ...
            .add_source(
                Environment::with_prefix("VERVE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl ApiConfig {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ChannelConfig {
    /// Liveness check period, at least one second
    pub fn liveness_interval(&self) -> Duration {
        if self.liveness_interval_secs == 0 {
            tracing::warn!("channel.liveness_interval_secs is 0, using 1 second");
        }
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            multiplier: 2.0,
            max_attempts: self.max_reconnect_attempts,
            jitter_factor: self.jitter_factor,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            liveness_interval_secs: default_liveness_interval(),
            jitter_factor: 0.0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
            persist: default_persist(),
        }
    }
}
