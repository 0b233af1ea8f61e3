mod settings;

pub use settings::{ApiConfig, AuthConfig, ChannelConfig, SessionConfig, Settings, TelemetryConfig};
