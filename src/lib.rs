// Shared components
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain
pub mod notification;
pub mod session;

// Live updates
pub mod channel;
pub mod sse;

// Backend access and the channel's owner
pub mod api;
pub mod center;
