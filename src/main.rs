use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::signal;

use verve_live::api::{http_client, ApiClient, NotificationApi};
use verve_live::center::NotificationCenter;
use verve_live::channel::{LiveUpdateChannel, TokioScheduler};
use verve_live::config::Settings;
use verve_live::metrics::encode_metrics;
use verve_live::notification::format::relative_time;
use verve_live::session::{Session, SessionStore};
use verve_live::sse::SseTransport;
use verve_live::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;
    init_tracing(&settings.telemetry)?;
    tracing::info!(base_url = %settings.api.base_url, "Configuration loaded");

    let http = http_client()?;
    let api = Arc::new(ApiClient::new(http.clone(), settings.api.clone()));
    let store = SessionStore::new(&settings.session.path);

    let session = resolve_session(&api, &store, &settings).await?;
    tracing::info!(user_id = %session.user_id, username = %session.username, "Signed in");

    // Wire the channel
    let transport = Arc::new(SseTransport::new(http, &settings.api));
    let scheduler = Arc::new(TokioScheduler::new());
    let channel = LiveUpdateChannel::new(transport, scheduler, &settings.channel);
    let center = NotificationCenter::new(api.clone(), channel);

    center.on_event(|event| {
        tracing::info!(
            notification_id = event.id,
            event_type = event.kind.as_str(),
            article = ?event.article_link(),
            received = %relative_time(event.created_at, Utc::now()),
            "{}",
            event.message
        );
        Ok(())
    });

    if let Err(e) = center.start(&session).await {
        if e.is_auth_failure() {
            tracing::warn!("Session rejected by the server, removing stored copy");
            store.clear()?;
        }
        return Err(e.into());
    }

    if let Some(summary) = center.unread_summary() {
        tracing::info!("{}", summary);
    }
    match api.unread_count().await {
        Ok(count) => tracing::debug!(count, "Unread count reported by server"),
        Err(e) => tracing::warn!(error = %e, "Failed to fetch unread count"),
    }

    tokio::select! {
        _ = shutdown_signal_handler() => {}
        state = center.stopped() => {
            if state.exhausted {
                tracing::error!(
                    attempts = state.reconnect_attempts,
                    "Live updates stopped after repeated failures; restart to reconnect"
                );
            } else {
                tracing::error!("Live update stream was rejected by the server");
            }
        }
    }

    center.stop();

    if !settings.session.persist {
        if let Err(e) = api.logout().await {
            tracing::warn!(error = %e, "Logout failed");
        }
    }

    if let Ok(metrics) = encode_metrics() {
        tracing::debug!(metrics = %metrics, "Final metrics");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Sign in with configured credentials, or fall back to the remembered session
async fn resolve_session(api: &ApiClient, store: &SessionStore, settings: &Settings) -> Result<Session> {
    if let (Some(username), Some(password)) = (&settings.auth.username, &settings.auth.password) {
        let session = api.login(username, password).await?;
        if settings.session.persist {
            store.save(&session)?;
        }
        return Ok(session);
    }

    let session = store.load()?.context(
        "No stored session; set VERVE__AUTH__USERNAME and VERVE__AUTH__PASSWORD to sign in",
    )?;
    tracing::info!(path = %store.path().display(), "Using stored session");
    Ok(session)
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down");
        }
    }
}
