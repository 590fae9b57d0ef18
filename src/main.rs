use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use homeservices_notifications::config::{Config, ConfigError};
use homeservices_notifications::services::init;

const AUTH_TOKEN_VAR: &str = "NOTIFICATIONS_AUTH_TOKEN";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homeservices_notifications=debug,notifications_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let credential = std::env::var(AUTH_TOKEN_VAR)
        .ok()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(AUTH_TOKEN_VAR.to_string()))?;

    tracing::info!("Starting notifications client");

    let pool = init::init_db(&config).await?;
    let center = init::build_center(&config, pool, Some(credential)).await?;

    let snapshot = center.snapshot();
    tracing::info!(
        "Loaded {} notifications ({} unread), socket {:?}",
        snapshot.notifications.len(),
        snapshot.unread_count,
        snapshot.connection_status
    );

    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let observer_handles = init::spawn_observers(center.clone(), shutdown_tx.clone());

    wait_for_signal().await;
    tracing::info!("Shutdown signal received, stopping observers");
    let _ = shutdown_tx.send(());

    center.teardown().await;

    let shutdown_wait = Duration::from_secs(5);
    let observers = async {
        for h in observer_handles {
            let _ = h.await;
        }
    };
    if tokio::time::timeout(shutdown_wait, observers).await.is_err() {
        tracing::warn!(
            "Observers did not exit within {}s",
            shutdown_wait.as_secs()
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to bind SIGTERM: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            tracing::error!("Failed to bind Ctrl+C: {}", e);
        }
    }
}
