//! Startup helpers:
//! - database connection + migrations
//! - production wiring of the notification center
//! - background observers that log store, status and toast changes

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::adapters::{BadgeView, ToastStack, ToastUpdate};
use crate::config::Config;
use crate::db::SqliteClientStorage;
use crate::services::backend::GraphqlBackend;
use crate::services::center::{CenterDeps, NotificationCenter};
use crate::services::socket::WebSocketConnector;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", scheme, host, port_part, url.path())
    } else if let Some(at_pos) = db_url.find('@') {
        format!("(redacted){}", &db_url[at_pos + 1..])
    } else {
        "(redacted)".to_string()
    }
}

/// Open the client storage database and run migrations.
///
/// Creates the parent directory of a file-backed database before opening it
/// with `create_if_missing(true)`.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Opening client storage: {}", redact_db_url(db_url));

    let connect_options = if db_url.starts_with("sqlite::memory:") {
        db_url.parse::<sqlx::sqlite::SqliteConnectOptions>()?
    } else {
        let db_path = db_url
            .strip_prefix("sqlite://")
            .or_else(|| db_url.strip_prefix("sqlite:"))
            .unwrap_or(db_url);
        let db_file_path = Path::new(db_path);

        if let Some(parent) = db_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    )
                })?;
            }
        }
        if !db_file_path.exists() {
            tracing::info!("Creating database file: {}", db_file_path.display());
        }

        sqlx::sqlite::SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
    };

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections.max(1))
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Build a center backed by SQLite storage, the WebSocket connector and the
/// GraphQL backend.
pub async fn build_center(
    config: &Config,
    pool: sqlx::SqlitePool,
    credential: Option<String>,
) -> Result<Arc<NotificationCenter>> {
    let deps = CenterDeps {
        connector: Arc::new(WebSocketConnector::new(config.transport.socket_url.clone())),
        backend: Arc::new(GraphqlBackend::new(&config.backend, credential.clone())?),
        storage: Arc::new(SqliteClientStorage::new(pool)),
    };
    Ok(NotificationCenter::init(config, deps, credential).await?)
}

/// Spawn observers that log what the presentation adapters would render:
/// - badge label and connection status on every store/status change
/// - toasts as they appear and expire
///
/// Each observer exits on the shutdown broadcast.
pub fn spawn_observers(
    center: Arc<NotificationCenter>,
    shutdown: broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    // Badge
    {
        let mut shutdown_rx = shutdown.subscribe();
        let mut notifications = center.store().subscribe();
        let mut status = center.subscribe_status();
        let mut errors = center.subscribe_errors();
        let policy = center.policy().clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    res = notifications.changed() => if res.is_err() { break },
                    res = status.changed() => if res.is_err() { break },
                    res = errors.changed() => {
                        if res.is_err() { break }
                        if let Some(err) = errors.borrow_and_update().clone() {
                            tracing::warn!("[{}] {}", err.code, err.message);
                        }
                        continue;
                    }
                }
                let lang = policy.current().language;
                let badge = BadgeView::project(
                    &notifications.borrow_and_update(),
                    *status.borrow_and_update(),
                    &lang,
                );
                tracing::info!(
                    "Badge: {} unread ({}), {}",
                    badge.unread_count,
                    badge.label.as_deref().unwrap_or("-"),
                    badge.status_label
                );
            }
            tracing::debug!("Badge observer stopped");
        }));
    }

    // Toasts
    {
        let mut shutdown_rx = shutdown.subscribe();
        let mut notifications = center.store().subscribe();
        let policy = center.policy().clone();
        handles.push(tokio::spawn(async move {
            let mut toasts = ToastStack::new();
            let initial = notifications.borrow_and_update().clone();
            toasts.sync(&initial, &policy.current(), Instant::now());
            loop {
                let deadline = toasts.next_deadline();
                let update = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    res = notifications.changed() => {
                        if res.is_err() { break }
                        let state = notifications.borrow_and_update().clone();
                        toasts.sync(&state, &policy.current(), Instant::now())
                    }
                    _ = sleep_until_deadline(deadline) => toasts.expire(Instant::now()),
                };
                log_toasts(&update);
            }
            tracing::debug!("Toast observer stopped");
        }));
    }

    handles
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn log_toasts(update: &ToastUpdate) {
    for toast in &update.shown {
        tracing::info!(
            "Toast [{}] {}: {}",
            toast.item.priority_label,
            toast.item.title,
            toast.item.message
        );
    }
    for id in &update.removed {
        tracing::debug!("Toast {} closed", id);
    }
}
