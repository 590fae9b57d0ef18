//! End-to-end tests for the notification core against a mock backend.
//!
//! The mock serves the notification socket at `/notifications` and the
//! GraphQL API at `/graphql` on a random local port. The core is wired
//! exactly as the binary wires it: SQLite storage, WebSocket connector and
//! GraphQL backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use homeservices_notifications::config::Config;
use homeservices_notifications::db::UpdateDeliveryPreferences;
use homeservices_notifications::services::init;
use homeservices_notifications::{ConnectionStatus, NotificationCenter};

const TOKEN: &str = "e2e-secret";

// ============================================================================
// Mock server
// ============================================================================

struct MockState {
    token: String,
    notifications: Mutex<Vec<Value>>,
    operations: Mutex<Vec<String>>,
    socket_attempts: AtomicUsize,
    frames: broadcast::Sender<String>,
}

struct MockServer {
    state: Arc<MockState>,
    addr: std::net::SocketAddr,
}

impl MockServer {
    async fn start(initial: Vec<Value>) -> Self {
        let (frames, _) = broadcast::channel(32);
        let state = Arc::new(MockState {
            token: TOKEN.to_string(),
            notifications: Mutex::new(initial),
            operations: Mutex::new(Vec::new()),
            socket_attempts: AtomicUsize::new(0),
            frames,
        });

        let app = Router::new()
            .route("/notifications", get(ws_handler))
            .route("/graphql", post(graphql_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state, addr }
    }

    fn config(&self, db: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.transport.socket_url = format!("ws://{}/notifications", self.addr);
        config.transport.connect_timeout_seconds = 2;
        config.backend.api_url = format!("http://{}/graphql", self.addr);
        config.backend.request_timeout_seconds = 2;
        config.reconnect.base_delay_ms = 50;
        config.reconnect.max_delay_ms = 200;
        config.database.url = format!("sqlite://{}", db.path().join("client.db").display());
        config
    }

    /// Push a frame to every open socket.
    fn push(&self, frame: Value) {
        let _ = self.state.frames.send(frame.to_string());
    }

    fn operations(&self) -> Vec<String> {
        self.state.operations.lock().unwrap().clone()
    }

    fn socket_attempts(&self) -> usize {
        self.state.socket_attempts.load(Ordering::SeqCst)
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<MockState>>,
) -> Response {
    state.socket_attempts.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Bearer {}", state.token);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == expected);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let frames = state.frames.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, frames))
}

async fn handle_socket(socket: WebSocket, mut frames: broadcast::Receiver<String>) {
    let (mut sink, mut stream) = socket.split();
    let connected = json!({ "type": "connected", "payload": { "server": "mock" } });
    if sink.send(Message::Text(connected.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    if frame["type"] == "ping" {
                        let pong = json!({ "type": "pong" }).to_string();
                        if sink.send(Message::Text(pong)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn graphql_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let expected = format!("Bearer {}", state.token);
    if headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        != Some(expected.as_str())
    {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let query = body["query"].as_str().unwrap_or_default();
    let variables = &body["variables"];
    // First field of the selection set names the operation.
    let operation: String = query
        .split_once('{')
        .map(|(_, rest)| rest.trim_start())
        .unwrap_or_default()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    state.operations.lock().unwrap().push(operation.clone());

    let mut notifications = state.notifications.lock().unwrap();
    let data = match operation.as_str() {
        "getNotifications" => json!({ "getNotifications": *notifications }),
        "getUnreadCount" => {
            let unread = notifications
                .iter()
                .filter(|n| n["isRead"] != json!(true))
                .count();
            json!({ "getUnreadCount": unread })
        }
        "markNotificationRead" => {
            let id = variables["id"].clone();
            for n in notifications.iter_mut().filter(|n| n["id"] == id) {
                n["isRead"] = json!(true);
            }
            json!({ "markNotificationRead": true })
        }
        "markNotificationsRead" => {
            let ids = variables["ids"].as_array().cloned().unwrap_or_default();
            for n in notifications.iter_mut().filter(|n| ids.contains(&n["id"])) {
                n["isRead"] = json!(true);
            }
            json!({ "markNotificationsRead": true })
        }
        "deleteNotification" => {
            let id = variables["id"].clone();
            notifications.retain(|n| n["id"] != id);
            json!({ "deleteNotification": true })
        }
        _ => return Json(json!({ "errors": [{ "message": "unknown operation" }] })).into_response(),
    };
    Json(json!({ "data": data })).into_response()
}

// ============================================================================
// Helpers
// ============================================================================

fn notification(id: &str, is_read: bool) -> Value {
    json!({
        "id": id,
        "type": "BOOKING_CONFIRMATION",
        "priority": "HIGH",
        "title": format!("Booking {}", id),
        "message": "Your cleaning is confirmed",
        "createdAt": "2024-06-01T10:00:00Z",
        "isRead": is_read,
        "actionUrl": format!("/dashboard/bookings/{}", id),
    })
}

async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

async fn center_for(
    server: &MockServer,
    db: &tempfile::TempDir,
    token: &str,
) -> Arc<NotificationCenter> {
    let config = server.config(db);
    let pool = init::init_db(&config).await.unwrap();
    init::build_center(&config, pool, Some(token.to_string()))
        .await
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn loads_snapshot_then_follows_socket_events() {
    let server = MockServer::start(vec![notification("b1", false), notification("b0", true)]).await;
    let db = tempfile::tempdir().unwrap();
    let center = center_for(&server, &db, TOKEN).await;

    let snapshot = center.snapshot();
    assert_eq!(snapshot.connection_status, ConnectionStatus::Connected);
    assert_eq!(snapshot.notifications.len(), 2);
    assert_eq!(snapshot.unread_count, 1);
    assert_eq!(center.server_unread_count(), Some(1));
    assert!(snapshot.last_error.is_none());

    server.push(json!({ "type": "new_notification", "payload": notification("b2", false) }));
    wait_until(|| center.store().snapshot().contains("b2")).await;
    assert_eq!(center.store().unread_count(), 2);
    assert_eq!(center.store().snapshot().notifications()[0].id, "b2");

    // Duplicate delivery is ignored.
    server.push(json!({ "type": "new_notification", "payload": notification("b2", false) }));
    server.push(json!({ "type": "notification_read", "payload": { "id": "b1" } }));
    wait_until(|| center.store().unread_count() == 1).await;
    assert_eq!(center.store().snapshot().len(), 3);

    center.teardown().await;
    assert_eq!(center.snapshot().connection_status, ConnectionStatus::Disconnected);
    assert!(center.snapshot().notifications.is_empty());
}

#[tokio::test]
async fn mutations_reach_the_backend() {
    let server = MockServer::start(vec![
        notification("a", false),
        notification("b", false),
        notification("c", false),
    ])
    .await;
    let db = tempfile::tempdir().unwrap();
    let center = center_for(&server, &db, TOKEN).await;
    assert_eq!(center.store().unread_count(), 3);

    center.mark_as_read("a").await;
    assert_eq!(center.store().unread_count(), 2);
    assert!(server.operations().contains(&"markNotificationRead".to_string()));

    center.delete_notification("b").await;
    assert!(!center.store().snapshot().contains("b"));
    assert!(server.operations().contains(&"deleteNotification".to_string()));

    center.mark_all_as_read().await;
    assert_eq!(center.store().unread_count(), 0);
    assert!(server.operations().contains(&"markNotificationsRead".to_string()));
    assert!(center.snapshot().last_error.is_none());

    center.teardown().await;
}

#[tokio::test]
async fn rejected_credential_is_not_retried() {
    let server = MockServer::start(vec![]).await;
    let db = tempfile::tempdir().unwrap();
    let center = center_for(&server, &db, "wrong-token").await;

    let snapshot = center.snapshot();
    assert_eq!(snapshot.connection_status, ConnectionStatus::Disconnected);
    let codes: Vec<String> = snapshot.last_error.iter().map(|e| e.code.clone()).collect();
    assert!(
        codes.iter().any(|c| c == "AUTH_REJECTED" || c == "BACKEND_REJECTED"),
        "unexpected errors {:?}",
        codes
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.socket_attempts(), 1);

    // A fresh credential lets the user reconnect on demand.
    center.update_credential(TOKEN).await;
    center.connect_socket().await;
    assert_eq!(center.snapshot().connection_status, ConnectionStatus::Connected);
    assert_eq!(server.socket_attempts(), 2);

    center.teardown().await;
}

#[tokio::test]
async fn disabling_real_time_survives_a_restart() {
    let server = MockServer::start(vec![notification("x", false)]).await;
    let db = tempfile::tempdir().unwrap();

    let center = center_for(&server, &db, TOKEN).await;
    assert_eq!(center.snapshot().connection_status, ConnectionStatus::Connected);

    let prefs = center
        .update_preferences(UpdateDeliveryPreferences {
            enable_real_time: Some(false),
            toast_duration_ms: Some(8_000),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!prefs.enable_real_time);
    assert_eq!(center.snapshot().connection_status, ConnectionStatus::Disconnected);
    center.teardown().await;
    drop(center);

    let attempts = server.socket_attempts();
    let restarted = center_for(&server, &db, TOKEN).await;
    let prefs = restarted.policy().current();
    assert!(!prefs.enable_real_time);
    assert_eq!(prefs.toast_duration_ms, 8_000);
    assert_eq!(restarted.snapshot().connection_status, ConnectionStatus::Disconnected);
    assert_eq!(server.socket_attempts(), attempts);
    // The snapshot still loads over HTTP.
    assert_eq!(restarted.snapshot().unread_count, 1);

    // Re-enabling opens the socket with the stored credential.
    restarted
        .update_preferences(UpdateDeliveryPreferences {
            enable_real_time: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(restarted.snapshot().connection_status, ConnectionStatus::Connected);

    restarted.teardown().await;
}
