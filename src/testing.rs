//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use crate::db::{ClientStorage, NotificationPriority, NotificationRecord, NotificationType};
use crate::error::{AppError, AppResult, ConnectionError};
use crate::services::backend::NotificationBackend;
use crate::services::transport::{Channel, Connector};

pub fn record(id: &str, is_read: bool) -> NotificationRecord {
    NotificationRecord {
        id: id.to_string(),
        notification_type: NotificationType::UserMessage,
        priority: NotificationPriority::Medium,
        title: format!("Notification {}", id),
        message: "Your cleaner is on the way".to_string(),
        created_at: Utc::now(),
        is_read,
        action_url: Some(format!("/dashboard/notifications/{}", id)),
        metadata: None,
    }
}

pub fn unread(id: &str) -> NotificationRecord {
    record(id, false)
}

pub fn read_record(id: &str) -> NotificationRecord {
    record(id, true)
}

/// A complete `new_notification` frame.
pub fn notification_json(id: &str, kind: &str, priority: &str) -> String {
    json!({
        "type": "new_notification",
        "payload": {
            "id": id,
            "type": kind,
            "priority": priority,
            "title": format!("Notification {}", id),
            "message": "",
            "createdAt": Utc::now().to_rfc3339(),
            "isRead": false
        }
    })
    .to_string()
}

/// Poll `cond` on the (usually paused) tokio clock for up to a minute.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..6_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

// ============================================================================
// Transport
// ============================================================================

pub struct FakeChannel {
    inbound: mpsc::UnboundedReceiver<Result<String, ConnectionError>>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

/// Server side of a [`FakeChannel`]. Dropping it closes the connection.
pub struct FakeServer {
    to_client: mpsc::UnboundedSender<Result<String, ConnectionError>>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl FakeServer {
    pub fn push(&self, text: String) {
        let _ = self.to_client.send(Ok(text));
    }

    pub fn push_text(&self, text: &str) {
        self.push(text.to_string());
    }

    pub async fn next_sent(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub fn fake_pair() -> (FakeChannel, FakeServer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        FakeChannel {
            inbound,
            outbound,
            closed: closed.clone(),
        },
        FakeServer {
            to_client,
            from_client,
            closed,
        },
    )
}

#[async_trait]
impl Channel for FakeChannel {
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        self.inbound.recv().await
    }

    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.outbound
            .send(text)
            .map_err(|_| ConnectionError::Dropped("peer gone".to_string()))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector replaying a script of outcomes; refuses once it runs out.
#[derive(Default)]
pub struct FakeConnector {
    script: Mutex<VecDeque<Result<FakeChannel, ConnectionError>>>,
    attempts: AtomicU32,
    credentials: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_ok(&self) -> FakeServer {
        let (channel, server) = fake_pair();
        self.script.lock().unwrap().push_back(Ok(channel));
        server
    }

    pub fn push_err(&self, err: ConnectionError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn credentials(&self) -> Vec<String> {
        self.credentials.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, credential: &str) -> Result<Box<dyn Channel>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.credentials.lock().unwrap().push(credential.to_string());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(channel)) => Ok(Box::new(channel)),
            Some(Err(e)) => Err(e),
            None => Err(ConnectionError::Refused("no scripted outcome".to_string())),
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    MarkRead(String),
    MarkManyRead(Vec<String>),
    Delete(String),
    Fetch(u32),
    UnreadCount,
    SetCredential(String),
}

#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<BackendCall>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    snapshot: Mutex<Vec<NotificationRecord>>,
    unread_count: AtomicU64,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_snapshot(&self, records: Vec<NotificationRecord>) {
        *self.snapshot.lock().unwrap() = records;
    }

    pub fn set_unread_count(&self, count: u64) {
        self.unread_count.store(count, Ordering::SeqCst);
    }

    async fn call(&self, call: BackendCall) -> AppResult<()> {
        self.calls.lock().unwrap().push(call);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            Err(AppError::Backend("rejected by fake backend".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NotificationBackend for FakeBackend {
    async fn mark_read(&self, id: &str) -> AppResult<()> {
        self.call(BackendCall::MarkRead(id.to_string())).await
    }

    async fn mark_many_read(&self, ids: &[String]) -> AppResult<()> {
        self.call(BackendCall::MarkManyRead(ids.to_vec())).await
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.call(BackendCall::Delete(id.to_string())).await
    }

    async fn fetch_notifications(&self, limit: u32) -> AppResult<Vec<NotificationRecord>> {
        self.call(BackendCall::Fetch(limit)).await?;
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn fetch_unread_count(&self) -> AppResult<u64> {
        self.call(BackendCall::UnreadCount).await?;
        Ok(self.unread_count.load(Ordering::SeqCst))
    }

    async fn set_credential(&self, credential: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(BackendCall::SetCredential(credential.to_string()));
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Storage whose every operation fails.
pub struct FailingStorage;

#[async_trait]
impl ClientStorage for FailingStorage {
    async fn read(&self, _key: &str) -> AppResult<Option<String>> {
        Err(AppError::Database(sqlx::Error::PoolClosed))
    }

    async fn write(&self, _key: &str, _value: &str) -> AppResult<()> {
        Err(AppError::Database(sqlx::Error::PoolClosed))
    }
}
