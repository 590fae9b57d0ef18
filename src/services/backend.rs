use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::config::BackendConfig;
use crate::db::NotificationRecord;
use crate::error::{AppError, AppResult};

/// Server-side notification operations the core depends on.
///
/// Every mutation either fully succeeds or returns an error; callers only
/// touch local state after `Ok`.
#[async_trait]
pub trait NotificationBackend: Send + Sync + 'static {
    async fn mark_read(&self, id: &str) -> AppResult<()>;

    /// Batched mark-as-read. Treated as atomic.
    async fn mark_many_read(&self, ids: &[String]) -> AppResult<()>;

    async fn delete(&self, id: &str) -> AppResult<()>;

    /// Most recent notifications, newest first.
    async fn fetch_notifications(&self, limit: u32) -> AppResult<Vec<NotificationRecord>>;

    async fn fetch_unread_count(&self) -> AppResult<u64>;

    /// Replace the bearer credential used for subsequent calls.
    async fn set_credential(&self, _credential: &str) {}
}

const MARK_READ: &str =
    "mutation MarkNotificationRead($id: ID!) { markNotificationRead(id: $id) }";
const MARK_MANY_READ: &str =
    "mutation MarkNotificationsRead($ids: [ID!]!) { markNotificationsRead(ids: $ids) }";
const DELETE: &str = "mutation DeleteNotification($id: ID!) { deleteNotification(id: $id) }";
const GET_NOTIFICATIONS: &str = "query GetNotifications($limit: Int) { getNotifications(limit: $limit) { id type priority title message createdAt isRead actionUrl metadata } }";
const GET_UNREAD_COUNT: &str = "query GetUnreadCount { getUnreadCount }";

#[derive(Debug, Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// GraphQL-over-HTTP implementation of [`NotificationBackend`].
pub struct GraphqlBackend {
    client: Client,
    api_url: String,
    credential: RwLock<Option<String>>,
}

impl GraphqlBackend {
    pub fn new(config: &BackendConfig, credential: Option<String>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            credential: RwLock::new(credential),
        })
    }

    async fn execute(&self, operation: &str, query: &str, variables: Value) -> AppResult<Value> {
        let mut request = self.client.post(&self.api_url).json(&GraphqlRequest { query, variables });
        if let Some(token) = self.credential.read().await.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("{} failed with HTTP {}: {}", operation, status, body);
            return Err(AppError::Backend(format!("{} failed with HTTP {}", operation, status)));
        }

        let body: GraphqlResponse = response.json().await?;
        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(AppError::Backend(messages.join("; ")));
        }

        let data = body
            .data
            .ok_or_else(|| AppError::Backend(format!("{} returned no data", operation)))?;
        Ok(data.get(operation).cloned().unwrap_or(Value::Null))
    }

    async fn mutate(&self, operation: &str, query: &str, variables: Value) -> AppResult<()> {
        let result = self.execute(operation, query, variables).await?;
        if mutation_succeeded(&result) {
            Ok(())
        } else {
            Err(AppError::Backend(format!("{} was rejected", operation)))
        }
    }
}

/// Mutations answer either a bare boolean, a `{ success }` object or the
/// affected entity; only an explicit `false` or `null` is a rejection.
fn mutation_succeeded(result: &Value) -> bool {
    match result {
        Value::Bool(ok) => *ok,
        Value::Null => false,
        Value::Object(map) => map.get("success").and_then(Value::as_bool).unwrap_or(true),
        _ => true,
    }
}

fn parse_notification_list(result: &Value) -> Vec<NotificationRecord> {
    let items = match result {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("notifications")
            .or_else(|| map.get("items"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    };

    items
        .iter()
        .filter_map(|item| match NotificationRecord::from_payload(item) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping invalid notification from backend: {}", e);
                None
            }
        })
        .collect()
}

fn parse_count(result: &Value) -> Option<u64> {
    match result {
        Value::Number(n) => n.as_u64(),
        Value::Object(map) => map.get("count").and_then(Value::as_u64),
        _ => None,
    }
}

#[async_trait]
impl NotificationBackend for GraphqlBackend {
    async fn mark_read(&self, id: &str) -> AppResult<()> {
        self.mutate("markNotificationRead", MARK_READ, json!({ "id": id }))
            .await
    }

    async fn mark_many_read(&self, ids: &[String]) -> AppResult<()> {
        self.mutate("markNotificationsRead", MARK_MANY_READ, json!({ "ids": ids }))
            .await
    }

    async fn delete(&self, id: &str) -> AppResult<()> {
        self.mutate("deleteNotification", DELETE, json!({ "id": id }))
            .await
    }

    async fn fetch_notifications(&self, limit: u32) -> AppResult<Vec<NotificationRecord>> {
        let result = self
            .execute("getNotifications", GET_NOTIFICATIONS, json!({ "limit": limit }))
            .await?;
        Ok(parse_notification_list(&result))
    }

    async fn fetch_unread_count(&self) -> AppResult<u64> {
        let result = self
            .execute("getUnreadCount", GET_UNREAD_COUNT, json!({}))
            .await?;
        parse_count(&result)
            .ok_or_else(|| AppError::MalformedPayload(format!("unread count '{}'", result)))
    }

    async fn set_credential(&self, credential: &str) {
        *self.credential.write().await = Some(credential.to_string());
    }
}
