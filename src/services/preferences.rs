use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::db::{ClientStorage, DeliveryPreferences, NotificationRecord, UpdateDeliveryPreferences};
use crate::error::AppResult;

/// Owner of the user's delivery preferences.
///
/// Reads are synchronous snapshots; every change is written back to client
/// storage. A failed write is logged and the in-memory value still applies.
pub struct DeliveryPolicy {
    state: watch::Sender<DeliveryPreferences>,
    storage: Arc<dyn ClientStorage>,
    key: String,
    writes: Mutex<()>,
}

impl DeliveryPolicy {
    /// Policy holding defaults until [`DeliveryPolicy::load`] runs.
    pub fn new(storage: Arc<dyn ClientStorage>, key: impl Into<String>) -> Self {
        let (state, _) = watch::channel(DeliveryPreferences::default());
        Self {
            state,
            storage,
            key: key.into(),
            writes: Mutex::new(()),
        }
    }

    /// Read preferences from storage. Missing or unreadable values fall back
    /// to defaults, which are then persisted.
    pub async fn load(&self) -> DeliveryPreferences {
        let _guard = self.writes.lock().await;

        let stored = match self.storage.read(&self.key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to read delivery preferences: {}", e);
                None
            }
        };

        let prefs = match stored.as_deref().map(serde_json::from_str::<DeliveryPreferences>) {
            Some(Ok(prefs)) => {
                tracing::debug!("Loaded delivery preferences from '{}'", self.key);
                prefs.sanitized()
            }
            Some(Err(e)) => {
                tracing::warn!("Stored delivery preferences are corrupt, using defaults: {}", e);
                let defaults = DeliveryPreferences::default();
                self.persist(&defaults).await;
                defaults
            }
            None => {
                tracing::info!("No stored delivery preferences, using defaults");
                let defaults = DeliveryPreferences::default();
                self.persist(&defaults).await;
                defaults
            }
        };

        self.state.send_replace(prefs.clone());
        prefs
    }

    /// Validate and merge a partial change, then persist it.
    pub async fn update(&self, update: UpdateDeliveryPreferences) -> AppResult<DeliveryPreferences> {
        let _guard = self.writes.lock().await;

        let next = self.state.borrow().merged(&update)?;
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        self.persist(&next).await;
        Ok(next)
    }

    pub async fn reset(&self) -> DeliveryPreferences {
        let _guard = self.writes.lock().await;

        let defaults = DeliveryPreferences::default();
        self.state.send_replace(defaults.clone());
        self.persist(&defaults).await;
        defaults
    }

    pub fn current(&self) -> DeliveryPreferences {
        self.state.borrow().clone()
    }

    pub fn should_toast(&self, record: &NotificationRecord) -> bool {
        self.state.borrow().should_toast(record)
    }

    pub fn subscribe(&self) -> watch::Receiver<DeliveryPreferences> {
        self.state.subscribe()
    }

    async fn persist(&self, prefs: &DeliveryPreferences) {
        let value = match serde_json::to_string(prefs) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to encode delivery preferences: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.write(&self.key, &value).await {
            tracing::warn!("Failed to persist delivery preferences: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryClientStorage, NotificationPriority, NotificationType};
    use crate::error::AppError;
    use crate::testing::{unread, FailingStorage};
    use std::collections::BTreeMap;

    const KEY: &str = "notification_preferences";

    fn policy(storage: &Arc<InMemoryClientStorage>) -> DeliveryPolicy {
        DeliveryPolicy::new(storage.clone(), KEY)
    }

    #[tokio::test]
    async fn load_without_stored_value_persists_defaults() {
        let storage = Arc::new(InMemoryClientStorage::new());
        let prefs = policy(&storage).load().await;

        assert_eq!(prefs, DeliveryPreferences::default());
        let stored = storage.read(KEY).await.unwrap().unwrap();
        let decoded: DeliveryPreferences = serde_json::from_str(&stored).unwrap();
        assert_eq!(decoded, prefs);
    }

    #[tokio::test]
    async fn corrupt_value_falls_back_to_defaults() {
        let storage = Arc::new(InMemoryClientStorage::new());
        storage.write(KEY, "{not json").await.unwrap();

        let prefs = policy(&storage).load().await;
        assert_eq!(prefs, DeliveryPreferences::default());
        assert!(storage.read(KEY).await.unwrap().unwrap().starts_with('{'));
    }

    #[tokio::test]
    async fn out_of_range_stored_values_are_clamped() {
        let storage = Arc::new(InMemoryClientStorage::new());
        storage
            .write(KEY, r#"{"toastDurationMs": 600000, "maxToastsShown": 0}"#)
            .await
            .unwrap();

        let prefs = policy(&storage).load().await;
        assert_eq!(prefs.toast_duration_ms, 30_000);
        assert_eq!(prefs.max_toasts_shown, 1);
    }

    #[tokio::test]
    async fn update_round_trips_through_storage() {
        let storage = Arc::new(InMemoryClientStorage::new());
        let first = policy(&storage);
        first.load().await;
        first
            .update(UpdateDeliveryPreferences {
                minimum_priority: Some(NotificationPriority::High),
                ..Default::default()
            })
            .await
            .unwrap();
        first
            .update(UpdateDeliveryPreferences {
                toast_duration_ms: Some(8_000),
                ..Default::default()
            })
            .await
            .unwrap();

        let fresh = policy(&storage);
        let loaded = fresh.load().await;
        assert_eq!(loaded.toast_duration_ms, 8_000);
        assert_eq!(loaded.minimum_priority, NotificationPriority::High);
        assert_eq!(loaded.max_toasts_shown, 3);
        assert!(loaded.enable_toasts);
    }

    #[tokio::test]
    async fn invalid_update_changes_nothing() {
        let storage = Arc::new(InMemoryClientStorage::new());
        let policy = policy(&storage);
        policy.load().await;
        let before = storage.read(KEY).await.unwrap();

        let res = policy
            .update(UpdateDeliveryPreferences {
                max_toasts_shown: Some(25),
                enable_toasts: Some(false),
                ..Default::default()
            })
            .await;

        assert!(matches!(res, Err(AppError::Validation(_))));
        assert!(policy.current().enable_toasts);
        assert_eq!(storage.read(KEY).await.unwrap(), before);
    }

    #[tokio::test]
    async fn storage_failure_still_applies_in_memory() {
        let policy = DeliveryPolicy::new(Arc::new(FailingStorage), KEY);
        let prefs = policy.load().await;
        assert_eq!(prefs, DeliveryPreferences::default());

        let updated = policy
            .update(UpdateDeliveryPreferences {
                enable_toasts: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!updated.enable_toasts);
        assert!(!policy.current().enable_toasts);
    }

    #[tokio::test]
    async fn should_toast_tracks_updates() {
        let storage = Arc::new(InMemoryClientStorage::new());
        let policy = policy(&storage);
        policy.load().await;
        let record = unread("n");
        assert!(policy.should_toast(&record));

        let mut types = BTreeMap::new();
        types.insert(record.notification_type, false);
        policy
            .update(UpdateDeliveryPreferences {
                enabled_types: Some(types),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!policy.should_toast(&record));
        assert!(policy
            .current()
            .is_type_enabled(NotificationType::PaymentFailed));
    }

    #[tokio::test]
    async fn reset_restores_and_persists_defaults() {
        let storage = Arc::new(InMemoryClientStorage::new());
        let policy = policy(&storage);
        policy
            .update(UpdateDeliveryPreferences {
                enable_real_time: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut rx = policy.subscribe();

        policy.reset().await;

        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().enable_real_time);
        let stored: DeliveryPreferences =
            serde_json::from_str(&storage.read(KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored, DeliveryPreferences::default());
    }
}
