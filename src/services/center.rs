//! Notification core session: owns the transport, store and policy and
//! exposes the read-only snapshot plus mutators presentation code uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::{ClientStorage, DeliveryPreferences, NotificationRecord, UpdateDeliveryPreferences};
use crate::error::{AppError, AppResult, ConnectionError, CoreError};
use crate::services::backend::NotificationBackend;
use crate::services::preferences::DeliveryPolicy;
use crate::services::reconnect::ReconnectPolicy;
use crate::services::store::NotificationStore;
use crate::services::transport::{ConnectionStatus, Connector, ListenerId, TransportConnection};

/// Collaborators injected at [`NotificationCenter::init`].
pub struct CenterDeps {
    pub connector: Arc<dyn Connector>,
    pub backend: Arc<dyn NotificationBackend>,
    pub storage: Arc<dyn ClientStorage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSnapshot {
    pub notifications: Vec<NotificationRecord>,
    pub unread_count: usize,
    pub connection_status: ConnectionStatus,
    pub last_error: Option<CoreError>,
}

const TRANSPORT_CODES: [&str; 3] = ["AUTH_REJECTED", "RECONNECT_EXHAUSTED", "TRANSPORT_ERROR"];

pub struct NotificationCenter {
    transport: TransportConnection,
    store: Arc<NotificationStore>,
    policy: Arc<DeliveryPolicy>,
    backend: Arc<dyn NotificationBackend>,
    fetch_limit: u32,
    last_error: watch::Sender<Option<CoreError>>,
    server_unread_count: Mutex<Option<u64>>,
    /// Set once the first snapshot fetch ran; any later connect may have
    /// missed pushes and resyncs.
    synced: AtomicBool,
    listeners: Mutex<Vec<ListenerId>>,
    resync_task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationCenter {
    /// Build the session: load preferences, connect when real-time delivery
    /// is enabled and a credential is given, then fetch the initial snapshot.
    ///
    /// Connecting first means nothing pushed while the snapshot is in flight
    /// is lost; the snapshot is merged over whatever already arrived.
    ///
    /// Snapshot and connection failures are recorded in `last_error` rather
    /// than failing initialization; only an invalid config is an error.
    pub async fn init(
        config: &Config,
        deps: CenterDeps,
        credential: Option<String>,
    ) -> AppResult<Arc<Self>> {
        config.validate()?;

        let policy = Arc::new(DeliveryPolicy::new(
            deps.storage,
            config.preferences.storage_key.clone(),
        ));
        let prefs = policy.load().await;

        let store = Arc::new(NotificationStore::new(
            deps.backend.clone(),
            config.store.capacity,
        ));
        let transport = TransportConnection::new(
            deps.connector,
            &config.transport,
            ReconnectPolicy::new(&config.reconnect),
        );
        let (last_error, _) = watch::channel(None);

        let center = Arc::new(Self {
            transport,
            store,
            policy,
            backend: deps.backend,
            fetch_limit: config.backend.fetch_limit,
            last_error,
            server_unread_count: Mutex::new(None),
            synced: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            resync_task: Mutex::new(None),
        });
        center.wire_transport();

        if let Some(ref token) = credential {
            center.backend.set_credential(token).await;
        }

        match credential {
            Some(token) if prefs.enable_real_time => {
                if let Err(e) = center.transport.connect(token).await {
                    center.record_error(&e);
                }
            }
            Some(token) => {
                tracing::info!("Real-time delivery disabled; socket stays closed");
                // Remember the credential for a later connect_socket().
                if let Err(e) = center.transport.update_credential(token).await {
                    center.record_error(&e);
                }
            }
            None => tracing::info!("No credential supplied; socket stays closed"),
        }

        match center.backend.fetch_notifications(center.fetch_limit).await {
            Ok(records) => {
                tracing::info!("Loaded {} notification(s)", records.len());
                center.store.merge_snapshot(records);
                center.check_unread_count().await;
            }
            Err(e) => center.record_error(&e),
        }
        center.synced.store(true, Ordering::SeqCst);

        Ok(center)
    }

    fn wire_transport(self: &Arc<Self>) {
        let mut ids = Vec::new();

        let store = self.store.clone();
        ids.push(self.transport.on_notification(move |record| {
            store.ingest(record.clone());
        }));

        let store = self.store.clone();
        ids.push(self.transport.on_notification_read(move |id| {
            store.reconcile_read_from_transport(id);
        }));

        let weak = Arc::downgrade(self);
        ids.push(self.transport.on_error(move |err: &ConnectionError| {
            if let Some(center) = weak.upgrade() {
                center.last_error.send_replace(Some(CoreError::from(err)));
            }
        }));

        let weak = Arc::downgrade(self);
        ids.push(self.transport.on_connect(move || {
            if let Some(center) = weak.upgrade() {
                center.clear_transport_error();
                // A fresh session after exhaustion, auth failure or a
                // real-time toggle; pushes during the gap were never seen.
                if center.synced.load(Ordering::SeqCst) {
                    center.spawn_resync();
                }
            }
        }));

        let weak = Arc::downgrade(self);
        ids.push(self.transport.on_reconnect(move |_| {
            if let Some(center) = weak.upgrade() {
                center.clear_transport_error();
                center.spawn_resync();
            }
        }));

        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);
    }

    fn spawn_resync(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            if let Some(center) = weak.upgrade() {
                center.resync().await;
            }
        });
        let mut slot = self
            .resync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    fn record_error(&self, error: &AppError) {
        tracing::warn!("Notification core error [{}]: {}", error.code(), error);
        self.last_error.send_replace(Some(CoreError::from(error)));
    }

    fn clear_transport_error(&self) {
        self.last_error.send_if_modified(|current| match current {
            Some(e) if TRANSPORT_CODES.contains(&e.code.as_str()) => {
                *current = None;
                true
            }
            _ => false,
        });
    }

    async fn check_unread_count(&self) {
        match self.backend.fetch_unread_count().await {
            Ok(count) => {
                let local = self.store.unread_count() as u64;
                if count != local {
                    tracing::debug!(
                        "Server reports {} unread, local store holds {} (window of {})",
                        count,
                        local,
                        self.store.capacity()
                    );
                }
                *self
                    .server_unread_count
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(count);
            }
            Err(e) => tracing::warn!("Failed to fetch unread count: {}", e),
        }
    }

    pub fn snapshot(&self) -> CoreSnapshot {
        let state = self.store.snapshot();
        CoreSnapshot {
            unread_count: state.unread_count(),
            notifications: state.notifications().to_vec(),
            connection_status: self.transport.status(),
            last_error: self.last_error.borrow().clone(),
        }
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn policy(&self) -> &Arc<DeliveryPolicy> {
        &self.policy
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.transport.subscribe_status()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<CoreError>> {
        self.last_error.subscribe()
    }

    /// Unread total last reported by the backend; may exceed the local
    /// count when the store window is smaller than the user's history.
    pub fn server_unread_count(&self) -> Option<u64> {
        *self
            .server_unread_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn mark_as_read(&self, id: &str) {
        if let Err(e) = self.store.mark_read(id).await {
            self.record_error(&e);
        }
    }

    pub async fn mark_all_as_read(&self) {
        if let Err(e) = self.store.mark_all_read().await {
            self.record_error(&e);
        }
    }

    pub async fn delete_notification(&self, id: &str) {
        if let Err(e) = self.store.remove(id).await {
            self.record_error(&e);
        }
    }

    pub async fn connect_socket(&self) {
        if let Err(e) = self.transport.connect_stored().await {
            self.record_error(&e);
        }
    }

    pub async fn disconnect_socket(&self) {
        self.transport.disconnect().await;
    }

    pub async fn update_credential(&self, credential: &str) {
        self.backend.set_credential(credential).await;
        if let Err(e) = self.transport.update_credential(credential).await {
            self.record_error(&e);
        }
    }

    /// Apply a preference change. Turning real-time delivery on or off
    /// opens or closes the socket.
    pub async fn update_preferences(
        &self,
        update: UpdateDeliveryPreferences,
    ) -> AppResult<DeliveryPreferences> {
        let was_real_time = self.policy.current().enable_real_time;
        let prefs = match self.policy.update(update).await {
            Ok(prefs) => prefs,
            Err(e) => {
                self.record_error(&e);
                return Err(e);
            }
        };
        self.apply_real_time(was_real_time, prefs.enable_real_time)
            .await;
        Ok(prefs)
    }

    pub async fn reset_preferences(&self) -> DeliveryPreferences {
        let was_real_time = self.policy.current().enable_real_time;
        let prefs = self.policy.reset().await;
        self.apply_real_time(was_real_time, prefs.enable_real_time)
            .await;
        prefs
    }

    async fn apply_real_time(&self, was: bool, now: bool) {
        match (was, now) {
            (false, true) => {
                tracing::info!("Real-time delivery enabled");
                if let Err(e) = self.transport.connect_stored().await {
                    self.record_error(&e);
                }
            }
            (true, false) => {
                tracing::info!("Real-time delivery disabled");
                self.transport.disconnect().await;
            }
            _ => {}
        }
    }

    pub fn clear_error(&self) {
        self.last_error.send_replace(None);
    }

    /// Re-fetch the backend snapshot and merge it into the store.
    pub async fn resync(&self) {
        tracing::debug!("Resyncing notifications");
        match self.backend.fetch_notifications(self.fetch_limit).await {
            Ok(records) => {
                self.store.merge_snapshot(records);
                self.check_unread_count().await;
            }
            Err(e) => self.record_error(&e),
        }
    }

    /// Close the socket, drop listeners and forget all records.
    pub async fn teardown(&self) {
        tracing::info!("Tearing down notification core");
        self.transport.disconnect().await;

        let ids: Vec<ListenerId> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for id in ids {
            self.transport.remove_listener(id);
        }

        if let Some(task) = self
            .resync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        self.store.clear();
    }
}
