use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::db::{NotificationPriority, NotificationRecord, NotificationType};
use crate::error::AppResult;
use crate::services::backend::NotificationBackend;

/// Immutable view of the store, newest insert first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationState {
    notifications: Vec<NotificationRecord>,
    unread_count: usize,
}

impl NotificationState {
    pub fn notifications(&self) -> &[NotificationRecord] {
        &self.notifications
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.notifications.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn by_type(&self, kind: NotificationType) -> Vec<&NotificationRecord> {
        self.notifications
            .iter()
            .filter(|r| r.notification_type == kind)
            .collect()
    }

    pub fn by_priority(&self, priority: NotificationPriority) -> Vec<&NotificationRecord> {
        self.notifications
            .iter()
            .filter(|r| r.priority == priority)
            .collect()
    }

    pub fn at_least_priority(&self, priority: NotificationPriority) -> Vec<&NotificationRecord> {
        self.notifications
            .iter()
            .filter(|r| r.priority >= priority)
            .collect()
    }

    pub fn unread_only(&self) -> Vec<&NotificationRecord> {
        self.notifications.iter().filter(|r| !r.is_read).collect()
    }

    pub fn unread_ids(&self) -> Vec<String> {
        self.notifications
            .iter()
            .filter(|r| !r.is_read)
            .map(|r| r.id.clone())
            .collect()
    }

    fn recount(&mut self) {
        self.unread_count = self.notifications.iter().filter(|r| !r.is_read).count();
    }

    fn insert(&mut self, record: NotificationRecord, capacity: usize) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        if !record.is_read {
            self.unread_count += 1;
        }
        self.notifications.insert(0, record);

        while self.notifications.len() > capacity {
            if let Some(evicted) = self.notifications.pop() {
                if !evicted.is_read {
                    self.unread_count = self.unread_count.saturating_sub(1);
                }
                tracing::debug!("Evicted notification {} (capacity {})", evicted.id, capacity);
            }
        }
        true
    }

    /// Flip the given ids to read; returns how many actually changed.
    fn apply_read<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let ids: HashSet<&str> = ids.into_iter().collect();
        let mut flipped = 0;
        for record in self.notifications.iter_mut() {
            if !record.is_read && ids.contains(record.id.as_str()) {
                record.is_read = true;
                flipped += 1;
            }
        }
        self.unread_count = self.unread_count.saturating_sub(flipped);
        flipped
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(pos) = self.notifications.iter().position(|r| r.id == id) else {
            return false;
        };
        let removed = self.notifications.remove(pos);
        if !removed.is_read {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        true
    }

    /// Merge a backend snapshot into local state.
    ///
    /// Read status is sticky: a record read locally stays read even if the
    /// snapshot predates that. Local records missing from the snapshot are
    /// kept only when they are newer than everything in it.
    fn merge(&mut self, remote: Vec<NotificationRecord>, capacity: usize) {
        let remote_ids: HashSet<&str> = remote.iter().map(|r| r.id.as_str()).collect();
        let newest_remote = remote.iter().map(|r| r.created_at).max();

        let mut merged: Vec<NotificationRecord> = self
            .notifications
            .iter()
            .filter(|local| !remote_ids.contains(local.id.as_str()))
            .filter(|local| newest_remote.map_or(true, |newest| local.created_at > newest))
            .cloned()
            .collect();

        let mut seen: HashSet<String> = merged.iter().map(|r| r.id.clone()).collect();
        for mut record in remote {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            if let Some(local) = self.get(&record.id) {
                record.is_read |= local.is_read;
            }
            merged.push(record);
        }
        merged.truncate(capacity);

        self.notifications = merged;
        self.recount();
    }
}

/// Owner of the notification collection and the unread count.
///
/// State lives in a watch channel; every adapter subscribes to it instead
/// of keeping its own copy. Backend calls never run while the state is
/// borrowed, and local state only changes after the backend confirmed.
pub struct NotificationStore {
    state: watch::Sender<NotificationState>,
    backend: Arc<dyn NotificationBackend>,
    capacity: usize,
    mark_all: Mutex<()>,
}

impl NotificationStore {
    pub fn new(backend: Arc<dyn NotificationBackend>, capacity: usize) -> Self {
        let (state, _) = watch::channel(NotificationState::default());
        Self {
            state,
            backend,
            capacity: capacity.max(1),
            mark_all: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> NotificationState {
        self.state.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state.borrow().unread_count
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationState> {
        self.state.subscribe()
    }

    /// Insert-or-ignore. Returns whether the record was new.
    pub fn ingest(&self, record: NotificationRecord) -> bool {
        let capacity = self.capacity;
        let id = record.id.clone();
        let inserted = self
            .state
            .send_if_modified(|state| state.insert(record, capacity));
        if !inserted {
            tracing::debug!("Ignoring duplicate notification {}", id);
        }
        inserted
    }

    pub async fn mark_read(&self, id: &str) -> AppResult<()> {
        let already_read = match self.state.borrow().get(id) {
            Some(record) => record.is_read,
            None => {
                tracing::debug!("mark_read for unknown notification {}", id);
                return Ok(());
            }
        };
        if already_read {
            return Ok(());
        }

        self.backend.mark_read(id).await?;

        // A transport reconcile may have landed while the call was in flight.
        self.state
            .send_if_modified(|state| state.apply_read([id]) > 0);
        Ok(())
    }

    /// Mark every currently unread record read with one batched call.
    ///
    /// Concurrent calls queue; each re-reads the unread set after acquiring
    /// the lock. Records ingested while the call is in flight stay unread.
    pub async fn mark_all_read(&self) -> AppResult<()> {
        let _guard = self.mark_all.lock().await;

        let ids = self.state.borrow().unread_ids();
        if ids.is_empty() {
            return Ok(());
        }

        tracing::debug!("Marking {} notification(s) read", ids.len());
        self.backend.mark_many_read(&ids).await?;

        self.state
            .send_if_modified(|state| state.apply_read(ids.iter().map(String::as_str)) > 0);
        Ok(())
    }

    /// Backend delete, then local removal. Unknown ids are a no-op.
    pub async fn remove(&self, id: &str) -> AppResult<()> {
        if !self.state.borrow().contains(id) {
            tracing::debug!("remove for unknown notification {}", id);
            return Ok(());
        }

        self.backend.delete(id).await?;

        self.state.send_if_modified(|state| state.remove(id));
        Ok(())
    }

    /// Apply a read made in another session. Never calls the backend.
    pub fn reconcile_read_from_transport(&self, id: &str) -> bool {
        self.state
            .send_if_modified(|state| state.apply_read([id]) > 0)
    }

    /// Merge a backend snapshot; on an empty store this is a plain load.
    pub fn merge_snapshot(&self, records: Vec<NotificationRecord>) {
        let capacity = self.capacity;
        self.state.send_if_modified(|state| {
            let before = state.clone();
            state.merge(records, capacity);
            *state != before
        });
    }

    pub fn clear(&self) {
        self.state.send_if_modified(|state| {
            if state.is_empty() {
                return false;
            }
            *state = NotificationState::default();
            true
        });
    }
}
