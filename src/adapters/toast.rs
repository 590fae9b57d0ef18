use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use super::NotificationItem;
use crate::db::DeliveryPreferences;
use crate::services::center::NotificationCenter;
use crate::services::store::NotificationState;

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub item: NotificationItem,
    pub shown_at: Instant,
    pub expires_at: Instant,
}

/// What changed on screen after a stack operation.
#[derive(Debug, Default, PartialEq)]
pub struct ToastUpdate {
    pub shown: Vec<Toast>,
    pub removed: Vec<String>,
}

/// Transient popups for newly arrived notifications.
///
/// The stack diffs each store state against the ids it has already seen and
/// queues only new unread records the policy lets through. At most
/// `max_toasts_shown` are visible; the rest wait in arrival order. Expiry
/// and dismissal only touch this queue, never the store.
#[derive(Debug)]
pub struct ToastStack {
    seen: HashSet<String>,
    primed: bool,
    visible: Vec<Toast>,
    pending: VecDeque<NotificationItem>,
    duration: Duration,
    max_visible: usize,
}

impl Default for ToastStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ToastStack {
    pub fn new() -> Self {
        let defaults = DeliveryPreferences::default();
        Self {
            seen: HashSet::new(),
            primed: false,
            visible: Vec::new(),
            pending: VecDeque::new(),
            duration: Duration::from_millis(defaults.toast_duration_ms),
            max_visible: defaults.max_toasts_shown,
        }
    }

    pub fn visible(&self) -> &[Toast] {
        &self.visible
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Earliest expiry among visible toasts.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.visible.iter().map(|t| t.expires_at).min()
    }

    /// Diff `state` against what was already seen. The first call only
    /// records existing ids so history never pops up.
    pub fn sync(
        &mut self,
        state: &NotificationState,
        prefs: &DeliveryPreferences,
        now: Instant,
    ) -> ToastUpdate {
        self.duration = Duration::from_millis(prefs.toast_duration_ms);
        self.max_visible = prefs.max_toasts_shown;

        if !self.primed {
            self.primed = true;
            self.seen = state.notifications().iter().map(|r| r.id.clone()).collect();
            return ToastUpdate::default();
        }

        let rendered_at = Utc::now();
        // Oldest first so the queue keeps arrival order.
        for record in state.notifications().iter().rev() {
            if !self.seen.insert(record.id.clone()) {
                continue;
            }
            if record.is_read || !prefs.should_toast(record) {
                continue;
            }
            self.pending
                .push_back(NotificationItem::project(record, rendered_at, &prefs.language));
        }

        let current: HashSet<&str> = state.notifications().iter().map(|r| r.id.as_str()).collect();
        self.seen.retain(|id| current.contains(id.as_str()));
        // Waiting toasts whose record was read or removed meanwhile are stale.
        self.pending.retain(|item| {
            current.contains(item.id.as_str())
                && state.get(&item.id).map_or(false, |r| !r.is_read)
        });

        ToastUpdate {
            shown: self.promote(now),
            removed: Vec::new(),
        }
    }

    /// Drop toasts whose time is up and show waiting ones in their place.
    pub fn expire(&mut self, now: Instant) -> ToastUpdate {
        let mut removed = Vec::new();
        self.visible.retain(|toast| {
            if toast.expires_at <= now {
                removed.push(toast.item.id.clone());
                false
            } else {
                true
            }
        });
        ToastUpdate {
            shown: self.promote(now),
            removed,
        }
    }

    pub fn dismiss(&mut self, id: &str, now: Instant) -> ToastUpdate {
        let before = self.visible.len() + self.pending.len();
        self.visible.retain(|t| t.item.id != id);
        self.pending.retain(|item| item.id != id);
        let removed = if self.visible.len() + self.pending.len() < before {
            vec![id.to_string()]
        } else {
            Vec::new()
        };
        ToastUpdate {
            shown: self.promote(now),
            removed,
        }
    }

    /// The user clicked a toast: mark it read and return its target.
    pub async fn open(
        &mut self,
        center: &NotificationCenter,
        id: &str,
        now: Instant,
    ) -> Option<String> {
        let target = self
            .visible
            .iter()
            .find(|t| t.item.id == id)
            .and_then(|t| t.item.action_url.clone());
        center.mark_as_read(id).await;
        self.dismiss(id, now);
        target
    }

    fn promote(&mut self, now: Instant) -> Vec<Toast> {
        let mut shown = Vec::new();
        while self.visible.len() < self.max_visible {
            let Some(item) = self.pending.pop_front() else {
                break;
            };
            let toast = Toast {
                item,
                shown_at: now,
                expires_at: now + self.duration,
            };
            self.visible.push(toast.clone());
            shown.push(toast);
        }
        shown
    }
}
