use chrono::{DateTime, Utc};
use serde::Serialize;

use super::NotificationItem;
use crate::i18n;
use crate::services::center::NotificationCenter;
use crate::services::store::NotificationState;
use crate::services::transport::ConnectionStatus;

pub const DEFAULT_DROPDOWN_ITEMS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropdownView {
    pub is_open: bool,
    pub title: String,
    pub items: Vec<NotificationItem>,
    pub unread_count: usize,
    pub has_more: bool,
    pub empty_label: Option<String>,
    pub mark_all_label: Option<String>,
    /// Offered while the socket is down.
    pub reconnect_label: Option<String>,
    pub view_all_label: String,
}

/// Open/closed flag of the header dropdown plus its intents.
#[derive(Debug, Clone)]
pub struct DropdownState {
    open: bool,
    max_items: usize,
}

impl Default for DropdownState {
    fn default() -> Self {
        Self::new(DEFAULT_DROPDOWN_ITEMS)
    }
}

impl DropdownState {
    pub fn new(max_items: usize) -> Self {
        Self {
            open: false,
            max_items: max_items.max(1),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn toggle(&mut self) {
        self.open = !self.open;
    }

    pub fn project(
        &self,
        state: &NotificationState,
        status: ConnectionStatus,
        now: DateTime<Utc>,
        lang: &str,
    ) -> DropdownView {
        let items: Vec<NotificationItem> = state
            .notifications()
            .iter()
            .take(self.max_items)
            .map(|r| NotificationItem::project(r, now, lang))
            .collect();

        DropdownView {
            is_open: self.open,
            title: i18n::t_in(lang, "dropdown.title"),
            has_more: state.len() > items.len(),
            empty_label: items.is_empty().then(|| i18n::t_in(lang, "dropdown.empty")),
            items,
            unread_count: state.unread_count(),
            mark_all_label: (state.unread_count() > 0)
                .then(|| i18n::t_in(lang, "dropdown.mark_all")),
            reconnect_label: (status == ConnectionStatus::Disconnected)
                .then(|| i18n::t_in(lang, "dropdown.reconnect")),
            view_all_label: i18n::t_in(lang, "dropdown.view_all"),
        }
    }

    /// Mark the clicked notification read, close the panel and return where
    /// the click should navigate.
    pub async fn click(&mut self, center: &NotificationCenter, id: &str) -> Option<String> {
        let target = center
            .store()
            .snapshot()
            .get(id)
            .and_then(|r| r.action_url.clone());
        center.mark_as_read(id).await;
        self.close();
        target
    }

    pub async fn delete(&self, center: &NotificationCenter, id: &str) {
        center.delete_notification(id).await;
    }

    pub async fn mark_all(&self, center: &NotificationCenter) {
        center.mark_all_as_read().await;
    }

    pub async fn reconnect(&self, center: &NotificationCenter) {
        center.connect_socket().await;
    }
}
