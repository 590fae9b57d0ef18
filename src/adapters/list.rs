use chrono::{DateTime, Utc};
use serde::Serialize;

use super::NotificationItem;
use crate::db::{NotificationPriority, NotificationRecord, NotificationType};
use crate::i18n;
use crate::services::center::NotificationCenter;
use crate::services::store::NotificationState;

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ListFilter {
    #[default]
    All,
    Unread,
    Type(NotificationType),
    MinPriority(NotificationPriority),
}

impl ListFilter {
    pub fn matches(&self, record: &NotificationRecord) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Unread => !record.is_read,
            ListFilter::Type(kind) => record.notification_type == *kind,
            ListFilter::MinPriority(priority) => record.priority >= *priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub items: Vec<NotificationItem>,
    pub filter: ListFilter,
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
    pub empty_label: Option<String>,
}

impl ListPage {
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}

/// Filter and page selection of the full notifications list, plus the
/// row intents.
#[derive(Debug, Clone, PartialEq)]
pub struct ListState {
    filter: ListFilter,
    page: u32,
    per_page: u32,
}

impl Default for ListState {
    fn default() -> Self {
        Self::new(DEFAULT_PER_PAGE)
    }
}

impl ListState {
    pub fn new(per_page: u32) -> Self {
        Self {
            filter: ListFilter::All,
            page: 1,
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn filter(&self) -> ListFilter {
        self.filter
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    /// Changing the filter starts over at page 1.
    pub fn set_filter(&mut self, filter: ListFilter) {
        if self.filter != filter {
            self.filter = filter;
            self.page = 1;
        }
    }

    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    pub fn set_per_page(&mut self, per_page: u32) {
        self.per_page = per_page.clamp(1, MAX_PER_PAGE);
        self.page = 1;
    }

    pub fn next_page(&mut self) {
        self.page = self.page.saturating_add(1);
    }

    pub fn prev_page(&mut self) {
        self.page = self.page.saturating_sub(1).max(1);
    }

    pub fn project(&self, state: &NotificationState, now: DateTime<Utc>, lang: &str) -> ListPage {
        let matching: Vec<&NotificationRecord> = state
            .notifications()
            .iter()
            .filter(|r| self.filter.matches(r))
            .collect();

        let total = matching.len();
        let total_pages = total.div_ceil(self.per_page as usize) as u32;
        let offset = (self.page as usize - 1) * self.per_page as usize;

        let items: Vec<NotificationItem> = matching
            .into_iter()
            .skip(offset)
            .take(self.per_page as usize)
            .map(|r| NotificationItem::project(r, now, lang))
            .collect();

        ListPage {
            empty_label: items.is_empty().then(|| i18n::t_in(lang, "list.empty")),
            items,
            filter: self.filter,
            total,
            page: self.page,
            per_page: self.per_page,
            total_pages,
        }
    }

    /// Mark the clicked row read and return where it navigates.
    pub async fn click(&self, center: &NotificationCenter, id: &str) -> Option<String> {
        let target = center
            .store()
            .snapshot()
            .get(id)
            .and_then(|r| r.action_url.clone());
        center.mark_as_read(id).await;
        target
    }

    pub async fn delete(&self, center: &NotificationCenter, id: &str) {
        center.delete_notification(id).await;
    }

    pub async fn mark_all(&self, center: &NotificationCenter) {
        center.mark_all_as_read().await;
    }
}
