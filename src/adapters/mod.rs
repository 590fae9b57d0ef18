//! Read projections over the store and delivery policy, one per UI consumer.
//!
//! Adapters keep only UI-local state (open/closed, filter, page, toast
//! queue). Everything else is recomputed from a `NotificationState`.

pub mod badge;
pub mod dropdown;
pub mod list;
pub mod toast;

pub use badge::BadgeView;
pub use dropdown::{DropdownState, DropdownView};
pub use list::{ListFilter, ListPage, ListState};
pub use toast::{Toast, ToastStack, ToastUpdate};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{NotificationPriority, NotificationRecord, NotificationType};
use crate::i18n;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypePresentation {
    pub icon: &'static str,
    pub label_key: &'static str,
}

pub fn presentation(kind: NotificationType) -> TypePresentation {
    let (icon, label_key) = match kind {
        NotificationType::BookingConfirmation => ("calendar-check", "type.booking_confirmation"),
        NotificationType::BookingReminder => ("alarm-clock", "type.booking_reminder"),
        NotificationType::BookingCancellation => ("calendar-x", "type.booking_cancellation"),
        NotificationType::PaymentSuccess => ("credit-card", "type.payment_success"),
        NotificationType::PaymentFailed => ("alert-octagon", "type.payment_failed"),
        NotificationType::SubscriptionRenewal => ("refresh-cw", "type.subscription_renewal"),
        NotificationType::SubscriptionCancelled => ("slash", "type.subscription_cancelled"),
        NotificationType::SystemAlert => ("alert-triangle", "type.system_alert"),
        NotificationType::ServiceUpdate => ("info", "type.service_update"),
        NotificationType::StaffAssignment => ("user-check", "type.staff_assignment"),
        NotificationType::UserMessage => ("message-circle", "type.user_message"),
        NotificationType::RewardEarned => ("gift", "type.reward_earned"),
        NotificationType::RewardRedeemed => ("award", "type.reward_redeemed"),
    };
    TypePresentation { icon, label_key }
}

pub fn priority_label(priority: NotificationPriority, lang: &str) -> String {
    i18n::t_in(lang, &format!("priority.{}", priority.as_str()))
}

/// "just now", "5m ago", "3h ago", "2d ago". Timestamps from the future
/// (clock skew) read as "just now".
pub fn relative_time(created_at: DateTime<Utc>, now: DateTime<Utc>, lang: &str) -> String {
    let secs = (now - created_at).num_seconds();
    if secs < 60 {
        return i18n::t_in(lang, "time.just_now");
    }
    let (key, n) = if secs < 60 * 60 {
        ("time.minutes_ago", secs / 60)
    } else if secs < 24 * 60 * 60 {
        ("time.hours_ago", secs / 3600)
    } else {
        ("time.days_ago", secs / 86_400)
    };
    i18n::tr(Some(lang), key, Some(&[("n", &n.to_string())]))
}

/// One notification as rendered in the dropdown, list or toast stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub id: String,
    pub icon: &'static str,
    pub type_label: String,
    pub priority: NotificationPriority,
    pub priority_label: String,
    pub title: String,
    pub message: String,
    pub relative_time: String,
    pub is_read: bool,
    pub action_url: Option<String>,
}

impl NotificationItem {
    pub fn project(record: &NotificationRecord, now: DateTime<Utc>, lang: &str) -> Self {
        let presentation = presentation(record.notification_type);
        Self {
            id: record.id.clone(),
            icon: presentation.icon,
            type_label: i18n::t_in(lang, presentation.label_key),
            priority: record.priority,
            priority_label: priority_label(record.priority, lang),
            title: record.title.clone(),
            message: record.message.clone(),
            relative_time: relative_time(record.created_at, now, lang),
            is_read: record.is_read,
            action_url: record.action_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    #[test]
    fn every_type_has_a_distinct_icon_and_translated_label() {
        let mut icons = HashSet::new();
        for kind in NotificationType::ALL {
            let p = presentation(kind);
            assert!(icons.insert(p.icon), "duplicate icon {}", p.icon);
            assert_ne!(i18n::t(p.label_key), p.label_key);
        }
    }

    #[test]
    fn relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(relative_time(now + Duration::seconds(30), now, "en"), "just now");
        assert_eq!(relative_time(now - Duration::seconds(59), now, "en"), "just now");
        assert_eq!(relative_time(now - Duration::minutes(5), now, "en"), "5m ago");
        assert_eq!(relative_time(now - Duration::hours(3), now, "en"), "3h ago");
        assert_eq!(relative_time(now - Duration::days(2), now, "en"), "2d ago");
        assert_eq!(relative_time(now - Duration::minutes(5), now, "es"), "hace 5 min");
    }

    #[test]
    fn item_projection_carries_record_fields() {
        let record = crate::testing::unread("n1");
        let item = NotificationItem::project(&record, record.created_at, "en");
        assert_eq!(item.id, "n1");
        assert_eq!(item.icon, "message-circle");
        assert_eq!(item.type_label, "New message");
        assert_eq!(item.priority_label, "Medium");
        assert_eq!(item.action_url, record.action_url);
        assert!(!item.is_read);

        let spanish = NotificationItem::project(&record, record.created_at, "es");
        assert_eq!(spanish.type_label, "Nuevo mensaje");
        assert_eq!(spanish.priority_label, "Media");
        assert_eq!(spanish.relative_time, "ahora mismo");
    }
}
