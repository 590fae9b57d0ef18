use serde::Serialize;

use crate::i18n;
use crate::services::store::NotificationState;
use crate::services::transport::ConnectionStatus;

/// Largest count shown verbatim; anything above renders as `"99+"`.
pub const BADGE_CAP: usize = 99;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeView {
    pub unread_count: usize,
    /// `None` hides the badge.
    pub label: Option<String>,
    pub connection_status: ConnectionStatus,
    pub status_label: String,
}

pub fn badge_label(count: usize) -> Option<String> {
    match count {
        0 => None,
        n if n > BADGE_CAP => Some(format!("{}+", BADGE_CAP)),
        n => Some(n.to_string()),
    }
}

pub fn status_label(status: ConnectionStatus, lang: &str) -> String {
    let key = match status {
        ConnectionStatus::Connected => "connection.connected",
        ConnectionStatus::Connecting => "connection.connecting",
        ConnectionStatus::Disconnected => "connection.disconnected",
    };
    i18n::t_in(lang, key)
}

impl BadgeView {
    pub fn project(state: &NotificationState, status: ConnectionStatus, lang: &str) -> Self {
        Self {
            unread_count: state.unread_count(),
            label: badge_label(state.unread_count()),
            connection_status: status,
            status_label: status_label(status, lang),
        }
    }
}
