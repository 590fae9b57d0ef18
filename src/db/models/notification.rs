use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    BookingConfirmation,
    BookingReminder,
    BookingCancellation,
    PaymentSuccess,
    PaymentFailed,
    SubscriptionRenewal,
    SubscriptionCancelled,
    SystemAlert,
    ServiceUpdate,
    StaffAssignment,
    UserMessage,
    RewardEarned,
    RewardRedeemed,
}

impl NotificationType {
    pub const ALL: [NotificationType; 13] = [
        NotificationType::BookingConfirmation,
        NotificationType::BookingReminder,
        NotificationType::BookingCancellation,
        NotificationType::PaymentSuccess,
        NotificationType::PaymentFailed,
        NotificationType::SubscriptionRenewal,
        NotificationType::SubscriptionCancelled,
        NotificationType::SystemAlert,
        NotificationType::ServiceUpdate,
        NotificationType::StaffAssignment,
        NotificationType::UserMessage,
        NotificationType::RewardEarned,
        NotificationType::RewardRedeemed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::BookingConfirmation => "booking_confirmation",
            NotificationType::BookingReminder => "booking_reminder",
            NotificationType::BookingCancellation => "booking_cancellation",
            NotificationType::PaymentSuccess => "payment_success",
            NotificationType::PaymentFailed => "payment_failed",
            NotificationType::SubscriptionRenewal => "subscription_renewal",
            NotificationType::SubscriptionCancelled => "subscription_cancelled",
            NotificationType::SystemAlert => "system_alert",
            NotificationType::ServiceUpdate => "service_update",
            NotificationType::StaffAssignment => "staff_assignment",
            NotificationType::UserMessage => "user_message",
            NotificationType::RewardEarned => "reward_earned",
            NotificationType::RewardRedeemed => "reward_redeemed",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize wire spellings (`BOOKING_CONFIRMATION`, `booking-confirmation`,
/// `bookingConfirmation`) into the snake_case form used by `as_str`.
fn normalize_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for ch in raw.trim().chars() {
        if ch == '-' || ch == ' ' || ch == '_' {
            out.push('_');
            prev_lower = false;
        } else if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

impl FromStr for NotificationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = normalize_tag(s);
        let kind = match tag.as_str() {
            "booking_confirmation" | "booking_confirmed" => NotificationType::BookingConfirmation,
            "booking_reminder" => NotificationType::BookingReminder,
            "booking_cancellation" | "booking_cancelled" => NotificationType::BookingCancellation,
            "payment_success" | "payment_succeeded" => NotificationType::PaymentSuccess,
            "payment_failed" | "payment_failure" => NotificationType::PaymentFailed,
            "subscription_renewal" | "subscription_renewed" => {
                NotificationType::SubscriptionRenewal
            }
            "subscription_cancelled" | "subscription_cancellation" => {
                NotificationType::SubscriptionCancelled
            }
            "system_alert" => NotificationType::SystemAlert,
            "service_update" => NotificationType::ServiceUpdate,
            "staff_assignment" | "staff_assigned" => NotificationType::StaffAssignment,
            "user_message" | "message" => NotificationType::UserMessage,
            "reward_earned" => NotificationType::RewardEarned,
            "reward_redeemed" => NotificationType::RewardRedeemed,
            _ => {
                return Err(AppError::MalformedPayload(format!(
                    "unknown notification type '{}'",
                    s
                )))
            }
        };
        Ok(kind)
    }
}

/// Totally ordered urgency; filters read as "this level and above".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl NotificationPriority {
    pub const ALL: [NotificationPriority; 4] = [
        NotificationPriority::Low,
        NotificationPriority::Medium,
        NotificationPriority::High,
        NotificationPriority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Medium => "medium",
            NotificationPriority::High => "high",
            NotificationPriority::Urgent => "urgent",
        }
    }
}

impl Default for NotificationPriority {
    fn default() -> Self {
        NotificationPriority::Medium
    }
}

impl FromStr for NotificationPriority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_tag(s).as_str() {
            "low" => Ok(NotificationPriority::Low),
            "medium" | "normal" => Ok(NotificationPriority::Medium),
            "high" => Ok(NotificationPriority::High),
            "urgent" | "critical" => Ok(NotificationPriority::Urgent),
            _ => Err(AppError::MalformedPayload(format!(
                "unknown notification priority '{}'",
                s
            ))),
        }
    }
}

/// A notification as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Loose shape of an inbound notification payload.
///
/// Accepts both camelCase (socket/GraphQL) and snake_case (REST) keys; every
/// field is optional here so validation can report what is actually wrong.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotificationPayload {
    #[serde(default, alias = "_id")]
    id: Option<serde_json::Value>,
    #[serde(default, rename = "type", alias = "notificationType", alias = "notification_type")]
    kind: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "body")]
    message: Option<String>,
    #[serde(default, alias = "created_at")]
    created_at: Option<serde_json::Value>,
    #[serde(default, alias = "is_read", alias = "read")]
    is_read: Option<bool>,
    #[serde(default, alias = "action_url", alias = "link")]
    action_url: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

fn parse_id(value: Option<serde_json::Value>) -> AppResult<String> {
    let id = match value {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(AppError::MalformedPayload(format!(
                "notification id must be a string or number, got {}",
                other
            )))
        }
        None => String::new(),
    };
    if id.is_empty() {
        return Err(AppError::MalformedPayload(
            "notification id is missing".to_string(),
        ));
    }
    Ok(id)
}

fn parse_timestamp(value: Option<serde_json::Value>) -> AppResult<DateTime<Utc>> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(Utc::now()),
        Some(serde_json::Value::String(s)) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(&s) {
                return Ok(ts.with_timezone(&Utc));
            }
            // GraphQL scalars sometimes serialize epoch millis as strings
            s.parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .ok_or_else(|| AppError::MalformedPayload(format!("invalid createdAt '{}'", s)))
        }
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| AppError::MalformedPayload(format!("invalid createdAt {}", n))),
        Some(other) => Err(AppError::MalformedPayload(format!(
            "invalid createdAt {}",
            other
        ))),
    }
}

impl NotificationRecord {
    /// Validate and normalize an inbound payload into a record.
    ///
    /// Missing `priority` defaults to medium, missing `createdAt` to now and
    /// missing `isRead` to unread. Anything else that is missing or
    /// unrecognized rejects the payload.
    pub fn from_payload(value: &serde_json::Value) -> AppResult<Self> {
        if !value.is_object() {
            return Err(AppError::MalformedPayload(
                "notification payload must be an object".to_string(),
            ));
        }

        let raw: RawNotificationPayload = serde_json::from_value(value.clone())
            .map_err(|e| AppError::MalformedPayload(e.to_string()))?;

        let id = parse_id(raw.id)?;

        let notification_type = raw
            .kind
            .as_deref()
            .ok_or_else(|| {
                AppError::MalformedPayload(format!("notification {} has no type", id))
            })?
            .parse::<NotificationType>()?;

        let priority = match raw.priority.as_deref() {
            Some(p) => p.parse::<NotificationPriority>()?,
            None => NotificationPriority::default(),
        };

        let title = raw.title.map(|t| t.trim().to_string()).unwrap_or_default();
        if title.is_empty() {
            return Err(AppError::MalformedPayload(format!(
                "notification {} has an empty title",
                id
            )));
        }

        Ok(NotificationRecord {
            id,
            notification_type,
            priority,
            title,
            message: raw.message.unwrap_or_default(),
            created_at: parse_timestamp(raw.created_at)?,
            is_read: raw.is_read.unwrap_or(false),
            action_url: raw.action_url.filter(|u| !u.trim().is_empty()),
            metadata: raw.metadata.filter(|m| !m.is_null()),
        })
    }
}
