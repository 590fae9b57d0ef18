use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::notification::{NotificationPriority, NotificationRecord, NotificationType};
use crate::error::{AppError, AppResult};
use crate::i18n;

pub const TOAST_DURATION_MIN_MS: u64 = 1_000;
pub const TOAST_DURATION_MAX_MS: u64 = 30_000;
pub const MAX_TOASTS_MIN: usize = 1;
pub const MAX_TOASTS_MAX: usize = 10;

/// User-configurable delivery policy, persisted as JSON in client storage.
///
/// Unknown or missing fields fall back to their defaults on load, so older
/// stored blobs keep working after a field is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryPreferences {
    pub enable_real_time: bool,
    pub enable_toasts: bool,
    pub toast_duration_ms: u64,
    pub max_toasts_shown: usize,
    pub minimum_priority: NotificationPriority,
    /// Per-type switch; a type missing from the map counts as enabled.
    pub enabled_types: BTreeMap<NotificationType, bool>,
    /// Short language code used by every adapter label.
    pub language: String,
}

impl Default for DeliveryPreferences {
    fn default() -> Self {
        Self {
            enable_real_time: true,
            enable_toasts: true,
            toast_duration_ms: 5_000,
            max_toasts_shown: 3,
            minimum_priority: NotificationPriority::Low,
            enabled_types: NotificationType::ALL
                .iter()
                .map(|kind| (*kind, true))
                .collect(),
            language: i18n::DEFAULT_LANG.to_string(),
        }
    }
}

/// Partial change merged into the current preferences by the policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeliveryPreferences {
    pub enable_real_time: Option<bool>,
    pub enable_toasts: Option<bool>,
    pub toast_duration_ms: Option<u64>,
    pub max_toasts_shown: Option<usize>,
    pub minimum_priority: Option<NotificationPriority>,
    /// Only the listed types change; others keep their current setting.
    pub enabled_types: Option<BTreeMap<NotificationType, bool>>,
    /// Language tag such as `es` or `es-MX`.
    pub language: Option<String>,
}

impl DeliveryPreferences {
    pub fn is_type_enabled(&self, kind: NotificationType) -> bool {
        self.enabled_types.get(&kind).copied().unwrap_or(true)
    }

    /// Whether `record` should pop up as a transient toast.
    pub fn should_toast(&self, record: &NotificationRecord) -> bool {
        self.enable_toasts
            && self.is_type_enabled(record.notification_type)
            && record.priority >= self.minimum_priority
    }

    /// Clamp numeric fields into their allowed ranges.
    ///
    /// Used on values read back from storage, which may have been written by
    /// an older client or edited by hand.
    pub fn sanitized(mut self) -> Self {
        self.toast_duration_ms = self
            .toast_duration_ms
            .clamp(TOAST_DURATION_MIN_MS, TOAST_DURATION_MAX_MS);
        self.max_toasts_shown = self.max_toasts_shown.clamp(MAX_TOASTS_MIN, MAX_TOASTS_MAX);
        let lang = i18n::normalize_language(&self.language);
        self.language = if i18n::is_supported_language(&lang) {
            lang
        } else {
            i18n::DEFAULT_LANG.to_string()
        };
        self
    }

    /// Apply a partial update, rejecting out-of-range values without
    /// touching `self`.
    pub fn merged(&self, update: &UpdateDeliveryPreferences) -> AppResult<Self> {
        update.validate()?;

        let mut next = self.clone();
        if let Some(v) = update.enable_real_time {
            next.enable_real_time = v;
        }
        if let Some(v) = update.enable_toasts {
            next.enable_toasts = v;
        }
        if let Some(v) = update.toast_duration_ms {
            next.toast_duration_ms = v;
        }
        if let Some(v) = update.max_toasts_shown {
            next.max_toasts_shown = v;
        }
        if let Some(v) = update.minimum_priority {
            next.minimum_priority = v;
        }
        if let Some(ref types) = update.enabled_types {
            for (kind, enabled) in types {
                next.enabled_types.insert(*kind, *enabled);
            }
        }
        if let Some(ref lang) = update.language {
            next.language = i18n::normalize_language(lang);
        }
        Ok(next)
    }
}

impl UpdateDeliveryPreferences {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(ms) = self.toast_duration_ms {
            if !(TOAST_DURATION_MIN_MS..=TOAST_DURATION_MAX_MS).contains(&ms) {
                return Err(AppError::Validation(crate::i18n::t_with(
                    "validation.toast_duration",
                    &[
                        ("min", &TOAST_DURATION_MIN_MS.to_string()),
                        ("max", &TOAST_DURATION_MAX_MS.to_string()),
                    ],
                )));
            }
        }
        if let Some(count) = self.max_toasts_shown {
            if !(MAX_TOASTS_MIN..=MAX_TOASTS_MAX).contains(&count) {
                return Err(AppError::Validation(crate::i18n::t_with(
                    "validation.max_toasts",
                    &[
                        ("min", &MAX_TOASTS_MIN.to_string()),
                        ("max", &MAX_TOASTS_MAX.to_string()),
                    ],
                )));
            }
        }
        if let Some(ref lang) = self.language {
            if !i18n::is_supported_language(&i18n::normalize_language(lang)) {
                return Err(AppError::Validation(i18n::t_with(
                    "validation.language",
                    &[("lang", lang)],
                )));
            }
        }
        Ok(())
    }
}
