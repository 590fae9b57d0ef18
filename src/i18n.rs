/*
Simple i18n helper for the notification core.

This module provides:
- A tiny embedded translations store for EN/ES (compile-time embedded JSON).
- A simple `tr` function to lookup translations by key + optional params.
- A `t` convenience wrapper using the default language (DEFAULT_LANG).

Usage:
    use crate::i18n;
    let label = i18n::t("type.booking_confirmation");
    let ago = i18n::t_with("time.minutes_ago", &[("n", "5")]);

Notes:
- Placeholders in translation strings use single-brace format: `{name}`.
- Default language is `en`. If a key is missing for the requested language,
  the fallback language will be used.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_LANG: &str = "en";

static TRANSLATIONS: OnceLock<HashMap<String, HashMap<String, String>>> = OnceLock::new();

const EN_JSON: &str = r#"
{
  "type.booking_confirmation": "Booking confirmed",
  "type.booking_reminder": "Booking reminder",
  "type.booking_cancellation": "Booking cancelled",
  "type.payment_success": "Payment received",
  "type.payment_failed": "Payment failed",
  "type.subscription_renewal": "Subscription renewed",
  "type.subscription_cancelled": "Subscription cancelled",
  "type.system_alert": "System alert",
  "type.service_update": "Service update",
  "type.staff_assignment": "Staff assigned",
  "type.user_message": "New message",
  "type.reward_earned": "Reward earned",
  "type.reward_redeemed": "Reward redeemed",
  "priority.low": "Low",
  "priority.medium": "Medium",
  "priority.high": "High",
  "priority.urgent": "Urgent",
  "time.just_now": "just now",
  "time.minutes_ago": "{n}m ago",
  "time.hours_ago": "{n}h ago",
  "time.days_ago": "{n}d ago",
  "connection.connected": "Live",
  "connection.connecting": "Connecting…",
  "connection.disconnected": "Offline",
  "dropdown.title": "Notifications",
  "dropdown.empty": "You're all caught up",
  "dropdown.mark_all": "Mark all as read",
  "dropdown.reconnect": "Reconnect",
  "dropdown.view_all": "View all notifications",
  "list.empty": "No notifications match this filter",
  "validation.toast_duration": "Toast duration must be between {min} and {max} ms",
  "validation.max_toasts": "Visible toast count must be between {min} and {max}",
  "validation.language": "Unsupported language '{lang}'",
  "errors.backend_unreachable": "Could not reach the notification service. Please try again.",
  "errors.storage": "Could not save your notification preferences",
  "errors.internal": "Something went wrong with notifications",
  "app.name": "Home Services Notifications"
}
"#;

const ES_JSON: &str = r#"
{
  "type.booking_confirmation": "Reserva confirmada",
  "type.booking_reminder": "Recordatorio de reserva",
  "type.booking_cancellation": "Reserva cancelada",
  "type.payment_success": "Pago recibido",
  "type.payment_failed": "Pago fallido",
  "type.subscription_renewal": "Suscripción renovada",
  "type.subscription_cancelled": "Suscripción cancelada",
  "type.system_alert": "Alerta del sistema",
  "type.service_update": "Actualización del servicio",
  "type.staff_assignment": "Personal asignado",
  "type.user_message": "Nuevo mensaje",
  "type.reward_earned": "Recompensa obtenida",
  "type.reward_redeemed": "Recompensa canjeada",
  "priority.low": "Baja",
  "priority.medium": "Media",
  "priority.high": "Alta",
  "priority.urgent": "Urgente",
  "time.just_now": "ahora mismo",
  "time.minutes_ago": "hace {n} min",
  "time.hours_ago": "hace {n} h",
  "time.days_ago": "hace {n} d",
  "connection.connected": "En vivo",
  "connection.connecting": "Conectando…",
  "connection.disconnected": "Sin conexión",
  "dropdown.title": "Notificaciones",
  "dropdown.empty": "Estás al día",
  "dropdown.mark_all": "Marcar todo como leído",
  "dropdown.reconnect": "Reconectar",
  "dropdown.view_all": "Ver todas las notificaciones",
  "list.empty": "Ninguna notificación coincide con este filtro",
  "validation.toast_duration": "La duración debe estar entre {min} y {max} ms",
  "validation.max_toasts": "El número de avisos visibles debe estar entre {min} y {max}",
  "validation.language": "Idioma no soportado '{lang}'",
  "errors.backend_unreachable": "No se pudo contactar el servicio de notificaciones. Inténtalo de nuevo.",
  "errors.storage": "No se pudieron guardar tus preferencias de notificación",
  "errors.internal": "Algo salió mal con las notificaciones",
  "app.name": "Notificaciones de Servicios del Hogar"
}
"#;

/// Initialize translations map (lazy).
fn build_translations() -> HashMap<String, HashMap<String, String>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();

    let en_map: HashMap<String, String> = serde_json::from_str(EN_JSON).unwrap_or_else(|e| {
        panic!("failed to parse EN_JSON in i18n module: {}", e);
    });
    out.insert("en".to_string(), en_map);

    let es_map: HashMap<String, String> = serde_json::from_str(ES_JSON).unwrap_or_else(|e| {
        panic!("failed to parse ES_JSON in i18n module: {}", e);
    });
    out.insert("es".to_string(), es_map);

    out
}

/// Returns the global translations map (lang -> (key -> message)).
fn translations() -> &'static HashMap<String, HashMap<String, String>> {
    TRANSLATIONS.get_or_init(build_translations)
}

/// Normalize a language tag into a short, lowercase code (e.g. "en-US" -> "en").
pub fn normalize_language(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).to_lowercase()
}

/// Returns true if the given language code has a translation table.
pub fn is_supported_language(lang: &str) -> bool {
    translations().contains_key(lang)
}

/// Translate a key using an explicit language (or default if None).
///
/// Placeholders use single braces (`{name}`). Missing keys fall back to the
/// default language, then to the key itself.
pub fn tr(lang: Option<&str>, key: &str, params: Option<&[(&str, &str)]>) -> String {
    let map = translations();

    let desired = lang.unwrap_or(DEFAULT_LANG);

    let val = map
        .get(desired)
        .and_then(|m| m.get(key))
        .cloned()
        .or_else(|| map.get(DEFAULT_LANG).and_then(|m| m.get(key)).cloned())
        .unwrap_or_else(|| key.to_string());

    if let Some(params) = params {
        let mut s = val;
        for (k, v) in params {
            s = s.replace(&format!("{{{}}}", k), v);
        }
        s
    } else {
        val
    }
}

/// Convenience wrapper: translate using default language (DEFAULT_LANG).
pub fn t(key: &str) -> String {
    tr(None, key, None)
}

/// Convenience wrapper with params (default language).
pub fn t_with(key: &str, params: &[(&str, &str)]) -> String {
    tr(None, key, Some(params))
}

/// Translate into `lang`.
pub fn t_in(lang: &str, key: &str) -> String {
    tr(Some(lang), key, None)
}
