use serde::Serialize;

/// Failures of the notification socket.
///
/// Clonable so a single failure can be fanned out to every `on_error`
/// listener and kept in the session state at the same time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Connection dropped: {0}")]
    Dropped(String),

    #[error("Timed out waiting for the server to acknowledge the connection")]
    Timeout,

    #[error("Gave up reconnecting after {attempts} attempt(s)")]
    RetriesExhausted { attempts: u32 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("No credential available for the connection")]
    MissingCredential,
}

impl ConnectionError {
    /// Whether another connection attempt with the same credential can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectionError::AuthRejected(_)
                | ConnectionError::Cancelled
                | ConnectionError::MissingCredential
                | ConnectionError::RetriesExhausted { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Transport error: {0}")]
    Transport(#[from] ConnectionError),

    #[error("Backend rejected the request: {0}")]
    Backend(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code, mirrored into [`CoreError`].
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Transport(ConnectionError::AuthRejected(_)) => "AUTH_REJECTED",
            AppError::Transport(ConnectionError::RetriesExhausted { .. }) => "RECONNECT_EXHAUSTED",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::Backend(_) => "BACKEND_REJECTED",
            AppError::Request(_) => "BACKEND_UNREACHABLE",
            AppError::Database(_) => "STORAGE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Transport(e) => e.is_retryable(),
            AppError::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AppError::Backend(_) | AppError::Database(_) => true,
            _ => false,
        }
    }

    /// Message safe to render in the UI; internals are logged instead.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Transport(e) => e.to_string(),
            AppError::Backend(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::MalformedPayload(msg) => msg.clone(),
            AppError::Request(e) => {
                tracing::error!("HTTP request error: {:?}", e);
                crate::i18n::t("errors.backend_unreachable")
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                crate::i18n::t("errors.storage")
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {:?}", e);
                crate::i18n::t("errors.internal")
            }
            AppError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                crate::i18n::t("errors.internal")
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                crate::i18n::t("errors.internal")
            }
        }
    }
}

/// Error as exposed to presentation collaborators through the core snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreError {
    pub code: String,
    pub message: String,
    /// Whether repeating the failed action unchanged may succeed.
    pub retryable: bool,
}

impl From<&AppError> for CoreError {
    fn from(error: &AppError) -> Self {
        CoreError {
            code: error.code().to_string(),
            message: error.user_message(),
            retryable: error.is_retryable(),
        }
    }
}

impl From<&ConnectionError> for CoreError {
    fn from(error: &ConnectionError) -> Self {
        CoreError::from(&AppError::Transport(error.clone()))
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(error: crate::config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_is_not_retryable() {
        let err = AppError::from(ConnectionError::AuthRejected("bad token".into()));
        assert_eq!(err.code(), "AUTH_REJECTED");
        assert!(!err.is_retryable());
    }

    #[test]
    fn dropped_connection_is_retryable() {
        assert!(ConnectionError::Dropped("reset".into()).is_retryable());
        assert!(ConnectionError::Timeout.is_retryable());
        assert!(!ConnectionError::RetriesExhausted { attempts: 5 }.is_retryable());
    }

    #[test]
    fn core_error_keeps_backend_message() {
        let core = CoreError::from(&AppError::Backend("notification locked".into()));
        assert_eq!(core.code, "BACKEND_REJECTED");
        assert_eq!(core.message, "notification locked");
        assert!(core.retryable);
    }

    #[test]
    fn exhausted_reconnect_is_not_retryable_for_the_ui() {
        let core = CoreError::from(&ConnectionError::RetriesExhausted { attempts: 5 });
        assert_eq!(core.code, "RECONNECT_EXHAUSTED");
        assert!(!core.retryable);
    }

    #[test]
    fn config_error_maps_to_config_code() {
        let err = AppError::from(crate::config::ConfigError::InvalidValue(
            "RECONNECT_JITTER".into(),
        ));
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid value for environment variable: RECONNECT_JITTER"
        );
    }
}
