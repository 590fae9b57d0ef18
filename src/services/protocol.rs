//! Wire format of the notification socket.
//!
//! Every frame is a JSON text message with a `type` discriminator and a
//! feature-specific `payload`.

use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

/// Reserved message type constants.
pub mod msg_types {
    /// Server acknowledges the authenticated session.
    pub const CONNECTED: &str = "connected";
    /// A new notification for the current user.
    pub const NEW_NOTIFICATION: &str = "new_notification";
    /// A notification was read from another session.
    pub const NOTIFICATION_READ: &str = "notification_read";
    /// Server-side error report.
    pub const ERROR: &str = "error";
    /// Client heartbeat request.
    pub const PING: &str = "ping";
    /// Server heartbeat response.
    pub const PONG: &str = "pong";
    /// Client pushes a refreshed credential.
    pub const AUTHENTICATE: &str = "authenticate";
}

/// Error code the server uses when it refuses the credential.
pub const UNAUTHORIZED_CODE: &str = "unauthorized";

/// Generic message envelope, both directions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn empty(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadPayload {
    pub id: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthenticatePayload {
    pub token: String,
}

/// Decoded server -> client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Connected(serde_json::Value),
    /// Raw notification payload; validated by the ingestion boundary.
    Notification(serde_json::Value),
    NotificationRead { id: String },
    Error(ErrorPayload),
    Pong,
    Unknown(String),
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, ConnectionError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ConnectionError::Protocol(format!("invalid frame: {}", e)))?;

        let frame = match envelope.msg_type.as_str() {
            msg_types::CONNECTED => ServerFrame::Connected(envelope.payload),
            msg_types::NEW_NOTIFICATION => ServerFrame::Notification(envelope.payload),
            msg_types::NOTIFICATION_READ => {
                let id = match envelope.payload {
                    serde_json::Value::String(s) => s,
                    other => {
                        let read: ReadPayload = serde_json::from_value(other).map_err(|e| {
                            ConnectionError::Protocol(format!("invalid read payload: {}", e))
                        })?;
                        match read.id {
                            serde_json::Value::String(s) => s,
                            serde_json::Value::Number(n) => n.to_string(),
                            _ => {
                                return Err(ConnectionError::Protocol(
                                    "read payload id must be a string or number".to_string(),
                                ))
                            }
                        }
                    }
                };
                let id = id.trim();
                if id.is_empty() {
                    return Err(ConnectionError::Protocol(
                        "read payload has an empty id".to_string(),
                    ));
                }
                ServerFrame::NotificationRead { id: id.to_string() }
            }
            msg_types::ERROR => ServerFrame::Error(
                serde_json::from_value(envelope.payload).unwrap_or(ErrorPayload {
                    code: String::new(),
                    message: String::new(),
                }),
            ),
            msg_types::PONG => ServerFrame::Pong,
            other => ServerFrame::Unknown(other.to_string()),
        };
        Ok(frame)
    }
}

impl ErrorPayload {
    pub fn is_unauthorized(&self) -> bool {
        self.code.eq_ignore_ascii_case(UNAUTHORIZED_CODE)
    }
}

pub fn ping_frame() -> String {
    Envelope::empty(msg_types::PING).to_text()
}

pub fn authenticate_frame(token: &str) -> String {
    Envelope::new(
        msg_types::AUTHENTICATE,
        AuthenticatePayload {
            token: token.to_string(),
        },
    )
    .to_text()
}
