use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ConnectionError;
use crate::services::protocol::ServerFrame;
use crate::services::transport::{Channel, Connector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens notification sockets over WebSocket.
///
/// The bearer credential goes into the `Authorization` header of the upgrade
/// request. A connection counts as established only once the server sent its
/// `connected` frame.
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

fn map_handshake_error(err: WsError) -> ConnectionError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                ConnectionError::AuthRejected(format!("server answered {}", status))
            } else {
                ConnectionError::Refused(format!("server answered {}", status))
            }
        }
        other => ConnectionError::Refused(other.to_string()),
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, credential: &str) -> Result<Box<dyn Channel>, ConnectionError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::Refused(format!("invalid socket url: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential))
            .map_err(|_| ConnectionError::AuthRejected("credential is not a valid header value".into()))?;
        request.headers_mut().insert(header::AUTHORIZATION, bearer);

        tracing::debug!("Opening notification socket to {}", self.url);
        let (mut stream, _) = connect_async(request).await.map_err(map_handshake_error)?;

        // Frames that arrive ahead of the acknowledgement are replayed once
        // the channel is handed over.
        let mut early = VecDeque::new();
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match ServerFrame::parse(text.as_str()) {
                    Ok(ServerFrame::Connected(_)) => break,
                    Ok(ServerFrame::Error(payload)) if payload.is_unauthorized() => {
                        let _ = stream.close(None).await;
                        return Err(ConnectionError::AuthRejected(payload.message));
                    }
                    Ok(ServerFrame::Error(payload)) => {
                        let _ = stream.close(None).await;
                        return Err(ConnectionError::Refused(format!(
                            "{}: {}",
                            payload.code, payload.message
                        )));
                    }
                    Ok(_) => early.push_back(text.as_str().to_owned()),
                    Err(e) => tracing::warn!("Ignoring frame before acknowledgement: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .unwrap_or_else(|| "closed before acknowledgement".to_string());
                    return Err(ConnectionError::Refused(reason));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ConnectionError::Refused(e.to_string())),
                None => {
                    return Err(ConnectionError::Refused(
                        "closed before acknowledgement".to_string(),
                    ))
                }
            }
        }

        Ok(Box::new(WebSocketChannel { stream, early }))
    }
}

pub struct WebSocketChannel {
    stream: WsStream,
    early: VecDeque<String>,
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        if let Some(text) = self.early.pop_front() {
            return Some(Ok(text));
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Close(_))) | None => return None,
                // Ping is handled automatically by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(ConnectionError::Dropped(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectionError::Dropped(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("Socket close handshake failed: {}", e);
        }
    }
}
