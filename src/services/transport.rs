//! Notification socket connection manager.
//!
//! One `TransportConnection` owns at most one live session. A session is a
//! spawned task running an explicit state machine:
//!
//! ```text
//! disconnected --connect()--> connecting --ack--> connected
//! connected --drop--> connecting (backoff timer) --ack--> connected (on_reconnect)
//! connecting --retries exhausted / auth refused--> disconnected (on_error)
//! connected|connecting --disconnect()--> disconnected
//! ```
//!
//! Listeners are invoked from the session task behind a generation gate:
//! `disconnect()` bumps the generation under the write lock, so once it
//! returns no listener can observe an event from the torn-down session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::db::NotificationRecord;
use crate::error::{AppResult, ConnectionError};
use crate::services::protocol::{self, ServerFrame};
use crate::services::reconnect::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    ClientRequested,
    /// The connection was lost; an automatic reconnect follows.
    Dropped(String),
    /// The server revoked the credential mid-session; no reconnect follows.
    AuthRevoked(String),
}

/// One established, acknowledged connection to the notification server.
#[async_trait]
pub trait Channel: Send + 'static {
    /// Next text frame; `None` once the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>>;
    async fn send(&mut self, text: String) -> Result<(), ConnectionError>;
    async fn close(&mut self);
}

/// Opens channels. Implementations resolve only after the server's logical
/// acknowledgement, not just the network handshake.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, credential: &str) -> Result<Box<dyn Channel>, ConnectionError>;
}

pub type ListenerId = u64;

#[derive(Clone)]
enum Listener {
    Notification(Arc<dyn Fn(&NotificationRecord) + Send + Sync>),
    NotificationRead(Arc<dyn Fn(&str) + Send + Sync>),
    Connect(Arc<dyn Fn() + Send + Sync>),
    Disconnect(Arc<dyn Fn(&DisconnectReason) + Send + Sync>),
    Error(Arc<dyn Fn(&ConnectionError) + Send + Sync>),
    /// Receives the number of failed attempts it took to get back.
    Reconnect(Arc<dyn Fn(u32) + Send + Sync>),
}

enum Event<'a> {
    Notification(&'a NotificationRecord),
    NotificationRead(&'a str),
    Connect,
    Disconnect(&'a DisconnectReason),
    Error(&'a ConnectionError),
    Reconnect(u32),
}

impl Listener {
    fn call(&self, event: &Event<'_>) {
        match (self, event) {
            (Listener::Notification(f), Event::Notification(record)) => f(record),
            (Listener::NotificationRead(f), Event::NotificationRead(id)) => f(id),
            (Listener::Connect(f), Event::Connect) => f(),
            (Listener::Disconnect(f), Event::Disconnect(reason)) => f(reason),
            (Listener::Error(f), Event::Error(err)) => f(err),
            (Listener::Reconnect(f), Event::Reconnect(attempts)) => f(*attempts),
            _ => {}
        }
    }
}

enum SessionCommand {
    Authenticate(String),
    Reconnect,
}

enum SessionExit {
    Shutdown,
    Dropped(String),
    AuthRevoked(String),
    Reconnect,
}

struct Session {
    id: Uuid,
    shutdown: broadcast::Sender<()>,
    commands: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    ping_interval: Option<Duration>,
    hot_swap: bool,
    credential: RwLock<Option<String>>,
    status: watch::Sender<ConnectionStatus>,
    gate: RwLock<u64>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    last_error: Mutex<Option<ConnectionError>>,
}

impl Shared {
    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn listeners(&self) -> Vec<Listener> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }

    /// Deliver `event` unless the session that produced it is stale.
    async fn dispatch(&self, generation: u64, event: Event<'_>) {
        let gate = self.gate.read().await;
        if *gate != generation {
            return;
        }
        for listener in self.listeners() {
            listener.call(&event);
        }
        drop(gate);
    }

    /// Returns false when the session is stale and must stop.
    async fn set_status(&self, generation: u64, status: ConnectionStatus) -> bool {
        let gate = self.gate.read().await;
        if *gate != generation {
            return false;
        }
        self.status.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
        true
    }

    async fn terminate(
        &self,
        generation: u64,
        error: ConnectionError,
        ready: &mut Option<oneshot::Sender<Result<(), ConnectionError>>>,
    ) {
        tracing::error!("Notification socket gave up: {}", error);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
        if self
            .set_status(generation, ConnectionStatus::Disconnected)
            .await
        {
            self.dispatch(generation, Event::Error(&error)).await;
        }
        if let Some(tx) = ready.take() {
            let _ = tx.send(Err(error));
        }
    }
}

pub struct TransportConnection {
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl TransportConnection {
    pub fn new(
        connector: Arc<dyn Connector>,
        config: &TransportConfig,
        policy: ReconnectPolicy,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                policy,
                connect_timeout: config.connect_timeout(),
                ping_interval: config.ping_interval(),
                hot_swap: config.credential_hot_swap,
                credential: RwLock::new(None),
                status,
                gate: RwLock::new(0),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                last_error: Mutex::new(None),
            }),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Connect with `credential`, resolving once the server acknowledged the
    /// session. Retries with backoff on transient failures.
    pub async fn connect(&self, credential: impl Into<String>) -> AppResult<()> {
        *self.shared.credential.write().await = Some(credential.into());
        self.start().await
    }

    /// Connect with the most recently supplied credential.
    pub async fn connect_stored(&self) -> AppResult<()> {
        if self.shared.credential.read().await.is_none() {
            return Err(ConnectionError::MissingCredential.into());
        }
        self.start().await
    }

    async fn start(&self) -> AppResult<()> {
        let mut slot = self.session.lock().await;

        match self.status() {
            ConnectionStatus::Connected => return Ok(()),
            ConnectionStatus::Connecting if slot.is_some() => {
                drop(slot);
                return self.wait_until_settled().await;
            }
            _ => {}
        }

        if let Some(stale) = slot.take() {
            let _ = stale.shutdown.send(());
            stale.task.abort();
        }

        let generation = {
            let mut gate = self.shared.gate.write().await;
            *gate += 1;
            *gate
        };
        *self
            .shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.status.send_replace(ConnectionStatus::Connecting);

        let id = Uuid::new_v4();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (commands_tx, commands_rx) = mpsc::channel(8);

        tracing::info!("Starting notification socket session {}", id);
        let task = tokio::spawn(run_session(
            self.shared.clone(),
            generation,
            id,
            shutdown_rx,
            commands_rx,
            ready_tx,
        ));

        *slot = Some(Session {
            id,
            shutdown: shutdown_tx,
            commands: commands_tx,
            task,
        });
        drop(slot);

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ConnectionError::Cancelled.into()),
        }
    }

    async fn wait_until_settled(&self) -> AppResult<()> {
        let mut rx = self.shared.status.subscribe();
        let settled = rx
            .wait_for(|s| *s != ConnectionStatus::Connecting)
            .await
            .map(|s| *s)
            .unwrap_or(ConnectionStatus::Disconnected);

        if settled == ConnectionStatus::Connected {
            return Ok(());
        }
        let err = self
            .shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(ConnectionError::Cancelled);
        Err(err.into())
    }

    /// Tear the session down. Cancels any pending retry timer; no listener
    /// receives events from the old session after this returns.
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();

        let generation = {
            let mut gate = self.shared.gate.write().await;
            *gate += 1;
            *gate
        };
        let previous = self
            .shared
            .status
            .send_replace(ConnectionStatus::Disconnected);

        let Some(session) = session else {
            return;
        };

        tracing::info!("Closing notification socket session {}", session.id);
        let _ = session.shutdown.send(());
        let mut task = session.task;
        if tokio::time::timeout(Duration::from_secs(1), &mut task)
            .await
            .is_err()
        {
            tracing::warn!("Socket session {} did not stop in time; aborting", session.id);
            task.abort();
        }

        if previous != ConnectionStatus::Disconnected {
            self.shared
                .dispatch(
                    generation,
                    Event::Disconnect(&DisconnectReason::ClientRequested),
                )
                .await;
        }
    }

    /// Swap the bearer credential. On an open connection it is pushed over
    /// the socket (or forces a reconnect when hot-swap is disabled);
    /// otherwise the next connection attempt uses it.
    pub async fn update_credential(&self, credential: impl Into<String>) -> AppResult<()> {
        let credential = credential.into();
        *self.shared.credential.write().await = Some(credential.clone());

        let slot = self.session.lock().await;
        let Some(session) = slot.as_ref() else {
            return Ok(());
        };
        if self.status() != ConnectionStatus::Connected {
            return Ok(());
        }

        let command = if self.shared.hot_swap {
            SessionCommand::Authenticate(credential)
        } else {
            SessionCommand::Reconnect
        };
        session
            .commands
            .send(command)
            .await
            .map_err(|_| ConnectionError::Cancelled)?;
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Terminal error of the last session, if it ended with one.
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn on_notification<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&NotificationRecord) + Send + Sync + 'static,
    {
        self.shared.add_listener(Listener::Notification(Arc::new(f)))
    }

    pub fn on_notification_read<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared
            .add_listener(Listener::NotificationRead(Arc::new(f)))
    }

    pub fn on_connect<F>(&self, f: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.add_listener(Listener::Connect(Arc::new(f)))
    }

    pub fn on_disconnect<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.shared.add_listener(Listener::Disconnect(Arc::new(f)))
    }

    pub fn on_error<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        self.shared.add_listener(Listener::Error(Arc::new(f)))
    }

    pub fn on_reconnect<F>(&self, f: F) -> ListenerId
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.shared.add_listener(Listener::Reconnect(Arc::new(f)))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}

impl Drop for TransportConnection {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.session.try_lock() {
            if let Some(session) = slot.take() {
                let _ = session.shutdown.send(());
            }
        }
    }
}

async fn run_session(
    shared: Arc<Shared>,
    generation: u64,
    session_id: Uuid,
    mut shutdown: broadcast::Receiver<()>,
    mut commands: mpsc::Receiver<SessionCommand>,
    ready: oneshot::Sender<Result<(), ConnectionError>>,
) {
    let mut ready = Some(ready);
    let mut retries: u32 = 0;
    let mut failures: u32 = 0;
    let mut has_connected = false;
    let mut pending_delay: Option<Duration> = None;

    loop {
        if let Some(delay) = pending_delay.take() {
            tracing::debug!(
                "Session {}: retry {} in {}ms",
                session_id,
                retries,
                delay.as_millis()
            );
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if !shared
            .set_status(generation, ConnectionStatus::Connecting)
            .await
        {
            return;
        }

        let credential = shared.credential.read().await.clone();
        let Some(credential) = credential else {
            shared
                .terminate(generation, ConnectionError::MissingCredential, &mut ready)
                .await;
            return;
        };

        let attempt = tokio::select! {
            _ = shutdown.recv() => return,
            res = tokio::time::timeout(shared.connect_timeout, shared.connector.connect(&credential)) => {
                res.unwrap_or(Err(ConnectionError::Timeout))
            }
        };

        match attempt {
            Ok(mut channel) => {
                let recovered_after = failures;
                retries = 0;
                failures = 0;

                if !shared
                    .set_status(generation, ConnectionStatus::Connected)
                    .await
                {
                    channel.close().await;
                    return;
                }

                if has_connected {
                    tracing::info!(
                        "Session {}: reconnected after {} failed attempt(s)",
                        session_id,
                        recovered_after
                    );
                    shared
                        .dispatch(generation, Event::Reconnect(recovered_after))
                        .await;
                } else {
                    tracing::info!("Session {}: connected", session_id);
                    shared.dispatch(generation, Event::Connect).await;
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                has_connected = true;

                let exit = pump(
                    &shared,
                    generation,
                    channel.as_mut(),
                    &mut shutdown,
                    &mut commands,
                )
                .await;
                channel.close().await;

                match exit {
                    SessionExit::Shutdown => return,
                    SessionExit::AuthRevoked(message) => {
                        if shared
                            .set_status(generation, ConnectionStatus::Disconnected)
                            .await
                        {
                            shared
                                .dispatch(
                                    generation,
                                    Event::Disconnect(&DisconnectReason::AuthRevoked(
                                        message.clone(),
                                    )),
                                )
                                .await;
                        }
                        shared
                            .terminate(
                                generation,
                                ConnectionError::AuthRejected(message),
                                &mut ready,
                            )
                            .await;
                        return;
                    }
                    SessionExit::Reconnect => {
                        tracing::info!("Session {}: reconnecting with new credential", session_id);
                        if !shared
                            .set_status(generation, ConnectionStatus::Connecting)
                            .await
                        {
                            return;
                        }
                        shared
                            .dispatch(
                                generation,
                                Event::Disconnect(&DisconnectReason::Dropped(
                                    "credential changed".to_string(),
                                )),
                            )
                            .await;
                    }
                    SessionExit::Dropped(reason) => {
                        tracing::warn!("Session {}: connection lost: {}", session_id, reason);
                        if !shared
                            .set_status(generation, ConnectionStatus::Connecting)
                            .await
                        {
                            return;
                        }
                        shared
                            .dispatch(
                                generation,
                                Event::Disconnect(&DisconnectReason::Dropped(reason)),
                            )
                            .await;

                        if !shared.policy.can_retry(retries) {
                            shared
                                .terminate(
                                    generation,
                                    ConnectionError::RetriesExhausted { attempts: failures },
                                    &mut ready,
                                )
                                .await;
                            return;
                        }
                        pending_delay = Some(shared.policy.delay_for(retries));
                        retries += 1;
                    }
                }
            }
            Err(err) => {
                failures += 1;
                tracing::warn!(
                    "Session {}: connection attempt {} failed: {}",
                    session_id,
                    failures,
                    err
                );

                if !err.is_retryable() {
                    shared.terminate(generation, err, &mut ready).await;
                    return;
                }
                if !shared.policy.can_retry(retries) {
                    shared
                        .terminate(
                            generation,
                            ConnectionError::RetriesExhausted { attempts: failures },
                            &mut ready,
                        )
                        .await;
                    return;
                }
                pending_delay = Some(shared.policy.delay_for(retries));
                retries += 1;
            }
        }
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Connected phase: forward frames to listeners until the session ends.
async fn pump(
    shared: &Shared,
    generation: u64,
    channel: &mut dyn Channel,
    shutdown: &mut broadcast::Receiver<()>,
    commands: &mut mpsc::Receiver<SessionCommand>,
) -> SessionExit {
    let mut heartbeat = shared.ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            _ = shutdown.recv() => return SessionExit::Shutdown,
            command = commands.recv() => match command {
                Some(SessionCommand::Authenticate(token)) => {
                    if let Err(e) = channel.send(protocol::authenticate_frame(&token)).await {
                        return SessionExit::Dropped(e.to_string());
                    }
                    tracing::debug!("Pushed refreshed credential over the socket");
                }
                Some(SessionCommand::Reconnect) => return SessionExit::Reconnect,
                None => return SessionExit::Shutdown,
            },
            _ = next_heartbeat(&mut heartbeat) => {
                if let Err(e) = channel.send(protocol::ping_frame()).await {
                    return SessionExit::Dropped(e.to_string());
                }
            }
            frame = channel.recv() => match frame {
                None => return SessionExit::Dropped("connection closed by server".to_string()),
                Some(Err(e)) => return SessionExit::Dropped(e.to_string()),
                Some(Ok(text)) => match ServerFrame::parse(&text) {
                    Ok(frame) => {
                        if let Some(exit) = handle_frame(shared, generation, frame).await {
                            return exit;
                        }
                    }
                    Err(e) => tracing::warn!("Dropping malformed socket frame: {}", e),
                },
            },
        }
    }
}

async fn handle_frame(shared: &Shared, generation: u64, frame: ServerFrame) -> Option<SessionExit> {
    match frame {
        ServerFrame::Notification(payload) => match NotificationRecord::from_payload(&payload) {
            Ok(record) => {
                tracing::debug!("Received notification {}", record.id);
                shared
                    .dispatch(generation, Event::Notification(&record))
                    .await;
            }
            Err(e) => tracing::warn!("Dropping malformed notification payload: {}", e),
        },
        ServerFrame::NotificationRead { id } => {
            tracing::debug!("Notification {} read in another session", id);
            shared
                .dispatch(generation, Event::NotificationRead(&id))
                .await;
        }
        ServerFrame::Error(payload) if payload.is_unauthorized() => {
            return Some(SessionExit::AuthRevoked(payload.message));
        }
        ServerFrame::Error(payload) => {
            let err = ConnectionError::Protocol(format!("{}: {}", payload.code, payload.message));
            tracing::warn!("Notification server reported an error: {}", err);
            shared.dispatch(generation, Event::Error(&err)).await;
        }
        ServerFrame::Pong => tracing::trace!("pong"),
        ServerFrame::Connected(_) => tracing::debug!("Server re-acknowledged the session"),
        ServerFrame::Unknown(kind) => tracing::debug!("Ignoring socket frame of type '{}'", kind),
    }
    None
}
