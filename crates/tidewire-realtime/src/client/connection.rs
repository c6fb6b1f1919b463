//! Socket ownership, heartbeat, reconnect, and topic routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use tidewire_common::RealtimeError;
use tidewire_config::RealtimeConfig;

use super::ConnectionStatus;
use crate::auth::{ensure_not_expired, AuthSession, SessionStatus};
use crate::channel::{Channel, ChannelStatus};
use crate::http::BroadcastApi;
use crate::protocol::{events, Envelope};
use crate::sync::lock;
use crate::transport::{Connector, SocketSink, SocketStream};

/// Result of a successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opened {
    Fresh,
    AlreadyConnected,
}

pub(crate) struct Connection {
    config: RealtimeConfig,
    ws_url: Url,
    connector: Arc<dyn Connector>,
    api: BroadcastApi,
    auth: Option<Arc<dyn AuthSession>>,
    status: watch::Sender<ConnectionStatus>,
    pub(crate) subscriptions: Mutex<HashMap<String, Channel>>,
    connect_lock: tokio::sync::Mutex<()>,
    writer: tokio::sync::Mutex<Option<SocketSink>>,
    socket_tasks: Mutex<Option<CancellationToken>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    next_ref: AtomicU64,
    heartbeat_ref: AtomicU64,
    access_token: Mutex<Option<String>>,
    auth_watcher_started: AtomicBool,
    shutdown: CancellationToken,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
    }
}

/// Puts the status back to `Disconnected` if an open is abandoned midway.
struct ConnectingGuard<'a> {
    status: &'a watch::Sender<ConnectionStatus>,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.status.send_replace(ConnectionStatus::Disconnected);
        }
    }
}

impl Connection {
    pub(crate) fn new(
        config: RealtimeConfig,
        ws_url: Url,
        connector: Arc<dyn Connector>,
        api: BroadcastApi,
        auth: Option<Arc<dyn AuthSession>>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let access_token = config.access_token.clone();
        Self {
            config,
            ws_url,
            connector,
            api,
            auth,
            status,
            subscriptions: Mutex::new(HashMap::new()),
            connect_lock: tokio::sync::Mutex::new(()),
            writer: tokio::sync::Mutex::new(None),
            socket_tasks: Mutex::new(None),
            reconnect_task: Mutex::new(None),
            next_ref: AtomicU64::new(0),
            heartbeat_ref: AtomicU64::new(0),
            access_token: Mutex::new(access_token),
            auth_watcher_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub(crate) fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub(crate) fn broadcast_api(&self) -> &BroadcastApi {
        &self.api
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn status_stream(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn make_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn pending_heartbeat(&self) -> Option<u64> {
        match self.heartbeat_ref.load(Ordering::SeqCst) {
            0 => None,
            r => Some(r),
        }
    }

    /// The token sent with joins and HTTP broadcasts.
    pub(crate) fn access_token(&self) -> Option<String> {
        lock(&self.access_token)
            .clone()
            .or_else(|| self.auth.as_ref().and_then(|a| a.current_access_token()))
    }

    pub(crate) fn channels(&self) -> Vec<Channel> {
        lock(&self.subscriptions).values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Connect / disconnect
    // -----------------------------------------------------------------------

    /// Open the socket unless it is already open. Serialized by the connect
    /// lock, so concurrent callers share one socket.
    pub(crate) async fn open_socket(self: &Arc<Self>) -> Result<Opened, RealtimeError> {
        if self.is_closed() {
            return Err(RealtimeError::ClientClosed);
        }
        let _guard = self.connect_lock.lock().await;
        if self.status() == ConnectionStatus::Connected {
            return Ok(Opened::AlreadyConnected);
        }

        self.status.send_replace(ConnectionStatus::Connecting);
        let mut connecting = ConnectingGuard {
            status: &self.status,
            armed: true,
        };
        info!(
            host = self.ws_url.host_str().unwrap_or_default(),
            path = self.ws_url.path(),
            "Connecting to realtime server"
        );

        let opened = tokio::select! {
            res = tokio::time::timeout(
                self.config.connect_timeout(),
                self.connector.open(self.ws_url.as_str()),
            ) => match res {
                Ok(res) => res,
                Err(_) => Err(RealtimeError::Transport(format!(
                    "connect timed out after {}ms",
                    self.config.connect_timeout_ms
                ))),
            },
            _ = self.shutdown.cancelled() => Err(RealtimeError::ClientClosed),
        };
        let (sink, stream) = opened?;

        *self.writer.lock().await = Some(sink);
        self.heartbeat_ref.store(0, Ordering::SeqCst);

        let cancel = self.shutdown.child_token();
        if let Some(previous) = lock(&self.socket_tasks).replace(cancel.clone()) {
            previous.cancel();
        }

        connecting.armed = false;
        self.status.send_replace(ConnectionStatus::Connected);
        info!("Connected to realtime server");

        tokio::spawn(receive_loop(Arc::downgrade(self), stream, cancel.clone()));
        tokio::spawn(heartbeat_loop(
            Arc::downgrade(self),
            self.config.heartbeat_interval(),
            cancel,
        ));
        self.start_auth_watcher();

        Ok(Opened::Fresh)
    }

    /// Connect, logging failures and scheduling a reconnect instead of
    /// returning them.
    pub(crate) async fn connect(self: &Arc<Self>) {
        match self.open_socket().await {
            Ok(Opened::Fresh) => self.rejoin_channels(true).await,
            Ok(Opened::AlreadyConnected) => {}
            Err(RealtimeError::ClientClosed) => debug!("Connect ignored, client is closed"),
            Err(e) => {
                error!(error = %e, "Failed to connect to realtime server");
                self.schedule_reconnect();
            }
        }
    }

    /// Cancel socket tasks and any pending reconnect, then close the socket.
    pub(crate) async fn disconnect(&self) {
        let pending = lock(&self.reconnect_task).take();
        if let Some(task) = pending {
            task.abort();
        }
        self.teardown().await;
    }

    pub(crate) async fn close(&self) {
        info!("Closing realtime client");
        self.shutdown.cancel();
        self.disconnect().await;
    }

    async fn teardown(&self) {
        let _guard = self.connect_lock.lock().await;
        let tasks = lock(&self.socket_tasks).take();
        if let Some(cancel) = tasks {
            cancel.cancel();
        }
        let sink = self.writer.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error closing socket");
            }
        }
        self.heartbeat_ref.store(0, Ordering::SeqCst);
        let previous = self.status.send_replace(ConnectionStatus::Disconnected);
        if previous != ConnectionStatus::Disconnected {
            info!("Disconnected from realtime server");
        }
    }

    /// Start the delayed reconnect unless one is already running.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let mut slot = lock(&self.reconnect_task);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *slot = Some(tokio::spawn(reconnect_loop(Arc::downgrade(self))));
    }

    /// Send a join for every tracked channel. With `only_active`, channels
    /// that are neither subscribed nor subscribing are skipped.
    async fn rejoin_channels(&self, only_active: bool) {
        let token = self.access_token();
        for channel in self.channels() {
            if only_active
                && !matches!(
                    channel.status(),
                    ChannelStatus::Subscribed | ChannelStatus::Subscribing
                )
            {
                continue;
            }
            let join = channel.begin_join(token.clone());
            info!(topic = %channel.topic(), "Rejoining channel");
            if let Err(e) = self.send(join).await {
                warn!(topic = %channel.topic(), error = %e, "Failed to send rejoin");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    pub(crate) async fn send(&self, envelope: Envelope) -> Result<(), RealtimeError> {
        let text = serde_json::to_string(&envelope)
            .map_err(|e| RealtimeError::InvalidPayload(e.to_string()))?;
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(RealtimeError::NotConnected)?;
        trace!(topic = %envelope.topic, event = %envelope.event, frame = %text, "Sending frame");
        sink.send(text).await
    }

    /// One heartbeat tick. Returns `false` when the previous heartbeat went
    /// unanswered and a reconnect was scheduled instead.
    pub(crate) async fn heartbeat_tick(self: &Arc<Self>) -> bool {
        if self.status() != ConnectionStatus::Connected {
            return true;
        }
        let outstanding = self.heartbeat_ref.load(Ordering::SeqCst);
        if outstanding != 0 {
            warn!(heartbeat_ref = outstanding, "Heartbeat timed out, reconnecting");
            self.next_ref.store(0, Ordering::SeqCst);
            self.heartbeat_ref.store(0, Ordering::SeqCst);
            self.schedule_reconnect();
            return false;
        }

        let heartbeat_ref = self.make_ref();
        self.heartbeat_ref.store(heartbeat_ref, Ordering::SeqCst);
        if let Err(e) = self.send(Envelope::heartbeat(heartbeat_ref)).await {
            warn!(error = %e, "Failed to send heartbeat");
        }
        true
    }

    /// Store a new access token and push it to every joined channel.
    ///
    /// `None` falls back to the auth session, then to the configured token.
    pub(crate) async fn set_auth(&self, token: Option<String>) -> Result<(), RealtimeError> {
        let token = token
            .or_else(|| self.auth.as_ref().and_then(|a| a.current_access_token()))
            .or_else(|| self.config.access_token.clone());

        if let Some(token) = &token {
            if let Err(e) = ensure_not_expired(token) {
                warn!(error = %e, "Rejected access token");
                return Err(e);
            }
        }
        *lock(&self.access_token) = token.clone();

        let Some(token) = token else {
            return Ok(());
        };
        for channel in self.channels() {
            if channel.status() != ChannelStatus::Subscribed {
                continue;
            }
            let envelope = Envelope::new(
                channel.topic(),
                events::ACCESS_TOKEN,
                json!({ "access_token": token }),
                Some(self.make_ref()),
            );
            if let Err(e) = self.send(envelope).await {
                warn!(topic = %channel.topic(), error = %e, "Failed to push access token");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    fn on_frame(&self, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };
        trace!(topic = %envelope.topic, event = %envelope.event, "Frame received");

        if let Some(r) = envelope.ref_number() {
            if r != 0
                && self
                    .heartbeat_ref
                    .compare_exchange(r, 0, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                debug!(heartbeat_ref = r, "Heartbeat acknowledged");
                return;
            }
        }

        let channel = lock(&self.subscriptions).get(&envelope.topic).cloned();
        match channel {
            Some(channel) => channel.handle(&envelope),
            None => debug!(
                topic = %envelope.topic,
                event = %envelope.event,
                "Dropping message for unknown topic"
            ),
        }
    }

    fn start_auth_watcher(self: &Arc<Self>) {
        let Some(auth) = &self.auth else {
            return;
        };
        if self.auth_watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(auth_watcher(
            Arc::downgrade(self),
            auth.session_status(),
            self.shutdown.clone(),
        ));
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn receive_loop(conn: Weak<Connection>, mut stream: SocketStream, cancel: CancellationToken) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        let Some(conn) = conn.upgrade() else {
            return;
        };
        match frame {
            Some(Ok(text)) => conn.on_frame(&text),
            Some(Err(e)) => {
                warn!(error = %e, "Socket error, reconnecting");
                conn.schedule_reconnect();
                return;
            }
            None => {
                warn!("Socket closed by server, reconnecting");
                conn.schedule_reconnect();
                return;
            }
        }
    }
}

async fn heartbeat_loop(conn: Weak<Connection>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let Some(conn) = conn.upgrade() else {
            return;
        };
        if !conn.heartbeat_tick().await {
            return;
        }
    }
}

async fn reconnect_loop(conn: Weak<Connection>) {
    loop {
        let Some(strong) = conn.upgrade() else {
            return;
        };
        strong.teardown().await;
        let delay = strong.config.reconnect_delay();
        let shutdown = strong.shutdown.clone();
        drop(strong);

        debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(strong) = conn.upgrade() else {
            return;
        };
        match strong.open_socket().await {
            Ok(Opened::Fresh) => {
                info!("Reconnected to realtime server");
                strong.rejoin_channels(false).await;
                return;
            }
            Ok(Opened::AlreadyConnected) | Err(RealtimeError::ClientClosed) => return,
            Err(e) => warn!(error = %e, "Reconnect attempt failed"),
        }
    }
}

async fn auth_watcher(
    conn: Weak<Connection>,
    mut session: watch::Receiver<SessionStatus>,
    shutdown: CancellationToken,
) {
    // The status at subscribe time only seeds the token. Anything newer,
    // including a sign-out, is still pending on `changed()`.
    let initial = session.borrow().clone();
    if let SessionStatus::Authenticated { access_token } = initial {
        if let Some(conn) = conn.upgrade() {
            if conn.access_token().as_deref() != Some(access_token.as_str()) {
                if let Err(e) = conn.set_auth(Some(access_token)).await {
                    warn!(error = %e, "Session token not applied");
                }
            }
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = session.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let status = session.borrow_and_update().clone();
        let Some(conn) = conn.upgrade() else {
            return;
        };
        match status {
            SessionStatus::Authenticated { access_token } => {
                debug!("Session refreshed, updating access token");
                if let Err(e) = conn.set_auth(Some(access_token)).await {
                    warn!(error = %e, "Session token not applied");
                }
            }
            SessionStatus::NotAuthenticated => {
                *lock(&conn.access_token) = None;
                if conn.config.disconnect_on_session_loss {
                    info!("Session ended, disconnecting");
                    conn.disconnect().await;
                }
            }
            SessionStatus::Initializing => {}
        }
    }
}
