//! The realtime client: one socket, many channels.

pub(crate) mod connection;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use tidewire_common::RealtimeError;
use tidewire_config::RealtimeConfig;

use crate::auth::AuthSession;
use crate::channel::{Channel, ChannelOptions, ChannelStatus};
use crate::endpoint;
use crate::http::BroadcastApi;
use crate::protocol::TOPIC_PREFIX;
use crate::sync::lock;
use crate::transport::{Connector, TungsteniteConnector};

use self::connection::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Handle to a realtime connection. Clones share the same socket and
/// channel table; the connection shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    conn: Arc<Connection>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("status", &self.status())
            .field("channels", &lock(&self.conn.subscriptions).len())
            .finish()
    }
}

pub struct RealtimeClientBuilder {
    config: RealtimeConfig,
    connector: Option<Arc<dyn Connector>>,
    auth: Option<Arc<dyn AuthSession>>,
    http: Option<reqwest::Client>,
}

impl RealtimeClientBuilder {
    /// Transport used to open sockets (default: [`TungsteniteConnector`]).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Follow an auth session for access tokens and sign-outs.
    pub fn auth(mut self, auth: Arc<dyn AuthSession>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// HTTP client for the broadcast endpoint.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<RealtimeClient, RealtimeError> {
        let ws_url = endpoint::websocket_url(&self.config)?;
        let api = BroadcastApi::new(
            self.http.unwrap_or_default(),
            endpoint::broadcast_url(&self.config)?,
            self.config.api_key.clone(),
        );
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector));
        Ok(RealtimeClient {
            conn: Arc::new(Connection::new(
                self.config,
                ws_url,
                connector,
                api,
                self.auth,
            )),
        })
    }
}

impl RealtimeClient {
    pub fn new(config: RealtimeConfig) -> Result<Self, RealtimeError> {
        Self::builder(config).build()
    }

    pub fn builder(config: RealtimeConfig) -> RealtimeClientBuilder {
        RealtimeClientBuilder {
            config,
            connector: None,
            auth: None,
            http: None,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        self.conn.config()
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    /// Open the socket. Failures are logged and retried after
    /// `reconnect_delay`; watch [`status_stream`](Self::status_stream) to
    /// learn when the socket is up.
    pub async fn connect(&self) {
        self.conn.connect().await;
    }

    /// Close the socket and cancel any pending reconnect. Channels stay in
    /// the table.
    pub async fn disconnect(&self) {
        self.conn.disconnect().await;
    }

    /// Disconnect for good. Blocked subscribes resolve with
    /// [`RealtimeError::Cancelled`] and later connects do nothing.
    pub async fn close(&self) {
        self.conn.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Run one heartbeat tick now instead of waiting for the interval.
    pub async fn heartbeat(&self) {
        self.conn.heartbeat_tick().await;
    }

    /// Use `token` for future joins and push it to every joined channel.
    /// `None` falls back to the auth session, then to the configured token.
    pub async fn set_auth(&self, token: Option<String>) -> Result<(), RealtimeError> {
        self.conn.set_auth(token).await
    }

    pub fn access_token(&self) -> Option<String> {
        self.conn.access_token()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.conn.status()
    }

    pub fn status_stream(&self) -> watch::Receiver<ConnectionStatus> {
        self.conn.status_stream()
    }

    /// Ref of the heartbeat awaiting an ack, if any.
    pub fn pending_heartbeat(&self) -> Option<u64> {
        self.conn.pending_heartbeat()
    }

    // -----------------------------------------------------------------------
    // Channels
    // -----------------------------------------------------------------------

    /// The channel for `name`, created with default options on first use.
    pub fn channel(&self, name: &str) -> Channel {
        self.channel_with(name, ChannelOptions::default())
    }

    /// The channel for `name`. `options` only apply when the channel is
    /// created by this call.
    pub fn channel_with(&self, name: &str, options: ChannelOptions) -> Channel {
        let topic = format!("{TOPIC_PREFIX}{name}");
        let mut subscriptions = lock(&self.conn.subscriptions);
        subscriptions
            .entry(topic.clone())
            .or_insert_with(|| {
                debug!(topic = %topic, "Creating channel");
                Channel::new(name.to_string(), topic, options, Arc::downgrade(&self.conn))
            })
            .clone()
    }

    /// Channels currently tracked, keyed by topic.
    pub fn subscriptions(&self) -> HashMap<String, Channel> {
        lock(&self.conn.subscriptions).clone()
    }

    /// Leave `channel` if joined and forget it. The handle stays usable
    /// for reads but can no longer subscribe.
    pub async fn remove_channel(&self, channel: &Channel) {
        let now_empty = {
            let mut subscriptions = lock(&self.conn.subscriptions);
            if subscriptions.get(channel.topic()) == Some(channel) {
                subscriptions.remove(channel.topic());
            }
            subscriptions.is_empty()
        };
        retire(channel).await;
        if now_empty && self.conn.config().disconnect_on_no_subscriptions {
            self.disconnect().await;
        }
    }

    /// Leave and forget every channel. Channels created while this runs
    /// are kept.
    pub async fn remove_all_channels(&self) {
        let removed: Vec<Channel> = lock(&self.conn.subscriptions)
            .drain()
            .map(|(_, channel)| channel)
            .collect();
        for channel in &removed {
            retire(channel).await;
        }
        let now_empty = lock(&self.conn.subscriptions).is_empty();
        if now_empty && self.conn.config().disconnect_on_no_subscriptions {
            self.disconnect().await;
        }
    }
}

/// Leave a channel that is already out of the table.
async fn retire(channel: &Channel) {
    channel.mark_removed();
    if matches!(
        channel.status(),
        ChannelStatus::Subscribed | ChannelStatus::Subscribing
    ) {
        if let Err(e) = channel.unsubscribe().await {
            warn!(topic = %channel.topic(), error = %e, "Failed to leave channel");
        }
    }
    channel.settle_removed();
}
