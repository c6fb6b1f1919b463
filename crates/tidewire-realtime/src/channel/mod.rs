//! Topic channels.
//!
//! A [`Channel`] is a handle to one topic on the client's socket. Handles
//! are cheap to clone and all clones share state. The channel walks
//! `Unsubscribed → Subscribing → Subscribed → Unsubscribing → Unsubscribed`
//! driven by its own requests and the server's replies.

mod list_feed;
mod resolver;
mod stream;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use tidewire_common::RealtimeError;

use crate::change::ChangeEvent;
use crate::client::connection::Connection;
use crate::client::ConnectionStatus;
use crate::http::BroadcastMessage;
use crate::presence::{Presence, PresenceDiff, PresenceSet};
use crate::protocol::{
    events, BroadcastJoinConfig, ChangeFilter, Envelope, JoinConfig, JoinPayload,
    PresenceJoinConfig,
};
use crate::registry::{CallbackId, CallbackRegistry};
use crate::snapshot::SnapshotSource;
use crate::sync::lock;

use self::resolver::{resolve, ChannelAction};

pub use self::list_feed::ListFeed;
pub use self::stream::{BroadcastFeed, CallbackStream, ChangeFeed, PresenceFeed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

/// Join settings fixed when the channel is created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    pub broadcast: BroadcastJoinConfig,
    pub presence: PresenceJoinConfig,
    /// Join as a private channel (authorized by the server's access policies).
    pub private: bool,
}

struct ChannelInner {
    name: String,
    topic: String,
    options: ChannelOptions,
    conn: Weak<Connection>,
    status: watch::Sender<ChannelStatus>,
    client_filters: Mutex<Vec<ChangeFilter>>,
    registry: Arc<CallbackRegistry>,
    presence: Mutex<PresenceSet>,
    last_error: Mutex<Option<String>>,
    /// Set once the client dropped this channel from its table.
    removed: AtomicBool,
}

#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Channel {}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.inner.topic)
            .field("status", &self.status())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        name: String,
        topic: String,
        options: ChannelOptions,
        conn: Weak<Connection>,
    ) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Unsubscribed);
        Self {
            inner: Arc::new(ChannelInner {
                name,
                topic,
                options,
                conn,
                status,
                client_filters: Mutex::new(Vec::new()),
                registry: Arc::new(CallbackRegistry::new()),
                presence: Mutex::new(PresenceSet::new()),
                last_error: Mutex::new(None),
                removed: AtomicBool::new(false),
            }),
        }
    }

    /// Channel name as given to [`RealtimeClient::channel`](crate::RealtimeClient::channel).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Wire topic, `realtime:<name>`.
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.inner.options
    }

    pub fn status(&self) -> ChannelStatus {
        *self.inner.status.borrow()
    }

    pub fn status_stream(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status.subscribe()
    }

    pub fn client_filters(&self) -> Vec<ChangeFilter> {
        lock(&self.inner.client_filters).clone()
    }

    /// Filters the server acknowledged on the last successful join.
    pub fn server_filters(&self) -> Vec<ChangeFilter> {
        self.inner.registry.server_filters()
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.inner.registry
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.inner.removed.load(Ordering::SeqCst)
    }

    /// Stop accepting joins. Pending blocking subscribes fail once the
    /// status settles on `Unsubscribed`.
    pub(crate) fn mark_removed(&self) {
        self.inner.removed.store(true, Ordering::SeqCst);
        *lock(&self.inner.last_error) = Some("channel removed".to_string());
    }

    /// Final status of a removed channel. The leave ack will never be
    /// routed back to it.
    pub(crate) fn settle_removed(&self) {
        self.set_status(ChannelStatus::Unsubscribed);
    }

    fn ensure_not_removed(&self) -> Result<(), RealtimeError> {
        if self.is_removed() {
            return Err(RealtimeError::ChannelRemoved {
                topic: self.inner.topic.clone(),
            });
        }
        Ok(())
    }

    fn connection(&self) -> Result<Arc<Connection>, RealtimeError> {
        self.inner.conn.upgrade().ok_or(RealtimeError::ClientClosed)
    }

    fn set_status(&self, status: ChannelStatus) {
        let previous = self.inner.status.send_replace(status);
        if previous != status {
            debug!(topic = %self.inner.topic, ?previous, ?status, "Channel status changed");
        }
    }

    // -----------------------------------------------------------------------
    // Join / leave
    // -----------------------------------------------------------------------

    /// Move to `Subscribing` and build the join envelope.
    ///
    /// Holds the filter lock across the status change so a concurrent
    /// `add_change_filter` either lands in this payload or sees the new status.
    pub(crate) fn begin_join(&self, access_token: Option<String>) -> Envelope {
        let filters = lock(&self.inner.client_filters);
        *lock(&self.inner.last_error) = None;
        self.set_status(ChannelStatus::Subscribing);

        let payload = JoinPayload {
            config: JoinConfig {
                broadcast: self.inner.options.broadcast.clone(),
                presence: self.inner.options.presence.clone(),
                postgres_changes: filters.clone(),
                private: self.inner.options.private,
            },
            access_token,
        };
        Envelope::new(&*self.inner.topic, events::JOIN, payload.to_value(), None)
    }

    /// Join the topic.
    ///
    /// Connects first when the socket is down (unless the client is
    /// configured not to). With `block_until_subscribed` the call returns
    /// once the server accepted or rejected the join. A join that cannot be
    /// sent because the socket is down is sent again when it reconnects.
    pub async fn subscribe(&self, block_until_subscribed: bool) -> Result<(), RealtimeError> {
        self.ensure_not_removed()?;
        let conn = self.connection()?;
        if conn.is_closed() {
            return Err(RealtimeError::ClientClosed);
        }
        let mut status_rx = self.inner.status.subscribe();
        let mut rejoined = false;
        if conn.status() != ConnectionStatus::Connected {
            if !conn.config().connect_on_subscribe {
                return Err(RealtimeError::NotConnected);
            }
            let was_active = matches!(
                self.status(),
                ChannelStatus::Subscribed | ChannelStatus::Subscribing
            );
            conn.connect().await;
            // A fresh socket rejoins channels that were already active.
            rejoined = was_active && conn.status() == ConnectionStatus::Connected;
        }

        // The channel may have been removed while connecting.
        self.ensure_not_removed()?;

        if !rejoined {
            let join = self.begin_join(conn.access_token());
            info!(topic = %self.inner.topic, "Joining channel");
            if let Err(e) = conn.send(join).await {
                debug!(
                    topic = %self.inner.topic,
                    error = %e,
                    "Join deferred until the socket reconnects"
                );
            }
        }

        if !block_until_subscribed {
            return Ok(());
        }

        let shutdown = conn.shutdown_token();
        drop(conn);
        let outcome = tokio::select! {
            res = status_rx.wait_for(|s| {
                matches!(s, ChannelStatus::Subscribed | ChannelStatus::Unsubscribed)
            }) => res.map(|s| *s).map_err(|_| RealtimeError::Cancelled),
            _ = shutdown.cancelled() => Err(RealtimeError::Cancelled),
        }?;

        match outcome {
            ChannelStatus::Subscribed => Ok(()),
            _ if self.is_removed() => Err(RealtimeError::ChannelRemoved {
                topic: self.inner.topic.clone(),
            }),
            _ => Err(RealtimeError::JoinRejected {
                topic: self.inner.topic.clone(),
                reason: lock(&self.inner.last_error)
                    .clone()
                    .unwrap_or_else(|| "channel closed".to_string()),
            }),
        }
    }

    /// Leave the topic. Completes once the leave is sent; the status turns
    /// `Unsubscribed` when the server acknowledges it, or immediately when
    /// the socket is down.
    pub async fn unsubscribe(&self) -> Result<(), RealtimeError> {
        let conn = self.connection()?;
        self.set_status(ChannelStatus::Unsubscribing);
        let leave = Envelope::new(&*self.inner.topic, events::LEAVE, json!({}), None);
        if let Err(e) = conn.send(leave).await {
            debug!(topic = %self.inner.topic, error = %e, "Leaving channel without a socket");
            self.set_status(ChannelStatus::Unsubscribed);
        }
        Ok(())
    }

    /// Subscribe to row changes on the next join.
    pub fn add_change_filter(&self, filter: ChangeFilter) -> Result<(), RealtimeError> {
        let mut filters = lock(&self.inner.client_filters);
        if self.status() == ChannelStatus::Subscribed {
            return Err(RealtimeError::FilterAfterJoin {
                topic: self.inner.topic.clone(),
            });
        }
        if !filters.contains(&filter) {
            filters.push(filter);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Outbound messages
    // -----------------------------------------------------------------------

    /// Send a broadcast. Uses the socket while joined and the HTTP endpoint
    /// otherwise. `message` must serialize to a JSON object.
    pub async fn broadcast<T>(&self, event: &str, message: &T) -> Result<(), RealtimeError>
    where
        T: Serialize + ?Sized,
    {
        let payload = to_object(message, "broadcast message")?;
        let conn = self.connection()?;

        if self.status() == ChannelStatus::Subscribed {
            let envelope = Envelope::new(
                &*self.inner.topic,
                events::BROADCAST,
                json!({ "type": "broadcast", "event": event, "payload": payload }),
                Some(conn.make_ref()),
            );
            return conn.send(envelope).await;
        }

        let message = BroadcastMessage {
            topic: self.inner.name.clone(),
            event: event.to_string(),
            payload,
            private: self.inner.options.private,
        };
        conn.broadcast_api()
            .send(message, conn.access_token().as_deref())
            .await
    }

    /// Publish this client's presence state.
    pub async fn track<T>(&self, state: &T) -> Result<(), RealtimeError>
    where
        T: Serialize + ?Sized,
    {
        let state = to_object(state, "presence state")?;
        self.send_presence(json!({ "type": "presence", "event": "track", "payload": state }))
            .await
    }

    /// Withdraw this client's presence state.
    pub async fn untrack(&self) -> Result<(), RealtimeError> {
        self.send_presence(json!({ "type": "presence", "event": "untrack" }))
            .await
    }

    async fn send_presence(&self, payload: Value) -> Result<(), RealtimeError> {
        if self.status() != ChannelStatus::Subscribed {
            return Err(RealtimeError::NotSubscribed {
                topic: self.inner.topic.clone(),
            });
        }
        let conn = self.connection()?;
        let envelope = Envelope::new(
            &*self.inner.topic,
            events::PRESENCE,
            payload,
            Some(conn.make_ref()),
        );
        conn.send(envelope).await
    }

    // -----------------------------------------------------------------------
    // Callbacks and feeds
    // -----------------------------------------------------------------------

    /// Register `filter` for the next join and call `f` for each change it
    /// receives.
    pub fn on_change<F>(&self, filter: ChangeFilter, f: F) -> Result<CallbackId, RealtimeError>
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.add_change_filter(filter.clone())?;
        Ok(self.inner.registry.register_change(filter, Arc::new(f)))
    }

    pub fn on_broadcast<F>(&self, event: impl Into<String>, f: F) -> CallbackId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.registry.register_broadcast(event, Arc::new(f))
    }

    pub fn on_presence<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&PresenceDiff) + Send + Sync + 'static,
    {
        self.inner.registry.register_presence(Arc::new(f))
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.inner.registry.unregister(id)
    }

    /// Stream of row changes matching `filter`. The filter is added to the
    /// join payload right away, so this fails once the channel has joined.
    pub fn change_feed(&self, filter: ChangeFilter) -> Result<ChangeFeed, RealtimeError> {
        self.add_change_filter(filter.clone())?;
        Ok(CallbackStream::new(
            Arc::clone(&self.inner.registry),
            move |registry, tx| {
                registry.register_change(
                    filter,
                    Arc::new(move |event: &ChangeEvent| {
                        let _ = tx.send(event.clone());
                    }),
                )
            },
        ))
    }

    /// Stream of broadcast payloads for `event`.
    pub fn broadcast_feed(&self, event: impl Into<String>) -> BroadcastFeed {
        let event = event.into();
        CallbackStream::new(Arc::clone(&self.inner.registry), move |registry, tx| {
            registry.register_broadcast(
                event,
                Arc::new(move |payload: &Value| {
                    let _ = tx.send(payload.clone());
                }),
            )
        })
    }

    /// Stream of presence joins and leaves.
    pub fn presence_feed(&self) -> PresenceFeed {
        CallbackStream::new(Arc::clone(&self.inner.registry), |registry, tx| {
            registry.register_presence(Arc::new(move |diff: &PresenceDiff| {
                let _ = tx.send(diff.clone());
            }))
        })
    }

    /// Current rows of a table, kept up to date by this channel's changes.
    ///
    /// `source` loads the initial rows; `primary_key` names the columns
    /// that identify a row.
    pub fn list_feed(
        &self,
        filter: ChangeFilter,
        primary_key: Vec<String>,
        source: Arc<dyn SnapshotSource>,
    ) -> Result<ListFeed, RealtimeError> {
        let changes = self.change_feed(filter.clone())?;
        Ok(list_feed::list_feed(changes, filter, primary_key, source))
    }

    /// Presences currently known on this channel.
    pub fn presence_state(&self) -> HashMap<String, Presence> {
        lock(&self.inner.presence).snapshot()
    }

    // -----------------------------------------------------------------------
    // Inbound messages
    // -----------------------------------------------------------------------

    pub(crate) fn handle(&self, envelope: &Envelope) {
        let topic = &self.inner.topic;
        let action = match resolve(envelope) {
            Ok(Some(action)) => action,
            Ok(None) => {
                debug!(topic = %topic, event = %envelope.event, "Ignoring channel event");
                return;
            }
            Err(e) => {
                warn!(
                    topic = %topic,
                    event = %envelope.event,
                    error = %e,
                    "Dropping malformed channel event"
                );
                return;
            }
        };

        match action {
            ChannelAction::Reply { ok: true, response } => match self.status() {
                ChannelStatus::Subscribing => self.joined(&response),
                ChannelStatus::Unsubscribing => {
                    info!(topic = %topic, "Left channel");
                    self.set_status(ChannelStatus::Unsubscribed);
                }
                _ => debug!(topic = %topic, msg_ref = ?envelope.msg_ref, "Push acknowledged"),
            },
            ChannelAction::Reply {
                ok: false,
                response,
            } => {
                let reason = response
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| response.to_string());
                match self.status() {
                    ChannelStatus::Subscribing | ChannelStatus::Unsubscribing => {
                        warn!(topic = %topic, reason = %reason, "Channel request rejected");
                        self.fail(reason);
                    }
                    // A rejected broadcast, presence or token push leaves
                    // the join in place.
                    _ => warn!(
                        topic = %topic,
                        msg_ref = ?envelope.msg_ref,
                        reason = %reason,
                        "Push rejected"
                    ),
                }
            }
            ChannelAction::System { ok: true, message } => {
                debug!(topic = %topic, message = %message, "System message");
                if self.status() == ChannelStatus::Subscribing {
                    self.set_status(ChannelStatus::Subscribed);
                }
            }
            ChannelAction::System { ok: false, message } => {
                warn!(topic = %topic, message = %message, "System error on channel");
                self.fail(message);
            }
            ChannelAction::TokenExpired { message } => {
                warn!(topic = %topic, message = %message, "Access token expired, channel closed");
                self.fail(message);
            }
            ChannelAction::Closed => {
                info!(topic = %topic, "Channel closed by server");
                self.set_status(ChannelStatus::Unsubscribed);
            }
            ChannelAction::Errored { reason } => {
                warn!(topic = %topic, reason = %reason, "Channel errored");
                self.fail(reason);
            }
            ChannelAction::Change(note) => {
                let delivered = self.inner.registry.dispatch_change(&note.ids, &note.event);
                if delivered == 0 {
                    debug!(topic = %topic, ids = ?note.ids, "Change matched no callback");
                }
            }
            ChannelAction::Broadcast { event, payload } => {
                self.inner.registry.dispatch_broadcast(&event, &payload);
            }
            ChannelAction::PresenceState(state) => {
                lock(&self.inner.presence).reset(&state);
                self.inner.registry.dispatch_presence(&state);
            }
            ChannelAction::Presence(diff) => {
                lock(&self.inner.presence).apply(&diff);
                self.inner.registry.dispatch_presence(&diff);
            }
        }
    }

    fn joined(&self, response: &Value) {
        let acknowledged = match response.get("postgres_changes") {
            Some(filters) => match serde_json::from_value::<Vec<ChangeFilter>>(filters.clone()) {
                Ok(filters) => filters,
                Err(e) => {
                    warn!(
                        topic = %self.inner.topic,
                        error = %e,
                        "Could not decode acknowledged filters"
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        self.inner.registry.set_server_filters(acknowledged);
        info!(topic = %self.inner.topic, "Joined channel");
        self.set_status(ChannelStatus::Subscribed);
    }

    fn fail(&self, reason: String) {
        *lock(&self.inner.last_error) = Some(reason);
        self.set_status(ChannelStatus::Unsubscribed);
    }
}

fn to_object<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<Value, RealtimeError> {
    let value = serde_json::to_value(value)
        .map_err(|e| RealtimeError::InvalidPayload(format!("{what}: {e}")))?;
    if !value.is_object() {
        return Err(RealtimeError::InvalidPayload(format!(
            "{what} must be a JSON object"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests;
