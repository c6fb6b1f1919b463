//! Realtime client over the Phoenix Channels v1 protocol.
//!
//! One multiplexed WebSocket carries any number of topic channels. Each
//! channel joins with its broadcast, presence, and row-change settings,
//! and incoming pushes fan out to callbacks or lazy streams registered on
//! that channel. The connection sends heartbeats, reconnects after a fixed
//! delay when the socket drops or a heartbeat goes unanswered, and rejoins
//! every tracked channel once it is back.
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use tidewire_config::RealtimeConfig;
//! use tidewire_realtime::{ChangeFilter, ChangeKind, RealtimeClient};
//!
//! # async fn run() -> Result<(), tidewire_common::RealtimeError> {
//! let client = RealtimeClient::new(RealtimeConfig::new("https://abc.example.co", "anon-key"))?;
//! let channel = client.channel("orders");
//! let mut inserts = channel.change_feed(ChangeFilter::new("public").table("orders").on(ChangeKind::Insert))?;
//! channel.subscribe(true).await?;
//! while let Some(change) = inserts.next().await {
//!     println!("{:?}", change.record());
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod change;
pub mod channel;
pub mod client;
pub mod endpoint;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod snapshot;
pub mod transport;

mod http;
mod sync;

pub use auth::{AuthSession, SessionStatus};
pub use change::{ChangeEvent, ChangeKind, Column, Record};
pub use channel::{
    BroadcastFeed, CallbackStream, ChangeFeed, Channel, ChannelOptions, ChannelStatus, ListFeed,
    PresenceFeed,
};
pub use client::{ConnectionStatus, RealtimeClient, RealtimeClientBuilder};
pub use presence::{Presence, PresenceDiff, PresenceSet};
pub use protocol::{BroadcastJoinConfig, ChangeFilter, Envelope, PresenceJoinConfig};
pub use registry::{CallbackId, CallbackRegistry};
pub use snapshot::{Row, SnapshotSource};
pub use transport::{
    Connector, MemoryAcceptor, MemoryConnector, MemorySession, TungsteniteConnector,
};

pub use tidewire_common::RealtimeError;
