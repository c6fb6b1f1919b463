//! Pluggable socket transport.
//!
//! The connection manager only needs a sink for outgoing text frames and a
//! stream of incoming ones. [`TungsteniteConnector`] opens a real
//! WebSocket; [`MemoryConnector`] hands the server end to the caller.

mod memory;
mod websocket;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream};

use tidewire_common::RealtimeError;

pub use self::memory::{MemoryAcceptor, MemoryConnector, MemorySession};
pub use self::websocket::TungsteniteConnector;

/// Outgoing half of an open socket.
pub type SocketSink = Pin<Box<dyn Sink<String, Error = RealtimeError> + Send>>;

/// Incoming text frames. The stream ends when the peer closes the socket.
pub type SocketStream = Pin<Box<dyn Stream<Item = Result<String, RealtimeError>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<(SocketSink, SocketStream), RealtimeError>;
}
