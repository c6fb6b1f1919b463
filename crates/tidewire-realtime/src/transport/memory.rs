//! In-process transport.
//!
//! Every `open` on a [`MemoryConnector`] produces a [`MemorySession`] on
//! the paired [`MemoryAcceptor`], which plays the server: it reads the
//! frames the client sent and pushes frames back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{sink, stream};
use tokio::sync::mpsc;

use tidewire_common::RealtimeError;

use super::{Connector, SocketSink, SocketStream};
use crate::protocol::Envelope;

type Inbound = Result<String, RealtimeError>;

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    sessions: mpsc::UnboundedSender<MemorySession>,
    refusals: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn pair() -> (Self, MemoryAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            sessions: tx,
            refusals: Arc::new(AtomicUsize::new(0)),
            opened: Arc::new(AtomicUsize::new(0)),
        };
        (connector, MemoryAcceptor { sessions: rx })
    }

    /// Fail the next `count` open attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    /// Number of sockets opened successfully so far.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<(SocketSink, SocketStream), RealtimeError> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RealtimeError::Transport("connection refused".into()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .send(MemorySession {
                url: url.to_string(),
                outbound: out_rx,
                inbound: in_tx,
            })
            .map_err(|_| RealtimeError::Transport("memory acceptor dropped".into()))?;

        let sink = sink::unfold(out_tx, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| RealtimeError::Transport("memory peer closed".into()))?;
            Ok::<_, RealtimeError>(tx)
        });
        let frames = stream::unfold(in_rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });

        Ok((Box::pin(sink), Box::pin(frames)))
    }
}

/// Server end of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryAcceptor {
    sessions: mpsc::UnboundedReceiver<MemorySession>,
}

impl MemoryAcceptor {
    /// Wait for the client to open its next socket.
    pub async fn accept(&mut self) -> Option<MemorySession> {
        self.sessions.recv().await
    }
}

/// One open in-memory socket, seen from the server side. Dropping it
/// closes the socket.
#[derive(Debug)]
pub struct MemorySession {
    url: String,
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl MemorySession {
    /// The URL the client opened.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next raw frame sent by the client, `None` once the client closed.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next frame sent by the client, decoded. Frames that are not
    /// envelopes are skipped.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            let frame = self.next_frame().await?;
            if let Ok(envelope) = serde_json::from_str(&frame) {
                return Some(envelope);
            }
        }
    }

    /// Send an envelope to the client. Returns `false` if the client is gone.
    pub fn push(&self, envelope: &Envelope) -> bool {
        match serde_json::to_string(envelope) {
            Ok(text) => self.push_text(text),
            Err(_) => false,
        }
    }

    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.inbound.send(Ok(text.into())).is_ok()
    }

    /// Deliver a transport error to the client.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.inbound
            .send(Err(RealtimeError::Transport(reason.into())))
            .is_ok()
    }

    /// Close the socket from the server side.
    pub fn close(self) {}
}
