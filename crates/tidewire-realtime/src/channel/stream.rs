//! Lazy, registration-based event streams.
//!
//! A stream registers its callback on the channel's registry the first
//! time it is polled and removes it when dropped. Items are buffered
//! without bound, and a stream cannot be restarted once dropped.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::change::ChangeEvent;
use crate::presence::PresenceDiff;
use crate::registry::{CallbackId, CallbackRegistry};

pub type ChangeFeed = CallbackStream<ChangeEvent>;
pub type BroadcastFeed = CallbackStream<Value>;
pub type PresenceFeed = CallbackStream<PresenceDiff>;

type Register<T> =
    Box<dyn FnOnce(&CallbackRegistry, mpsc::UnboundedSender<T>) -> CallbackId + Send>;

pub struct CallbackStream<T> {
    registry: Arc<CallbackRegistry>,
    pending: Option<(Register<T>, mpsc::UnboundedSender<T>)>,
    rx: mpsc::UnboundedReceiver<T>,
    id: Option<CallbackId>,
}

impl<T> Unpin for CallbackStream<T> {}

impl<T> CallbackStream<T> {
    pub(crate) fn new<F>(registry: Arc<CallbackRegistry>, register: F) -> Self
    where
        F: FnOnce(&CallbackRegistry, mpsc::UnboundedSender<T>) -> CallbackId + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            registry,
            pending: Some((Box::new(register), tx)),
            rx,
            id: None,
        }
    }

    /// Register the callback now instead of on first poll, so events
    /// arriving before the consumer starts polling are buffered.
    pub fn activate(&mut self) {
        if let Some((register, tx)) = self.pending.take() {
            self.id = Some(register(&self.registry, tx));
        }
    }

    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }
}

impl<T> Stream for CallbackStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        this.activate();
        this.rx.poll_recv(cx)
    }
}

impl<T> Drop for CallbackStream<T> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.unregister(id);
        }
    }
}

impl<T> std::fmt::Debug for CallbackStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackStream")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;

    fn broadcast_feed(registry: &Arc<CallbackRegistry>, event: &'static str) -> BroadcastFeed {
        CallbackStream::new(Arc::clone(registry), move |reg, tx| {
            reg.register_broadcast(
                event,
                Arc::new(move |payload: &Value| {
                    let _ = tx.send(payload.clone());
                }),
            )
        })
    }

    #[tokio::test]
    async fn registers_on_first_poll() {
        let registry = Arc::new(CallbackRegistry::new());
        let mut feed = broadcast_feed(&registry, "ping");
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch_broadcast("ping", &json!({ "lost": true })), 0);

        let next = feed.next();
        tokio::pin!(next);
        assert!(futures_util::poll!(next.as_mut()).is_pending());
        assert_eq!(registry.len(), 1);

        registry.dispatch_broadcast("ping", &json!({ "n": 1 }));
        assert_eq!(next.await, Some(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn activate_buffers_before_polling() {
        let registry = Arc::new(CallbackRegistry::new());
        let mut feed = broadcast_feed(&registry, "ping");
        feed.activate();
        registry.dispatch_broadcast("ping", &json!(1));
        registry.dispatch_broadcast("ping", &json!(2));
        assert_eq!(feed.next().await, Some(json!(1)));
        assert_eq!(feed.next().await, Some(json!(2)));
    }

    #[test]
    fn drop_unregisters() {
        let registry = Arc::new(CallbackRegistry::new());
        let mut feed = broadcast_feed(&registry, "ping");
        feed.activate();
        assert_eq!(registry.len(), 1);
        drop(feed);
        assert!(registry.is_empty());
    }
}
