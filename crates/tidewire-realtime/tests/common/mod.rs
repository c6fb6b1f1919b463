//! Shared harness: a client wired to an in-memory server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use tidewire_config::RealtimeConfig;
use tidewire_realtime::{
    Channel, ChannelStatus, Envelope, MemoryAcceptor, MemoryConnector, MemorySession,
    RealtimeClient,
};

pub const WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub client: RealtimeClient,
    pub connector: MemoryConnector,
    pub acceptor: MemoryAcceptor,
}

pub fn config() -> RealtimeConfig {
    let mut config = RealtimeConfig::new("http://localhost:54321", "anon-key");
    // Heartbeats are driven by hand through `RealtimeClient::heartbeat`.
    config.heartbeat_interval_ms = 60_000;
    config.reconnect_delay_ms = 10;
    config
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: RealtimeConfig) -> Harness {
    let (connector, acceptor) = MemoryConnector::pair();
    let client = RealtimeClient::builder(config)
        .connector(Arc::new(connector.clone()))
        .build()
        .unwrap();
    Harness {
        client,
        connector,
        acceptor,
    }
}

pub async fn accept(acceptor: &mut MemoryAcceptor) -> MemorySession {
    tokio::time::timeout(WAIT, acceptor.accept())
        .await
        .expect("timed out waiting for socket")
        .expect("connector dropped")
}

pub async fn next_envelope(session: &mut MemorySession) -> Envelope {
    tokio::time::timeout(WAIT, session.next_envelope())
        .await
        .expect("timed out waiting for frame")
        .expect("socket closed")
}

/// Next envelope with `event`, skipping anything else.
pub async fn expect_event(session: &mut MemorySession, event: &str) -> Envelope {
    loop {
        let envelope = next_envelope(session).await;
        if envelope.event == event {
            return envelope;
        }
    }
}

/// Everything the client sends until it has been quiet for `quiet`.
pub async fn drain(session: &mut MemorySession, quiet: Duration) -> Vec<Envelope> {
    let mut seen = Vec::new();
    while let Ok(Some(envelope)) = tokio::time::timeout(quiet, session.next_envelope()).await {
        seen.push(envelope);
    }
    seen
}

pub fn reply(session: &MemorySession, topic: &str, status: &str, response: Value) {
    session.push(&Envelope::new(
        topic,
        "phx_reply",
        json!({ "status": status, "response": response }),
        None,
    ));
}

pub async fn wait_status(channel: &Channel, status: ChannelStatus) {
    let mut rx = channel.status_stream();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == status))
        .await
        .unwrap_or_else(|_| panic!("{} never became {status:?}", channel.topic()))
        .unwrap();
}

/// Subscribe `channel` on an already open `session` and acknowledge the
/// join with `response`.
pub async fn join(session: &mut MemorySession, channel: &Channel, response: Value) -> Envelope {
    channel.subscribe(false).await.unwrap();
    let join = expect_event(session, "phx_join").await;
    assert_eq!(join.topic, channel.topic());
    reply(session, channel.topic(), "ok", response);
    wait_status(channel, ChannelStatus::Subscribed).await;
    join
}

pub fn count_by_topic(envelopes: &[Envelope], event: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for envelope in envelopes.iter().filter(|e| e.event == event) {
        *counts.entry(envelope.topic.clone()).or_default() += 1;
    }
    counts
}

pub fn token_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

pub fn acked_filter(table: &str, event: &str, id: u64) -> Value {
    json!({ "schema": "public", "table": table, "filter": null, "event": event, "id": id })
}
