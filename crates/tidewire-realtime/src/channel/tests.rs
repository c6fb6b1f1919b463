use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::json;

use super::*;
use crate::change::ChangeKind;

fn detached(name: &str) -> Channel {
    Channel::new(
        name.to_string(),
        format!("realtime:{name}"),
        ChannelOptions::default(),
        Weak::new(),
    )
}

fn push(channel: &Channel, event: &str, payload: Value) {
    channel.handle(&Envelope::new(channel.topic(), event, payload, None));
}

fn orders() -> ChangeFilter {
    ChangeFilter::new("public").table("orders")
}

#[test]
fn filters_are_deduplicated_in_order() {
    let channel = detached("room");
    channel.add_change_filter(orders()).unwrap();
    channel.add_change_filter(orders().on(ChangeKind::Insert)).unwrap();
    channel.add_change_filter(orders()).unwrap();
    assert_eq!(
        channel.client_filters(),
        vec![orders(), orders().on(ChangeKind::Insert)]
    );
}

#[test]
fn filter_after_join_fails_and_leaves_set_unchanged() {
    let channel = detached("room");
    channel.add_change_filter(orders()).unwrap();
    let _ = channel.begin_join(None);
    push(&channel, "phx_reply", json!({ "status": "ok", "response": {} }));
    assert_eq!(channel.status(), ChannelStatus::Subscribed);

    let err = channel
        .add_change_filter(orders().on(ChangeKind::Delete))
        .unwrap_err();
    assert!(matches!(err, RealtimeError::FilterAfterJoin { .. }));
    assert_eq!(channel.client_filters(), vec![orders()]);

    assert!(channel.change_feed(orders().on(ChangeKind::Delete)).is_err());
    assert!(channel.on_change(orders(), |_| {}).is_err());
}

#[test]
fn join_envelope_carries_config() {
    let options = ChannelOptions {
        broadcast: BroadcastJoinConfig {
            ack: true,
            receive_own: true,
        },
        presence: PresenceJoinConfig {
            key: "user-7".into(),
        },
        private: true,
    };
    let channel = Channel::new("room".into(), "realtime:room".into(), options, Weak::new());
    channel.add_change_filter(orders()).unwrap();

    let join = channel.begin_join(Some("jwt".into()));
    assert_eq!(channel.status(), ChannelStatus::Subscribing);
    assert_eq!(join.topic, "realtime:room");
    assert_eq!(join.event, "phx_join");
    assert_eq!(join.msg_ref, None);
    assert_eq!(join.payload["access_token"], json!("jwt"));
    assert_eq!(join.payload["config"]["broadcast"], json!({ "ack": true, "self": true }));
    assert_eq!(join.payload["config"]["presence"]["key"], json!("user-7"));
    assert_eq!(join.payload["config"]["private"], json!(true));
    assert_eq!(
        join.payload["config"]["postgres_changes"][0]["table"],
        json!("orders")
    );
}

#[test]
fn join_reply_stores_acknowledged_filters() {
    let channel = detached("room");
    let _ = channel.begin_join(None);
    push(
        &channel,
        "phx_reply",
        json!({
            "status": "ok",
            "response": {
                "postgres_changes": [
                    { "schema": "public", "table": "orders", "filter": null, "event": "*", "id": 12 }
                ]
            }
        }),
    );
    assert_eq!(channel.status(), ChannelStatus::Subscribed);
    assert_eq!(channel.server_filters()[0].id, Some(12));
}

#[test]
fn rejected_join_records_reason() {
    let channel = detached("room");
    let _ = channel.begin_join(None);
    push(
        &channel,
        "phx_reply",
        json!({ "status": "error", "response": { "reason": "unauthorized" } }),
    );
    assert_eq!(channel.status(), ChannelStatus::Unsubscribed);
    assert_eq!(
        lock(&channel.inner.last_error).as_deref(),
        Some("unauthorized")
    );
}

#[test]
fn leave_ack_and_close_unsubscribe() {
    let channel = detached("room");
    let _ = channel.begin_join(None);
    push(&channel, "phx_reply", json!({ "status": "ok", "response": {} }));
    channel.set_status(ChannelStatus::Unsubscribing);
    push(&channel, "phx_reply", json!({ "status": "ok", "response": {} }));
    assert_eq!(channel.status(), ChannelStatus::Unsubscribed);

    let _ = channel.begin_join(None);
    push(&channel, "phx_reply", json!({ "status": "ok", "response": {} }));
    push(&channel, "phx_close", json!({}));
    assert_eq!(channel.status(), ChannelStatus::Unsubscribed);
}

#[test]
fn expired_token_message_unsubscribes() {
    let channel = detached("room");
    let _ = channel.begin_join(None);
    push(&channel, "phx_reply", json!({ "status": "ok", "response": {} }));
    push(
        &channel,
        "system",
        json!({ "status": "error", "message": "access token has expired" }),
    );
    assert_eq!(channel.status(), ChannelStatus::Unsubscribed);
}

#[test]
fn presence_pushes_update_state_and_callbacks() {
    let channel = detached("room");
    let seen = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&seen);
    channel.on_presence(move |_| {
        s.fetch_add(1, Ordering::SeqCst);
    });

    push(
        &channel,
        "presence_state",
        json!({ "u1": { "metas": [{ "phx_ref": "a", "name": "ada" }] } }),
    );
    push(
        &channel,
        "presence_diff",
        json!({
            "joins": { "u2": { "metas": [{ "phx_ref": "b" }] } },
            "leaves": { "u1": { "metas": [{ "phx_ref": "a" }] } }
        }),
    );

    let state = channel.presence_state();
    assert_eq!(state.len(), 1);
    assert!(state.contains_key("u2"));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn presence_state_replaces_known_presences() {
    let channel = detached("room");
    let joined = Arc::new(Mutex::new(Vec::new()));
    let j = Arc::clone(&joined);
    channel.on_presence(move |diff| {
        let mut keys: Vec<String> = diff.joins.keys().cloned().collect();
        keys.sort();
        j.lock().unwrap().push(keys);
    });

    push(
        &channel,
        "presence_state",
        json!({ "a": { "metas": [{ "phx_ref": "1" }] } }),
    );
    push(
        &channel,
        "presence_state",
        json!({ "b": { "metas": [{ "phx_ref": "2" }] } }),
    );

    let keys: Vec<String> = channel.presence_state().into_keys().collect();
    assert_eq!(keys, vec!["b".to_string()]);
    assert_eq!(
        *joined.lock().unwrap(),
        vec![vec!["a".to_string()], vec!["b".to_string()]]
    );
}

#[test]
fn rejected_push_keeps_channel_joined() {
    let channel = detached("room");
    let _ = channel.begin_join(None);
    push(&channel, "phx_reply", json!({ "status": "ok", "response": {} }));

    channel.handle(&Envelope::new(
        channel.topic(),
        "phx_reply",
        json!({ "status": "error", "response": { "reason": "rate limited" } }),
        Some(7),
    ));
    assert_eq!(channel.status(), ChannelStatus::Subscribed);
    assert_eq!(lock(&channel.inner.last_error).as_deref(), None);
}

#[test]
fn rejected_leave_unsubscribes() {
    let channel = detached("room");
    let _ = channel.begin_join(None);
    push(&channel, "phx_reply", json!({ "status": "ok", "response": {} }));
    channel.set_status(ChannelStatus::Unsubscribing);
    push(
        &channel,
        "phx_reply",
        json!({ "status": "error", "response": { "reason": "unknown topic" } }),
    );
    assert_eq!(channel.status(), ChannelStatus::Unsubscribed);
}

#[test]
fn broadcast_callback_removal() {
    let channel = detached("room");
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let id = channel.on_broadcast("ping", move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    let payload = json!({ "type": "broadcast", "event": "ping", "payload": {} });
    push(&channel, "broadcast", payload.clone());
    assert!(channel.remove_callback(id));
    push(&channel, "broadcast", payload);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn track_requires_subscription() {
    let channel = detached("room");
    let err = channel.track(&json!({ "online": true })).await.unwrap_err();
    assert!(matches!(err, RealtimeError::NotSubscribed { .. }));
    let err = channel.untrack().await.unwrap_err();
    assert!(matches!(err, RealtimeError::NotSubscribed { .. }));
}

#[tokio::test]
async fn broadcast_requires_object_payload() {
    let channel = detached("room");
    let err = channel.broadcast("ping", &json!([1, 2])).await.unwrap_err();
    assert!(matches!(err, RealtimeError::InvalidPayload(_)));
    let err = channel.broadcast("ping", "text").await.unwrap_err();
    assert!(matches!(err, RealtimeError::InvalidPayload(_)));
}

#[tokio::test]
async fn removed_channel_reports_removal() {
    let channel = detached("room");
    channel.mark_removed();
    channel.settle_removed();
    assert_eq!(channel.status(), ChannelStatus::Unsubscribed);
    assert!(matches!(
        channel.subscribe(true).await,
        Err(RealtimeError::ChannelRemoved { .. })
    ));
}

#[tokio::test]
async fn detached_channel_reports_closed_client() {
    let channel = detached("room");
    assert!(matches!(
        channel.subscribe(false).await,
        Err(RealtimeError::ClientClosed)
    ));
    assert!(matches!(
        channel.broadcast("ping", &json!({})).await,
        Err(RealtimeError::ClientClosed)
    ));
}
