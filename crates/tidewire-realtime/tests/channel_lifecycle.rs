mod common;

use futures_util::StreamExt;
use serde_json::json;

use common::*;
use tidewire_realtime::{
    ChangeFilter, ChangeKind, ChannelStatus, ConnectionStatus, Envelope, RealtimeError,
};

#[tokio::test]
async fn blocking_subscribe_resolves_on_join_ack() {
    let mut h = harness();
    let channel = h.client.channel("orders");
    channel
        .add_change_filter(ChangeFilter::new("public").table("orders"))
        .unwrap();

    let task = tokio::spawn({
        let channel = channel.clone();
        async move { channel.subscribe(true).await }
    });

    let mut session = accept(&mut h.acceptor).await;
    let join = expect_event(&mut session, "phx_join").await;
    assert_eq!(join.topic, "realtime:orders");
    assert_eq!(join.msg_ref, None);
    assert_eq!(
        join.payload["config"]["postgres_changes"],
        json!([{ "schema": "public", "table": "orders", "event": "*" }])
    );
    assert_eq!(channel.status(), ChannelStatus::Subscribing);

    reply(&session, "realtime:orders", "ok", json!({ "postgres_changes": [] }));
    task.await.unwrap().unwrap();
    assert_eq!(channel.status(), ChannelStatus::Subscribed);
}

#[tokio::test]
async fn rejected_join_fails_blocking_subscribe() {
    let mut h = harness();
    let channel = h.client.channel("secret");

    let task = tokio::spawn({
        let channel = channel.clone();
        async move { channel.subscribe(true).await }
    });

    let mut session = accept(&mut h.acceptor).await;
    expect_event(&mut session, "phx_join").await;
    reply(
        &session,
        "realtime:secret",
        "error",
        json!({ "reason": "unauthorized" }),
    );

    match task.await.unwrap() {
        Err(RealtimeError::JoinRejected { topic, reason }) => {
            assert_eq!(topic, "realtime:secret");
            assert_eq!(reason, "unauthorized");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(channel.status(), ChannelStatus::Unsubscribed);
}

#[tokio::test]
async fn subscribe_without_auto_connect_requires_connection() {
    let mut config = config();
    config.connect_on_subscribe = false;
    let h = harness_with(config);
    let err = h.client.channel("room").subscribe(false).await.unwrap_err();
    assert!(matches!(err, RealtimeError::NotConnected));
    assert_eq!(h.connector.open_count(), 0);
}

#[tokio::test]
async fn filters_are_frozen_once_joined() {
    let mut h = harness();
    h.client.connect().await;
    let mut session = accept(&mut h.acceptor).await;
    let channel = h.client.channel("orders");
    let orders = ChangeFilter::new("public").table("orders");
    channel.add_change_filter(orders.clone()).unwrap();
    join(&mut session, &channel, json!({})).await;

    let err = channel
        .add_change_filter(orders.clone().on(ChangeKind::Insert))
        .unwrap_err();
    assert!(matches!(err, RealtimeError::FilterAfterJoin { .. }));
    assert_eq!(channel.client_filters(), vec![orders]);
}

#[tokio::test]
async fn track_only_after_subscribe() {
    let mut h = harness();
    h.client.connect().await;
    let mut session = accept(&mut h.acceptor).await;
    let channel = h.client.channel("lobby");

    let err = channel.track(&json!({ "online": true })).await.unwrap_err();
    assert!(matches!(err, RealtimeError::NotSubscribed { .. }));

    join(&mut session, &channel, json!({})).await;
    channel.track(&json!({ "online": true })).await.unwrap();
    let track = expect_event(&mut session, "presence").await;
    assert_eq!(track.topic, "realtime:lobby");
    assert!(track.msg_ref.is_some());
    assert_eq!(
        track.payload,
        json!({ "type": "presence", "event": "track", "payload": { "online": true } })
    );

    channel.untrack().await.unwrap();
    let untrack = expect_event(&mut session, "presence").await;
    assert_eq!(untrack.payload, json!({ "type": "presence", "event": "untrack" }));
}

#[tokio::test]
async fn broadcast_goes_over_socket_when_joined() {
    let mut h = harness();
    h.client.connect().await;
    let mut session = accept(&mut h.acceptor).await;
    let channel = h.client.channel("room");
    join(&mut session, &channel, json!({})).await;

    channel
        .broadcast("cursor", &json!({ "x": 3, "y": 4 }))
        .await
        .unwrap();
    let sent = expect_event(&mut session, "broadcast").await;
    assert_eq!(sent.topic, "realtime:room");
    assert!(sent.ref_number().is_some());
    assert_eq!(
        sent.payload,
        json!({ "type": "broadcast", "event": "cursor", "payload": { "x": 3, "y": 4 } })
    );
}

#[tokio::test]
async fn unsubscribe_waits_for_leave_ack() {
    let mut h = harness();
    h.client.connect().await;
    let mut session = accept(&mut h.acceptor).await;
    let channel = h.client.channel("room");
    join(&mut session, &channel, json!({})).await;

    channel.unsubscribe().await.unwrap();
    assert_eq!(channel.status(), ChannelStatus::Unsubscribing);
    let leave = expect_event(&mut session, "phx_leave").await;
    assert_eq!(leave.topic, "realtime:room");

    reply(&session, "realtime:room", "ok", json!({}));
    wait_status(&channel, ChannelStatus::Unsubscribed).await;
}

#[tokio::test]
async fn removing_last_channel_disconnects() {
    let mut h = harness();
    h.client.connect().await;
    let mut session = accept(&mut h.acceptor).await;
    let channel = h.client.channel("room");
    join(&mut session, &channel, json!({})).await;

    h.client.remove_channel(&channel).await;
    expect_event(&mut session, "phx_leave").await;
    assert!(h.client.subscriptions().is_empty());
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn remove_all_keeps_socket_when_configured() {
    let mut config = config();
    config.disconnect_on_no_subscriptions = false;
    let mut h = harness_with(config);
    h.client.connect().await;
    let mut session = accept(&mut h.acceptor).await;
    let a = h.client.channel("a");
    let b = h.client.channel("b");
    join(&mut session, &a, json!({})).await;
    join(&mut session, &b, json!({})).await;

    h.client.remove_all_channels().await;
    let leaves = drain(&mut session, std::time::Duration::from_millis(100)).await;
    let counts = count_by_topic(&leaves, "phx_leave");
    assert_eq!(counts.get("realtime:a"), Some(&1));
    assert_eq!(counts.get("realtime:b"), Some(&1));
    assert!(h.client.subscriptions().is_empty());
    assert_eq!(h.client.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn close_cancels_blocking_subscribe() {
    let mut h = harness();
    let channel = h.client.channel("room");
    let task = tokio::spawn({
        let channel = channel.clone();
        async move { channel.subscribe(true).await }
    });

    let mut session = accept(&mut h.acceptor).await;
    expect_event(&mut session, "phx_join").await;
    h.client.close().await;

    assert!(matches!(
        task.await.unwrap(),
        Err(RealtimeError::Cancelled)
    ));
    assert_eq!(h.client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn removed_channel_settles_and_refuses_rejoin() {
    let mut config = config();
    config.disconnect_on_no_subscriptions = false;
    let mut h = harness_with(config);
    h.client.connect().await;
    let mut session = accept(&mut h.acceptor).await;
    let channel = h.client.channel("room");
    join(&mut session, &channel, json!({})).await;

    h.client.remove_channel(&channel).await;
    expect_event(&mut session, "phx_leave").await;
    // The leave ack is no longer routed, so the handle settles locally.
    assert_eq!(channel.status(), ChannelStatus::Unsubscribed);

    let err = channel.subscribe(true).await.unwrap_err();
    assert!(matches!(err, RealtimeError::ChannelRemoved { .. }));
    let sent = drain(&mut session, std::time::Duration::from_millis(100)).await;
    assert!(sent.iter().all(|e| e.event != "phx_join"));
    assert!(h.client.subscriptions().is_empty());
}

#[tokio::test]
async fn rejected_push_keeps_channel_joined() {
    let mut h = harness();
    h.client.connect().await;
    let mut session = accept(&mut h.acceptor).await;
    let channel = h.client.channel("lobby");
    join(&mut session, &channel, json!({})).await;

    channel.track(&json!({ "online": true })).await.unwrap();
    let track = expect_event(&mut session, "presence").await;
    session.push(&Envelope::new(
        "realtime:lobby",
        "phx_reply",
        json!({ "status": "error", "response": { "reason": "rate limited" } }),
        track.ref_number(),
    ));
    // Round-trip a broadcast so the rejection has been handled.
    let mut done = channel.broadcast_feed("done");
    done.activate();
    session.push(&Envelope::new(
        "realtime:lobby",
        "broadcast",
        json!({ "type": "broadcast", "event": "done", "payload": {} }),
        None,
    ));
    tokio::time::timeout(WAIT, done.next()).await.unwrap().unwrap();

    assert_eq!(channel.status(), ChannelStatus::Subscribed);
    channel.track(&json!({ "online": false })).await.unwrap();
    expect_event(&mut session, "presence").await;
}
