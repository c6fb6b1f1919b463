//! `listen` and `send`.

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::{info, warn};

use tidewire_common::{RealtimeError, TidewireError};
use tidewire_config::RealtimeConfig;
use tidewire_realtime::{
    BroadcastJoinConfig, ChangeFilter, ChangeKind, ChannelOptions, RealtimeClient,
};

use crate::Command;

pub(crate) async fn run(config: RealtimeConfig, command: Command) -> Result<(), TidewireError> {
    let client = RealtimeClient::new(config)?;
    let result = match command {
        Command::Listen {
            channel,
            table,
            schema,
            kinds,
            filter,
            events,
            presence,
            receive_own,
            private,
        } => {
            let options = ChannelOptions {
                broadcast: BroadcastJoinConfig {
                    ack: false,
                    receive_own,
                },
                private,
                ..Default::default()
            };
            let filters = match table {
                Some(table) => change_filters(&schema, &table, filter.as_deref(), &kinds)?,
                None => Vec::new(),
            };
            listen(&client, &channel, options, filters, events, presence).await
        }
        Command::Send {
            channel,
            event,
            payload,
            join,
            private,
        } => {
            let payload: Value = serde_json::from_str(&payload)
                .map_err(|e| RealtimeError::InvalidPayload(format!("payload is not JSON: {e}")))?;
            let options = ChannelOptions {
                private,
                ..Default::default()
            };
            send(&client, &channel, options, &event, &payload, join).await
        }
    };
    client.close().await;
    result
}

/// One filter per requested kind, or a single wildcard filter.
fn change_filters(
    schema: &str,
    table: &str,
    predicate: Option<&str>,
    kinds: &[String],
) -> Result<Vec<ChangeFilter>, RealtimeError> {
    let mut base = ChangeFilter::new(schema).table(table);
    if let Some(predicate) = predicate {
        base = base.predicate(predicate);
    }
    if kinds.is_empty() {
        return Ok(vec![base]);
    }
    kinds
        .iter()
        .map(|k| Ok(base.clone().on(k.parse::<ChangeKind>()?)))
        .collect()
}

async fn listen(
    client: &RealtimeClient,
    name: &str,
    options: ChannelOptions,
    filters: Vec<ChangeFilter>,
    events: Vec<String>,
    presence: bool,
) -> Result<(), TidewireError> {
    let channel = client.channel_with(name, options);

    let mut feeds: Vec<BoxStream<'static, Value>> = Vec::new();
    for filter in filters {
        let mut feed = channel.change_feed(filter)?;
        feed.activate();
        feeds.push(
            feed.map(|change| json!({ "type": "change", "change": change }))
                .boxed(),
        );
    }
    for event in events {
        let mut feed = channel.broadcast_feed(event.clone());
        feed.activate();
        feeds.push(
            feed.map(move |payload| {
                json!({ "type": "broadcast", "event": event, "payload": payload })
            })
            .boxed(),
        );
    }
    if presence {
        let mut feed = channel.presence_feed();
        feed.activate();
        feeds.push(
            feed.map(|diff| {
                let joins: Vec<&String> = diff.joins.keys().collect();
                let leaves: Vec<&String> = diff.leaves.keys().collect();
                json!({ "type": "presence", "joins": joins, "leaves": leaves })
            })
            .boxed(),
        );
    }
    if feeds.is_empty() {
        warn!(channel = %name, "Nothing to listen for; pass --table, --event or --presence");
    }

    let mut lines = stream::select_all(feeds);

    channel.subscribe(true).await?;
    info!(topic = %channel.topic(), "Listening");

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(line) => println!("{line}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    channel.unsubscribe().await?;
    Ok(())
}

async fn send(
    client: &RealtimeClient,
    name: &str,
    options: ChannelOptions,
    event: &str,
    payload: &Value,
    join: bool,
) -> Result<(), TidewireError> {
    let channel = client.channel_with(name, options);
    if join {
        channel.subscribe(true).await?;
    }
    channel.broadcast(event, payload).await?;
    let via = if join { "socket" } else { "http" };
    info!(topic = %channel.topic(), event = %event, via, "Sent");
    if join {
        channel.unsubscribe().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_kinds_gives_one_wildcard_filter() {
        let filters = change_filters("public", "orders", None, &[]).unwrap();
        assert_eq!(filters.len(), 1);
        assert!(filters[0].is_wildcard());
        assert_eq!(filters[0].table.as_deref(), Some("orders"));
    }

    #[test]
    fn kinds_become_separate_filters() {
        let kinds = vec!["insert".to_string(), "DELETE".to_string()];
        let filters = change_filters("app", "users", Some("id=eq.1"), &kinds).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].event, "INSERT");
        assert_eq!(filters[1].event, "DELETE");
        assert!(filters.iter().all(|f| f.predicate.as_deref() == Some("id=eq.1")));
        assert!(filters.iter().all(|f| f.schema == "app"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let kinds = vec!["TRUNCATE".to_string()];
        assert!(change_filters("public", "orders", None, &kinds).is_err());
    }
}
