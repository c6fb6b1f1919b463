use async_trait::async_trait;
use futures_util::{stream, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::debug;

use tidewire_common::RealtimeError;

use super::{Connector, SocketSink, SocketStream};

/// Opens a WebSocket with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<(SocketSink, SocketStream), RealtimeError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;
        let (write, read) = ws.split();

        let sink = write
            .with(|text: String| async move {
                Ok::<_, tungstenite::Error>(WsMessage::Text(text.into()))
            })
            .sink_map_err(|e| RealtimeError::Transport(e.to_string()));

        // Only text frames carry protocol messages; pings are answered by
        // tungstenite itself.
        let frames = stream::unfold(read, |mut read| async move {
            loop {
                match read.next().await? {
                    Ok(WsMessage::Text(text)) => {
                        return Some((Ok(text.as_str().to_owned()), read));
                    }
                    Ok(WsMessage::Close(frame)) => {
                        debug!(?frame, "WebSocket closed by server");
                        return None;
                    }
                    Ok(_) => continue,
                    Err(e) => return Some((Err(RealtimeError::Transport(e.to_string())), read)),
                }
            }
        });

        Ok((Box::pin(sink), Box::pin(frames)))
    }
}
