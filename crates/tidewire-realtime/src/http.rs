//! HTTP fallback for broadcasts sent while a channel is not joined.

use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use tidewire_common::RealtimeError;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct BroadcastMessage {
    /// Channel name without the `realtime:` prefix.
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    pub private: bool,
}

#[derive(Serialize)]
struct BroadcastBody<'a> {
    messages: &'a [BroadcastMessage],
}

#[derive(Clone)]
pub(crate) struct BroadcastApi {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl std::fmt::Debug for BroadcastApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastApi")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl BroadcastApi {
    pub fn new(http: reqwest::Client, endpoint: Url, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint,
            api_key: api_key.into(),
        }
    }

    pub async fn send(
        &self,
        message: BroadcastMessage,
        access_token: Option<&str>,
    ) -> Result<(), RealtimeError> {
        debug!(topic = %message.topic, event = %message.event, "HTTP broadcast");

        let messages = [message];
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header("apikey", &self.api_key)
            .json(&BroadcastBody {
                messages: &messages,
            });
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RealtimeError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text = text.chars().take(200).collect::<String>();
            return Err(RealtimeError::Http(format!("HTTP {status}: {text}")));
        }
        Ok(())
    }
}
