//! Access tokens and the auth session seam.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use tokio::sync::watch;

use tidewire_common::RealtimeError;

/// Session state reported by an auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Authenticated { access_token: String },
    NotAuthenticated,
}

/// An external authentication session the client follows.
///
/// When attached, the client takes its access token from the session and
/// reacts to status changes: a new token is pushed to joined channels and
/// a sign-out disconnects the socket when so configured.
pub trait AuthSession: Send + Sync {
    fn current_access_token(&self) -> Option<String>;

    fn session_status(&self) -> watch::Receiver<SessionStatus>;
}

/// Reject a JWT whose `exp` claim lies in the past.
///
/// Only the payload segment is decoded; the signature is the server's
/// business. Tokens without `exp` are accepted.
pub(crate) fn ensure_not_expired(token: &str) -> Result<(), RealtimeError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(RealtimeError::InvalidToken("expected three segments".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| RealtimeError::InvalidToken(format!("payload is not base64url: {e}")))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| RealtimeError::InvalidToken(format!("payload is not JSON: {e}")))?;

    match claims.get("exp").and_then(|exp| exp.as_f64()) {
        Some(exp) if exp < Utc::now().timestamp() as f64 => Err(RealtimeError::TokenExpired),
        _ => Ok(()),
    }
}
