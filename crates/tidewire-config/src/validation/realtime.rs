//! Validation for the `[realtime]` section.

use crate::schema::TidewireConfig;

use super::helpers::{validate_range, validate_scheme};

/// Validate the server address and key.
pub(crate) fn validate_endpoint(errors: &mut Vec<String>, config: &TidewireConfig) {
    let rt = &config.realtime;

    match &rt.websocket_url {
        Some(ws_url) => validate_scheme(errors, "realtime.websocket_url", ws_url, &["ws", "wss"]),
        None if rt.url.is_empty() => errors.push("realtime.url is empty".to_string()),
        None => validate_scheme(
            errors,
            "realtime.url",
            &rt.url,
            &["http", "https", "ws", "wss"],
        ),
    }

    if rt.api_key.trim().is_empty() {
        errors.push("realtime.api_key is empty".to_string());
    }
}

/// Validate heartbeat, reconnect, and timeout durations.
pub(crate) fn validate_timing(errors: &mut Vec<String>, config: &TidewireConfig) {
    let rt = &config.realtime;
    validate_range(
        errors,
        "realtime.heartbeat_interval_ms",
        rt.heartbeat_interval_ms,
        100,
        300_000,
    );
    validate_range(
        errors,
        "realtime.reconnect_delay_ms",
        rt.reconnect_delay_ms,
        0,
        600_000,
    );
    validate_range(
        errors,
        "realtime.connect_timeout_ms",
        rt.connect_timeout_ms,
        100,
        120_000,
    );
}
