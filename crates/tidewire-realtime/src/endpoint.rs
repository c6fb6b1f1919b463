//! Endpoint URLs derived from the configured project URL.

use reqwest::Url;

use tidewire_common::RealtimeError;
use tidewire_config::RealtimeConfig;

/// Protocol version sent as the `vsn` query parameter.
pub const PROTOCOL_VERSION: &str = "1.0.0";

const WEBSOCKET_PATH: &str = "realtime/v1/websocket";
const BROADCAST_PATH: &str = "realtime/v1/api/broadcast";

/// The socket URL: `{ws|wss}://<host>/realtime/v1/websocket?apikey=<key>&vsn=1.0.0`.
///
/// An explicit `websocket_url` is used as given, with `apikey` and `vsn`
/// appended when it does not already carry them.
pub fn websocket_url(config: &RealtimeConfig) -> Result<Url, RealtimeError> {
    let mut url = match &config.websocket_url {
        Some(explicit) => {
            let url = parse(explicit)?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(RealtimeError::InvalidUrl(format!(
                    "websocket_url must use ws or wss, got {}",
                    url.scheme()
                )));
            }
            url
        }
        None => {
            let mut url = parse(&config.url)?;
            let secure = config.secure.unwrap_or(match url.scheme() {
                "http" | "ws" => false,
                "https" | "wss" => true,
                other => {
                    return Err(RealtimeError::InvalidUrl(format!(
                        "unsupported scheme: {other}"
                    )))
                }
            });
            set_scheme(&mut url, if secure { "wss" } else { "ws" })?;
            append_path(&mut url, WEBSOCKET_PATH);
            url
        }
    };

    let has = |name: &str| url.query_pairs().any(|(k, _)| k == name);
    let (has_key, has_vsn) = (has("apikey"), has("vsn"));
    {
        let mut query = url.query_pairs_mut();
        if !has_key {
            query.append_pair("apikey", &config.api_key);
        }
        if !has_vsn {
            query.append_pair("vsn", PROTOCOL_VERSION);
        }
    }
    Ok(url)
}

/// The HTTP broadcast endpoint: `<host>/realtime/v1/api/broadcast`.
pub fn broadcast_url(config: &RealtimeConfig) -> Result<Url, RealtimeError> {
    let mut url = if config.url.is_empty() {
        // Only a socket URL was configured; reuse its host.
        let socket = config
            .websocket_url
            .as_deref()
            .ok_or_else(|| RealtimeError::InvalidUrl("no url configured".into()))?;
        let mut url = parse(socket)?;
        url.set_path("/");
        url.set_query(None);
        url
    } else {
        parse(&config.url)?
    };

    let secure = config
        .secure
        .unwrap_or(matches!(url.scheme(), "https" | "wss"));
    set_scheme(&mut url, if secure { "https" } else { "http" })?;
    append_path(&mut url, BROADCAST_PATH);
    url.set_query(None);
    Ok(url)
}

fn parse(raw: &str) -> Result<Url, RealtimeError> {
    Url::parse(raw).map_err(|e| RealtimeError::InvalidUrl(format!("{raw}: {e}")))
}

fn set_scheme(url: &mut Url, scheme: &str) -> Result<(), RealtimeError> {
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::InvalidUrl(format!("cannot switch {url} to {scheme}")))
}

fn append_path(url: &mut Url, suffix: &str) {
    let mut path = url.path().to_string();
    if !path.ends_with('/') {
        path.push('/');
    }
    path.push_str(suffix);
    url.set_path(&path);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> RealtimeConfig {
        RealtimeConfig::new(url, "anon-key")
    }

    #[test]
    fn http_maps_to_ws() {
        let url = websocket_url(&config("http://localhost:54321")).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );
    }

    #[test]
    fn https_maps_to_wss() {
        let url = websocket_url(&config("https://abc.example.co")).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );
    }

    #[test]
    fn secure_flag_forces_wss() {
        let mut cfg = config("http://localhost:54321");
        cfg.secure = Some(true);
        assert_eq!(websocket_url(&cfg).unwrap().scheme(), "wss");
    }

    #[test]
    fn base_path_is_kept() {
        let url = websocket_url(&config("http://localhost:54321/project/")).unwrap();
        assert_eq!(url.path(), "/project/realtime/v1/websocket");
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = websocket_url(&config("ftp://localhost")).unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidUrl(_)));
    }

    #[test]
    fn explicit_websocket_url_overrides() {
        let mut cfg = config("https://abc.example.co");
        cfg.websocket_url = Some("ws://127.0.0.1:4000/socket/websocket?vsn=1.0.0".into());
        let url = websocket_url(&cfg).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:4000/socket/websocket?vsn=1.0.0&apikey=anon-key"
        );

        cfg.websocket_url = Some("http://127.0.0.1:4000/socket".into());
        assert!(websocket_url(&cfg).is_err());
    }

    #[test]
    fn broadcast_endpoint() {
        let url = broadcast_url(&config("https://abc.example.co")).unwrap();
        assert_eq!(url.as_str(), "https://abc.example.co/realtime/v1/api/broadcast");
    }

    #[test]
    fn broadcast_endpoint_from_socket_url() {
        let mut cfg = config("");
        cfg.websocket_url = Some("wss://rt.example.co/realtime/v1/websocket".into());
        let url = broadcast_url(&cfg).unwrap();
        assert_eq!(url.as_str(), "https://rt.example.co/realtime/v1/api/broadcast");
    }
}
