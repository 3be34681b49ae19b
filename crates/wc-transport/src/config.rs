/// Relay connection URL helpers.
use url::Url;

use crate::TransportError;

/// Public WalletConnect relay.
pub const DEFAULT_RELAY_URL: &str = "wss://relay.walletconnect.com";

/// Build the relay websocket URL carrying auth, project id and user agent.
///
/// ```rust
/// let url = wc_transport::format_relay_rpc_url(
///     "wss://relay.walletconnect.com",
///     "header.payload.sig",
///     Some("project"),
///     "wc-2/rust-0.1.0/linux",
/// ).unwrap();
/// assert!(url.starts_with("wss://relay.walletconnect.com/?auth=header.payload.sig"));
/// ```
pub fn format_relay_rpc_url(
    relay_url: &str,
    auth: &str,
    project_id: Option<&str>,
    user_agent: &str,
) -> Result<String, TransportError> {
    let mut url = Url::parse(relay_url)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("auth", auth);
        if let Some(project_id) = project_id {
            query.append_pair("projectId", project_id);
        }
        query.append_pair("ua", user_agent);
    }
    Ok(url.to_string())
}

/// Strip query and credentials so the URL can appear in errors and logs.
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => match url.host_str() {
            Some(host) => match url.port() {
                Some(port) => format!("{}://{host}:{port}", url.scheme()),
                None => format!("{}://{host}", url.scheme()),
            },
            None => url.scheme().to_string(),
        },
        Err(_) => raw.split('?').next().unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_all_query_params() {
        let url = format_relay_rpc_url(DEFAULT_RELAY_URL, "jwt", Some("p1"), "wc-2/rust-0.1.0/linux")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("auth".to_string(), "jwt".to_string()),
                ("projectId".to_string(), "p1".to_string()),
                ("ua".to_string(), "wc-2/rust-0.1.0/linux".to_string()),
            ]
        );
    }

    #[test]
    fn project_id_is_optional() {
        let url = format_relay_rpc_url("ws://localhost:5555", "jwt", None, "ua").unwrap();
        assert!(!url.contains("projectId"));
    }

    #[test]
    fn invalid_relay_url() {
        let err = format_relay_rpc_url("relay without scheme", "jwt", None, "ua").unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }

    #[test]
    fn redact_removes_auth() {
        let raw = "wss://relay.walletconnect.com/?auth=secret&projectId=p";
        assert_eq!(redact_url(raw), "wss://relay.walletconnect.com");
        assert_eq!(redact_url("ws://127.0.0.1:9000/?auth=x"), "ws://127.0.0.1:9000");
    }
}
