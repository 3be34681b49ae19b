/// Errors returned by the relay transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The relay could not be reached (DNS failure, refused connection,
    /// TLS or websocket handshake error). Only the host is reported.
    #[error("relay unavailable at {url}: could not open websocket connection")]
    Unavailable { url: String },

    #[error("link closed")]
    Closed,

    #[error("payload serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("payload deserialization failed: {0}")]
    Deserialization(String),

    #[error("relay rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
}

impl From<url::ParseError> for TransportError {
    fn from(e: url::ParseError) -> Self {
        TransportError::InvalidUrl(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unavailable() {
        let err = TransportError::Unavailable {
            url: "wss://relay.example.com".into(),
        };
        assert_eq!(
            err.to_string(),
            "relay unavailable at wss://relay.example.com: could not open websocket connection"
        );
    }

    #[test]
    fn test_display_rpc() {
        let err = TransportError::Rpc {
            code: -32601,
            message: "method not found".into(),
        };
        assert_eq!(err.to_string(), "relay rpc error -32601: method not found");
    }

    #[test]
    fn test_display_closed() {
        assert_eq!(TransportError::Closed.to_string(), "link closed");
    }

    #[test]
    fn test_from_url_parse_error() {
        let err: TransportError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
    }
}
