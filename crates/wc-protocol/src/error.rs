use wc_transport::{ErrorPayload, TransportError};

/// JSON-RPC error object exchanged with peers.
pub type ErrorResponse = ErrorPayload;

/// Errors defined by the sign protocol, shared with peers on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkError {
    InvalidMethod,
    InvalidEvent,
    InvalidUpdateRequest,
    InvalidExtendRequest,
    InvalidSessionSettleRequest,
    UnauthorizedMethod,
    UnauthorizedEvent,
    UnauthorizedUpdateRequest,
    UnauthorizedExtendRequest,
    UserRejected,
    UserRejectedChains,
    UserRejectedMethods,
    UserRejectedEvents,
    UnsupportedChains,
    UnsupportedMethods,
    UnsupportedEvents,
    UnsupportedAccounts,
    UnsupportedNamespaceKey,
    UserDisconnected,
    SessionSettlementFailed,
    WcMethodUnsupported,
}

impl SdkError {
    pub fn code(self) -> i64 {
        match self {
            SdkError::InvalidMethod => 1001,
            SdkError::InvalidEvent => 1002,
            SdkError::InvalidUpdateRequest => 1003,
            SdkError::InvalidExtendRequest => 1004,
            SdkError::InvalidSessionSettleRequest => 1005,
            SdkError::UnauthorizedMethod => 3001,
            SdkError::UnauthorizedEvent => 3002,
            SdkError::UnauthorizedUpdateRequest => 3003,
            SdkError::UnauthorizedExtendRequest => 3004,
            SdkError::UserRejected => 5000,
            SdkError::UserRejectedChains => 5001,
            SdkError::UserRejectedMethods => 5002,
            SdkError::UserRejectedEvents => 5003,
            SdkError::UnsupportedChains => 5100,
            SdkError::UnsupportedMethods => 5101,
            SdkError::UnsupportedEvents => 5102,
            SdkError::UnsupportedAccounts => 5103,
            SdkError::UnsupportedNamespaceKey => 5104,
            SdkError::UserDisconnected => 6000,
            SdkError::SessionSettlementFailed => 7000,
            SdkError::WcMethodUnsupported => 10001,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            SdkError::InvalidMethod => "Invalid method.",
            SdkError::InvalidEvent => "Invalid event.",
            SdkError::InvalidUpdateRequest => "Invalid update request.",
            SdkError::InvalidExtendRequest => "Invalid extend request.",
            SdkError::InvalidSessionSettleRequest => "Invalid session settle request.",
            SdkError::UnauthorizedMethod => "Unauthorized method.",
            SdkError::UnauthorizedEvent => "Unauthorized event.",
            SdkError::UnauthorizedUpdateRequest => "Unauthorized update request.",
            SdkError::UnauthorizedExtendRequest => "Unauthorized extend request.",
            SdkError::UserRejected => "User rejected.",
            SdkError::UserRejectedChains => "User rejected chains.",
            SdkError::UserRejectedMethods => "User rejected methods.",
            SdkError::UserRejectedEvents => "User rejected events.",
            SdkError::UnsupportedChains => "Unsupported chains.",
            SdkError::UnsupportedMethods => "Unsupported methods.",
            SdkError::UnsupportedEvents => "Unsupported events.",
            SdkError::UnsupportedAccounts => "Unsupported accounts.",
            SdkError::UnsupportedNamespaceKey => "Unsupported namespace key.",
            SdkError::UserDisconnected => "User disconnected.",
            SdkError::SessionSettlementFailed => "Session settlement failed.",
            SdkError::WcMethodUnsupported => "Unsupported wc_ method.",
        }
    }

    /// Wire form with the default message.
    pub fn to_response(self) -> ErrorResponse {
        ErrorPayload::new(self.code(), self.message())
    }

    pub fn with_context(self, context: impl Into<String>) -> WalletConnectError {
        WalletConnectError::Sdk {
            kind: self,
            context: context.into(),
        }
    }
}

/// Client-level errors for WalletConnect.
///
/// Every variant maps onto a numeric code through [`code()`](Self::code) so it
/// can be sent back to a peer as a JSON-RPC error.
#[derive(Debug, thiserror::Error)]
pub enum WalletConnectError {
    #[error("not initialized: {name}")]
    NotInitialized { name: String },

    #[error("no matching key: {context}")]
    NoMatchingKey { context: String },

    #[error("no matching {context} with topic: {topic}")]
    NoMatchingTopic { context: String, topic: String },

    #[error("no matching {context} with id: {id}")]
    NoMatchingId { context: String, id: u64 },

    #[error("restore will override: {name}")]
    RestoreWillOverride { name: String },

    #[error("resubscribed with topic: {topic}")]
    Resubscribed { topic: String },

    #[error("missing or invalid: {context}")]
    MissingOrInvalid { context: String },

    #[error("expired: {context}")]
    Expired { context: String },

    #[error("unknown type: {context}")]
    UnknownType { context: String },

    #[error("mismatched topic: {context}")]
    MismatchedTopic { context: String },

    #[error("non conforming namespaces: {context}")]
    NonConformingNamespaces { context: String },

    #[error("record already exists: {context}")]
    RecordAlreadyExists { context: String },

    #[error("{} {context}", .kind.message())]
    Sdk { kind: SdkError, context: String },

    #[error("peer error {code}: {message}")]
    Peer { code: i64, message: String },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("client shut down")]
    Shutdown,
}

impl WalletConnectError {
    /// Numeric error code as carried in JSON-RPC error responses.
    pub fn code(&self) -> i64 {
        match self {
            WalletConnectError::NotInitialized { .. } => 1,
            WalletConnectError::NoMatchingKey { .. }
            | WalletConnectError::NoMatchingTopic { .. }
            | WalletConnectError::NoMatchingId { .. } => 2,
            WalletConnectError::RestoreWillOverride { .. } => 3,
            WalletConnectError::Resubscribed { .. } => 4,
            WalletConnectError::MissingOrInvalid { .. }
            | WalletConnectError::Crypto(_)
            | WalletConnectError::Decode(_)
            | WalletConnectError::Serialization(_) => 5,
            WalletConnectError::Expired { .. } => 6,
            WalletConnectError::UnknownType { .. } => 7,
            WalletConnectError::MismatchedTopic { .. } => 8,
            WalletConnectError::NonConformingNamespaces { .. } => 9,
            WalletConnectError::RecordAlreadyExists { .. } => 10,
            WalletConnectError::Sdk { kind, .. } => kind.code(),
            WalletConnectError::Peer { code, .. } => *code,
            WalletConnectError::Storage(_)
            | WalletConnectError::Transport(_)
            | WalletConnectError::Shutdown => -32000,
        }
    }

    /// Convert into the error object sent to a peer.
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            WalletConnectError::Peer { code, message } => ErrorPayload::new(*code, message.clone()),
            other => ErrorPayload::new(other.code(), other.to_string()),
        }
    }

    pub(crate) fn missing(context: impl Into<String>) -> Self {
        WalletConnectError::MissingOrInvalid {
            context: context.into(),
        }
    }
}

impl From<ErrorResponse> for WalletConnectError {
    fn from(e: ErrorResponse) -> Self {
        WalletConnectError::Peer {
            code: e.code,
            message: e.message,
        }
    }
}

impl From<serde_json::Error> for WalletConnectError {
    fn from(e: serde_json::Error) -> Self {
        WalletConnectError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_not_initialized() {
        let err = WalletConnectError::NotInitialized {
            name: "crypto".into(),
        };
        assert_eq!(err.to_string(), "not initialized: crypto");
        assert_eq!(err.code(), 1);
    }

    #[test]
    fn test_display_no_matching_topic() {
        let err = WalletConnectError::NoMatchingTopic {
            context: "session".into(),
            topic: "abc".into(),
        };
        assert_eq!(err.to_string(), "no matching session with topic: abc");
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn test_display_sdk_error() {
        let err = SdkError::UnsupportedChains.with_context("eip155:5");
        assert_eq!(err.to_string(), "Unsupported chains. eip155:5");
        assert_eq!(err.code(), 5100);
    }

    #[test]
    fn test_peer_error_roundtrip() {
        let err: WalletConnectError = SdkError::UserRejected.to_response().into();
        assert!(matches!(
            &err,
            WalletConnectError::Peer { code: 5000, message } if message == "User rejected."
        ));
        assert_eq!(err.to_response(), SdkError::UserRejected.to_response());
    }

    #[test]
    fn test_to_response_carries_code() {
        let err = WalletConnectError::Expired {
            context: "session topic: t".into(),
        };
        let response = err.to_response();
        assert_eq!(response.code, 6);
        assert_eq!(response.message, "expired: session topic: t");
    }

    #[test]
    fn test_sdk_codes() {
        assert_eq!(SdkError::InvalidMethod.code(), 1001);
        assert_eq!(SdkError::UnauthorizedExtendRequest.code(), 3004);
        assert_eq!(SdkError::UserRejectedEvents.code(), 5003);
        assert_eq!(SdkError::UnsupportedNamespaceKey.code(), 5104);
        assert_eq!(SdkError::UserDisconnected.code(), 6000);
        assert_eq!(SdkError::SessionSettlementFailed.code(), 7000);
        assert_eq!(SdkError::WcMethodUnsupported.code(), 10001);
    }

    #[test]
    fn test_transport_error_wraps() {
        let err: WalletConnectError = TransportError::Closed.into();
        assert_eq!(err.to_string(), "transport error: link closed");
    }
}
