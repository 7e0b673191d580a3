use thiserror::Error;

/// Failures surfaced synchronously by the channel API.
///
/// Transport failures are not in here: a refused or dropped connection only
/// shows up as the channel reaching [`crate::channel::ConnectionState::Closed`].
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid backend address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme {0:?}, expected ws or wss")]
    UnsupportedScheme(String),

    #[error("request has no string `action` field")]
    MissingAction,
}

/// Why an inbound frame could not become an [`crate::types::InboundMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}
