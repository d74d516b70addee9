//! Error taxonomy for the chat core.
//!
//! Nothing in this crate lets these escape to the UI as panics: connection
//! failures become state transitions, send failures become `false`, and
//! malformed pushes are logged and dropped. `ChatError` is what the
//! fallible building blocks return underneath those conversions.

/// Error returned by chat core operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A required environment variable is absent.
    #[error("missing configuration: {var}")]
    MissingConfig { var: String },
    /// An environment variable could not be parsed.
    #[error("invalid configuration: {0}")]
    ConfigParse(String),
    /// No usable credential (auth not hydrated, signed out, or token empty).
    #[error("not authenticated")]
    NotAuthenticated,
    /// The realtime connection is not in the `Connected` state.
    #[error("realtime connection is not connected")]
    NotConnected,
    /// The realtime connection went away while an operation was in flight.
    #[error("realtime connection lost")]
    ConnectionLost,
    /// The operation did not finish before its deadline.
    #[error("timed out: {0}")]
    Timeout(&'static str),
    /// The REST API answered 401.
    #[error("credential rejected by server")]
    Unauthorized,
    /// The REST API answered with another non-success status.
    #[error("server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// The HTTP request itself failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The WebSocket could not be opened or broke mid-session.
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    /// The hub handshake did not complete.
    #[error("hub handshake failed: {0}")]
    Handshake(String),
    /// A hub record could not be decoded.
    #[error("hub record decode failed: {0}")]
    Codec(#[from] frames::CodecError),
    /// The hub completed an invocation with an error.
    #[error("hub error: {0}")]
    Hub(String),
    /// Reading or writing the persisted session failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization failed.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
