//! Unified error type.

use http::StatusCode;

/// A boxed error from application code, as returned through [`Error::other`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type shared by handlers, middleware and the server.
///
/// Handlers return `Result<(), Error>`. An `Err` that reaches the router is
/// translated into a `500` JSON body; everything else in this enum describes
/// how the framework itself observed a failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Binding or accepting on the listener failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address: {0}")]
    Addr(#[from] std::net::AddrParseError),

    #[error("invalid header value: {0}")]
    Header(#[from] http::header::InvalidHeaderValue),

    /// A handler committed a `4xx` or `5xx` status, as seen by a [`Capture`](crate::Capture).
    #[error("response status code: {}", .0.as_u16())]
    Status(StatusCode),

    /// Writing to the response sink failed.
    #[error("response write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("request timed out")]
    Timeout,

    /// A recovered panic whose payload was not already an error.
    #[error("{0}")]
    Panic(String),

    #[error("request body is empty")]
    EmptyBody,

    #[error("failed to decode JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode JSON: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Other(BoxError),
}

impl Error {
    /// Wraps any application error, or a plain message, as an [`Error`].
    ///
    /// ```rust
    /// let err = vibe::Error::other("invalid id");
    /// assert_eq!(err.to_string(), "invalid id");
    /// ```
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }
}
