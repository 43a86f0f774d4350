use thiserror::Error;

/// Errors surfaced by transaction operations.
///
/// Every public operation fails with exactly one of these kinds; no operation
/// returns a partially decoded concept.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The channel is gone. The transaction is dead; not retryable within it.
    #[error("channel closed")]
    ChannelClosed,

    /// The server rejected a well-formed request. Surfaced verbatim.
    #[error("server error: {0}")]
    Server(String),

    /// A response's shape or tag violates the protocol contract. Fatal to the
    /// whole transaction, since the correlation table can no longer be
    /// trusted.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A request-level deadline fired. Safe to retry on a fresh correlation
    /// id.
    #[error("request timed out")]
    Timeout,

    /// A client-side misuse of a concept handle; nothing was sent.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}

impl From<lattice_wire::Error> for Error {
    fn from(e: lattice_wire::Error) -> Self {
        use lattice_wire::Error as Wire;
        match e {
            Wire::Io(_) | Wire::ConnectionClosed => Error::ChannelClosed,
            Wire::Codec(msg) | Wire::InvalidFrame(msg) => Error::ProtocolViolation(msg),
            Wire::Timeout(_) => Error::Timeout,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
