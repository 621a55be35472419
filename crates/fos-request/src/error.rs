//! Request errors
//!
//! A send either fulfils with its transport or fails with one of two
//! variants: the caller cancelled it, or the transport could not complete
//! the exchange. HTTP error statuses are not errors.

use std::fmt;
use std::sync::Arc;

/// Message carried by every [`AbortError`]
pub const ABORT_MESSAGE: &str = "Request aborted";

/// Message used when a failed transport reports no status text
pub const CONNECTION_FALLBACK_MESSAGE: &str = "Connection error";

/// The request was cancelled through `abort()`
#[derive(thiserror::Error)]
#[error("{message}")]
pub struct AbortError<T> {
    message: String,
    transport: Arc<T>,
}

impl<T> AbortError<T> {
    pub fn new(message: impl Into<String>, transport: Arc<T>) -> Self {
        Self { message: message.into(), transport }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transport used by the cancelled request
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

impl<T> fmt::Debug for AbortError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortError")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// The transport failed below HTTP (refused, reset, unresolvable, ...)
#[derive(thiserror::Error)]
#[error("{message}")]
pub struct ConnectionError<T> {
    message: String,
    transport: Arc<T>,
}

impl<T> ConnectionError<T> {
    pub fn new(message: impl Into<String>, transport: Arc<T>) -> Self {
        Self { message: message.into(), transport }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transport that reported the failure
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

impl<T> fmt::Debug for ConnectionError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionError")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Failed settlement of a send
#[derive(thiserror::Error)]
pub enum RequestError<T> {
    #[error("{0}")]
    Abort(AbortError<T>),

    #[error("{0}")]
    Connection(ConnectionError<T>),
}

impl<T> RequestError<T> {
    pub fn is_abort(&self) -> bool {
        matches!(self, RequestError::Abort(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, RequestError::Connection(_))
    }

    pub fn message(&self) -> &str {
        match self {
            RequestError::Abort(e) => e.message(),
            RequestError::Connection(e) => e.message(),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        match self {
            RequestError::Abort(e) => e.transport(),
            RequestError::Connection(e) => e.transport(),
        }
    }
}

impl<T> fmt::Debug for RequestError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Abort(e) => f.debug_tuple("Abort").field(e).finish(),
            RequestError::Connection(e) => f.debug_tuple("Connection").field(e).finish(),
        }
    }
}

impl<T> From<AbortError<T>> for RequestError<T> {
    fn from(e: AbortError<T>) -> Self {
        RequestError::Abort(e)
    }
}

impl<T> From<ConnectionError<T>> for RequestError<T> {
    fn from(e: ConnectionError<T>) -> Self {
        RequestError::Connection(e)
    }
}
