use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use resp_proto::{ParseError, Value};

/// Errors a queued command can be rejected with.
///
/// `Clone` because a single connection-level cause rejects every command
/// that was outstanding when it happened.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The server answered with a simple or bulk error reply.
    #[error("server error: {0}")]
    Server(ServerError),

    /// The command's deadline passed before its reply arrived.
    #[error("command timed out")]
    Timeout,

    /// The caller cancelled the command before its reply arrived.
    #[error("command cancelled")]
    Cancelled,

    /// The connection was closed before a reply was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport reported a disconnect.
    #[error("disconnected: {0}")]
    Disconnected(Arc<str>),

    /// I/O error reported by the transport.
    #[error("io error: {0}")]
    Io(Arc<io::Error>),

    /// The reply stream could not be decoded; the connection is unusable.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The queue no longer accepts commands.
    #[error("queue closed")]
    QueueClosed,

    /// The queue is at its configured maximum length.
    #[error("queue full")]
    QueueFull,

    /// The command could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// The reply did not have the shape the command expects.
    #[error("unexpected reply")]
    UnexpectedReply,

    /// One or more commands of a pipeline or transaction failed.
    #[error("{0}")]
    Batch(BatchError),

    /// `EXEC` returned null because a watched key changed.
    #[error("transaction aborted: watched key modified")]
    WatchFailed,
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl Error {
    /// Build a disconnect cause from any message.
    pub fn disconnected(reason: impl Into<Arc<str>>) -> Self {
        Error::Disconnected(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Server(_) => ErrorKind::Server,
            Error::Timeout => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::ConnectionClosed | Error::Disconnected(_) | Error::Io(_) => {
                ErrorKind::ConnectionLost
            }
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::QueueClosed => ErrorKind::QueueClosed,
            Error::QueueFull => ErrorKind::QueueFull,
            Error::Encode(_) => ErrorKind::Encode,
            Error::UnexpectedReply => ErrorKind::UnexpectedReply,
            Error::Batch(_) => ErrorKind::Batch,
            Error::WatchFailed => ErrorKind::WatchFailed,
        }
    }

    /// The server error, if the server rejected the command.
    pub fn as_server(&self) -> Option<&ServerError> {
        match self {
            Error::Server(e) => Some(e),
            _ => None,
        }
    }
}

/// Fieldless discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Server,
    Timeout,
    Cancelled,
    ConnectionLost,
    Protocol,
    QueueClosed,
    QueueFull,
    Encode,
    UnexpectedReply,
    Batch,
    WatchFailed,
}

// ── ServerError ─────────────────────────────────────────────────────────

/// An error reply sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    message: Bytes,
    bulk: bool,
}

impl ServerError {
    pub fn new(message: impl Into<Bytes>, bulk: bool) -> Self {
        Self {
            message: message.into(),
            bulk,
        }
    }

    /// Build from a decoded error reply.
    pub fn from_reply(value: Value) -> Self {
        match value.into_stripped() {
            Value::Error(message) => Self::new(message, false),
            Value::BulkError(message) => Self::new(message, true),
            other => Self::new(format!("{other:?}"), false),
        }
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Whether the error arrived as a RESP3 bulk error.
    pub fn is_bulk(&self) -> bool {
        self.bulk
    }

    /// The leading word of the message: `ERR`, `WRONGTYPE`, `MOVED`, ...
    pub fn code(&self) -> &str {
        let word = self
            .message
            .split(|b| *b == b' ')
            .next()
            .unwrap_or_default();
        std::str::from_utf8(word).unwrap_or_default()
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.message))
    }
}

// ── BatchError ──────────────────────────────────────────────────────────

/// Outcome of a pipeline or transaction in which some commands failed.
///
/// Holds every member's result, in submission order, plus the positions of
/// the failed ones.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} of {} batch commands failed", .error_indexes.len(), .replies.len())]
pub struct BatchError {
    replies: Vec<Result<Value, Error>>,
    error_indexes: Vec<usize>,
}

impl BatchError {
    /// Returns `Err` only if at least one reply is an error.
    pub(crate) fn check(replies: Vec<Result<Value, Error>>) -> Result<Vec<Value>, Error> {
        let error_indexes: Vec<usize> = replies
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_err().then_some(i))
            .collect();
        if error_indexes.is_empty() {
            return Ok(replies.into_iter().flatten().collect());
        }
        Err(Error::Batch(BatchError {
            replies,
            error_indexes,
        }))
    }

    pub fn replies(&self) -> &[Result<Value, Error>] {
        &self.replies
    }

    pub fn error_indexes(&self) -> &[usize] {
        &self.error_indexes
    }

    /// The failed commands' errors with their positions.
    pub fn errors(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.error_indexes
            .iter()
            .filter_map(|&i| self.replies[i].as_ref().err().map(|e| (i, e)))
    }

    pub fn into_replies(self) -> Vec<Result<Value, Error>> {
        self.replies
    }
}
