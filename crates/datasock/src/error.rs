//! # Error Definitions
//!
//! Every failure a data socket caller can observe, grouped by what the caller
//! should do about it.

use crate::transport::TransportError;

/// How a caller should react to an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The connection was reset. It reconnects on its own while open.
    Transport,
    /// A wait elapsed; the connection is still up and the request may be retried.
    Timeout,
    /// The request collides with an outstanding wait or a stale buffered frame.
    Conflict,
    /// The call does not fit the socket's current state.
    Usage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Transport failure, relayed from the connection manager or hit while sending.
    Transport(TransportError),
    /// No frame with `tag` arrived before the deadline.
    Timeout { tag: i32 },
    /// A wait for `tag` is already registered.
    DuplicateWait { tag: i32 },
    /// A frame with `tag` is already buffered; clear it before requesting a new one.
    StaleResponse { tag: i32 },
    /// The receive buffer is empty.
    BufferEmpty,
    /// The receive buffer holds no frame with `tag`.
    FrameNotFound { tag: i32 },
    /// The socket is not connected to the driver.
    NotConnected,
    /// `open` was called on a socket that is already open.
    AlreadyOpen,
    /// `open` found the link connected while the socket was marked closed.
    AlreadyConnected,
    /// The outgoing frame could not be encoded.
    Encode(tagframe::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::DuplicateWait { .. } | Self::StaleResponse { .. } => ErrorKind::Conflict,
            Self::BufferEmpty
            | Self::FrameNotFound { .. }
            | Self::NotConnected
            | Self::AlreadyOpen
            | Self::AlreadyConnected
            | Self::Encode(_) => ErrorKind::Usage,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Timeout { tag } => write!(f, "Timed out waiting for tag {}", tag),
            Self::DuplicateWait { tag } => write!(f, "A wait for tag {} is already registered", tag),
            Self::StaleResponse { tag } => {
                write!(f, "Tag {} already received; clear the buffer before requesting it", tag)
            }
            Self::BufferEmpty => write!(f, "Receive buffer is empty"),
            Self::FrameNotFound { tag } => write!(f, "Tag {} not found in receive buffer", tag),
            Self::NotConnected => write!(f, "Socket is not connected"),
            Self::AlreadyOpen => write!(f, "Socket is already open"),
            Self::AlreadyConnected => write!(f, "Socket is connected while marked closed"),
            Self::Encode(e) => write!(f, "Cannot encode frame: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<tagframe::Error> for Error {
    fn from(e: tagframe::Error) -> Self {
        Self::Encode(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
