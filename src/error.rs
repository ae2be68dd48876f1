use std::error;
use std::fmt;
use std::io;

use crate::introspect::IntrospectError;
use crate::protocol::ProtocolError;
use crate::sasl::AuthError;
use crate::signature::{MarshalError, SignatureError};

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    #[inline]
    pub(crate) fn closed() -> Error {
        Self::new(ErrorKind::Closed)
    }

    #[inline]
    pub(crate) fn call(name: Box<str>, message: Box<str>) -> Error {
        Self::new(ErrorKind::Call { name, message })
    }

    /// Test if the error is a per-call timeout.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Test if the error indicates that the call was abandoned before a reply
    /// was delivered.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Test if the error indicates a closed connection.
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed)
    }

    /// The D-Bus error name, if the peer replied with an error message.
    #[inline]
    pub fn error_name(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Call { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        Self::new(ErrorKind::Io(error))
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<MarshalError> for Error {
    #[inline]
    fn from(error: MarshalError) -> Self {
        Self::new(ErrorKind::Marshal(error))
    }
}

impl From<ProtocolError> for Error {
    #[inline]
    fn from(error: ProtocolError) -> Self {
        Self::new(ErrorKind::Protocol(error))
    }
}

impl From<AuthError> for Error {
    #[inline]
    fn from(error: AuthError) -> Self {
        Self::new(ErrorKind::Auth(error))
    }
}

impl From<IntrospectError> for Error {
    #[inline]
    fn from(error: IntrospectError) -> Self {
        Self::new(ErrorKind::Introspect(error))
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(error) => error.fmt(f),
            ErrorKind::Signature(error) => error.fmt(f),
            ErrorKind::Marshal(error) => error.fmt(f),
            ErrorKind::Protocol(error) => error.fmt(f),
            ErrorKind::Auth(error) => error.fmt(f),
            ErrorKind::Introspect(error) => error.fmt(f),
            ErrorKind::Call { name, message } => {
                write!(f, "Call failed: {name}: {message}")
            }
            ErrorKind::Timeout => write!(f, "Call timed out"),
            ErrorKind::Cancelled => write!(f, "Call cancelled"),
            ErrorKind::Closed => write!(f, "Connection closed"),
            ErrorKind::MissingBus => write!(f, "Missing session bus address"),
            ErrorKind::InvalidAddress(address) => {
                write!(f, "Invalid d-bus address `{address}`")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::Marshal(error) => Some(error),
            ErrorKind::Protocol(error) => Some(error),
            ErrorKind::Auth(error) => Some(error),
            ErrorKind::Introspect(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    Signature(SignatureError),
    Marshal(MarshalError),
    Protocol(ProtocolError),
    Auth(AuthError),
    Introspect(IntrospectError),
    Call { name: Box<str>, message: Box<str> },
    Timeout,
    Cancelled,
    Closed,
    MissingBus,
    InvalidAddress(Box<str>),
}
