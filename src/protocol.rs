//! Low level details of the D-Bus wire protocol.

use std::error;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::str::Utf8Error;

/// The protocol version this crate speaks.
pub(crate) const VERSION: u8 = 1;

/// Length of the fixed portion of a message header.
pub(crate) const FIXED_HEADER_LEN: usize = 16;

/// Offset of the body length field in the fixed header.
pub(crate) const BODY_LENGTH_OFFSET: usize = 4;

/// Offset of the serial field in the fixed header.
pub(crate) const SERIAL_OFFSET: usize = 8;

/// Offset of the header fields array length in the fixed header.
pub(crate) const FIELDS_LENGTH_OFFSET: usize = 12;

/// The maximum length of an array in bytes.
pub(crate) const MAX_ARRAY_LENGTH: u32 = 1u32 << 26;

/// The maximum length of a message body in bytes.
pub(crate) const MAX_BODY_LENGTH: u32 = 1u32 << 27;

/// Header field identifiers.
pub(crate) mod field {
    pub(crate) const PATH: u8 = 1;
    pub(crate) const INTERFACE: u8 = 2;
    pub(crate) const MEMBER: u8 = 3;
    pub(crate) const ERROR_NAME: u8 = 4;
    pub(crate) const REPLY_SERIAL: u8 = 5;
    pub(crate) const DESTINATION: u8 = 6;
    pub(crate) const SENDER: u8 = 7;
    pub(crate) const SIGNATURE: u8 = 8;
}

/// The byte order of a message.
///
/// Messages are always emitted little-endian; both orders are accepted when
/// parsing, per the first byte of the message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Little endian, marker byte `l`.
    Little,
    /// Big endian, marker byte `B`.
    Big,
}

impl Endianness {
    #[inline]
    pub(crate) const fn code(self) -> u8 {
        match self {
            Endianness::Little => b'l',
            Endianness::Big => b'B',
        }
    }

    #[inline]
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            b'l' => Some(Endianness::Little),
            b'B' => Some(Endianness::Big),
            _ => None,
        }
    }
}

/// Flags in a D-Bus message.
///
/// # Examples
///
/// ```
/// use minibus::protocol::Flags;
///
/// let flags = Flags::EMPTY;
/// assert!(!(flags & Flags::NO_REPLY_EXPECTED));
///
/// let flags = Flags::EMPTY | Flags::NO_REPLY_EXPECTED;
/// assert!(flags & Flags::NO_REPLY_EXPECTED);
/// assert!(!(flags & Flags::NO_AUTO_START));
/// ```
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags(pub(crate) u8);

impl Flags {
    /// An empty set of flags.
    pub const EMPTY: Self = Self(0);
    /// The message does not expect a reply; the receiver should omit it.
    pub const NO_REPLY_EXPECTED: Self = Self(1);
    /// The bus must not launch an owner for the destination name.
    pub const NO_AUTO_START: Self = Self(2);
    /// The caller is prepared to wait for interactive authorization.
    pub const ALLOW_INTERACTIVE_AUTHORIZATION: Self = Self(4);
}

impl BitOr<Flags> for Flags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Flags) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd<Flags> for Flags {
    type Output = bool;

    #[inline]
    fn bitand(self, rhs: Flags) -> Self::Output {
        self.0 & rhs.0 != 0
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#04x})", self.0)
    }
}

/// An error raised when on-wire bytes violate the message layout invariants.
///
/// A protocol error closes the connection it was observed on.
#[derive(Debug)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The endianness marker byte is neither `l` nor `B`.
    UnknownEndianness(u8),
    /// The message type byte is outside the defined range.
    UnknownMessageKind(u8),
    /// The protocol version is not 1.
    UnknownVersion(u8),
    /// A header field declared a value type that is not a known basic type.
    UnknownHeaderType(Box<str>),
    /// A read advanced past the end of the message.
    BufferUnderflow,
    /// A length-prefixed string was not followed by a NUL byte.
    NotNullTerminated,
    /// A string on the wire was not valid UTF-8.
    InvalidUtf8(Utf8Error),
    /// A boolean encoded something other than 0 or 1.
    InvalidBool(u32),
    /// An array declared more bytes than the protocol permits.
    ArrayTooLong(u32),
    /// A message body declared more bytes than the protocol permits.
    BodyTooLong(u32),
    /// The elements of an array did not end on its declared length.
    ArrayLengthMismatch,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownEndianness(b) => {
                write!(f, "Unknown endianness marker {b:#04x}")
            }
            ProtocolError::UnknownMessageKind(b) => {
                write!(f, "Unknown message kind {b}")
            }
            ProtocolError::UnknownVersion(b) => {
                write!(f, "Unknown protocol version {b}")
            }
            ProtocolError::UnknownHeaderType(signature) => {
                write!(f, "Unknown header field type `{signature}`")
            }
            ProtocolError::BufferUnderflow => write!(f, "Buffer underflow"),
            ProtocolError::NotNullTerminated => {
                write!(f, "String is not null terminated")
            }
            ProtocolError::InvalidUtf8(error) => error.fmt(f),
            ProtocolError::InvalidBool(value) => {
                write!(f, "Invalid boolean value {value}")
            }
            ProtocolError::ArrayTooLong(length) => {
                write!(
                    f,
                    "Array of length {length} is too long (max is {MAX_ARRAY_LENGTH})"
                )
            }
            ProtocolError::BodyTooLong(length) => {
                write!(
                    f,
                    "Body of length {length} is too long (max is {MAX_BODY_LENGTH})"
                )
            }
            ProtocolError::ArrayLengthMismatch => {
                write!(f, "Array elements did not end on the declared length")
            }
        }
    }
}

impl error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ProtocolError::InvalidUtf8(error) => Some(error),
            _ => None,
        }
    }
}

impl From<Utf8Error> for ProtocolError {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        ProtocolError::InvalidUtf8(error)
    }
}
