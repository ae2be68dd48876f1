use std::error;
use std::fmt;

/// An error raised when a value does not fit the codec it was marshalled
/// with.
///
/// Marshalling failures surface to the caller that supplied the value; they
/// never close a connection.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum MarshalError {
    /// The value's shape does not match the codec's signature.
    Mismatch {
        /// The signature of the codec the value was marshalled with.
        expected: Box<str>,
        /// The shape of the value that was supplied.
        found: &'static str,
    },
    /// The number of body values differs from the number of codecs.
    Arity {
        /// How many codecs the signature describes.
        expected: usize,
        /// How many values were supplied.
        found: usize,
    },
    /// The codec is a reserved extension point without a filled form.
    Unsupported(Box<str>),
    /// A string exceeds the length a `u32` prefix can describe.
    StringTooLong(usize),
    /// A signature exceeds the length a `u8` prefix can describe.
    SignatureTooLong(usize),
    /// An array marshalled to more bytes than the protocol permits.
    ArrayTooLong(usize),
    /// A message body marshalled to more bytes than the protocol permits.
    BodyTooLong(usize),
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalError::Mismatch { expected, found } => {
                write!(f, "Expected value matching `{expected}`, got {found}")
            }
            MarshalError::Arity { expected, found } => {
                write!(f, "Expected {expected} body values, got {found}")
            }
            MarshalError::Unsupported(signature) => {
                write!(f, "Type `{signature}` has no codec in this crate")
            }
            MarshalError::StringTooLong(len) => {
                write!(f, "String of {len} bytes does not fit a u32 length")
            }
            MarshalError::SignatureTooLong(len) => {
                write!(f, "Signature of {len} bytes does not fit a u8 length")
            }
            MarshalError::ArrayTooLong(len) => {
                write!(f, "Array marshalled to {len} bytes, over the protocol limit")
            }
            MarshalError::BodyTooLong(len) => {
                write!(f, "Body marshalled to {len} bytes, over the protocol limit")
            }
        }
    }
}

impl error::Error for MarshalError {}
