use std::error;
use std::fmt;

use super::{MAX_CONTAINER_DEPTH, MAX_SIGNATURE};

/// An error raised when parsing a malformed D-Bus signature.
///
/// Carries the full signature and the byte index of the offending token.
#[derive(Debug, PartialEq, Eq)]
pub struct SignatureError {
    pub(crate) signature: Box<str>,
    pub(crate) index: usize,
    pub(crate) kind: SignatureErrorKind,
}

impl SignatureError {
    pub(crate) fn new(signature: &str, index: usize, kind: SignatureErrorKind) -> Self {
        Self {
            signature: signature.into(),
            index,
            kind,
        }
    }

    /// The signature that failed to parse.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Byte index of the offending token.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bad signature `{}` at index {}: {}",
            self.signature, self.index, self.kind
        )
    }
}

impl error::Error for SignatureError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignatureErrorKind {
    UnknownTypeCode(u8),
    SignatureTooLong,
    MissingArrayElementType,
    StructEndedButNotStarted,
    StructStartedButNotEnded,
    StructHasNoFields,
    DictEndedButNotStarted,
    DictStartedButNotEnded,
    DictEntryHasNoFields,
    DictEntryHasOnlyOneField,
    DictEntryHasTooManyFields,
    DictKeyMustBeBasicType,
    DictEntryNotInsideArray,
    ExceededMaximumArrayRecursion,
    ExceededMaximumStructRecursion,
}

impl fmt::Display for SignatureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureErrorKind::UnknownTypeCode(code) => {
                write!(f, "unknown type code {:?}", char::from(*code))
            }
            SignatureErrorKind::SignatureTooLong => {
                write!(f, "signature is longer than {MAX_SIGNATURE} bytes")
            }
            SignatureErrorKind::MissingArrayElementType => {
                write!(f, "array is missing its element type")
            }
            SignatureErrorKind::StructEndedButNotStarted => {
                write!(f, "struct ended but was never started")
            }
            SignatureErrorKind::StructStartedButNotEnded => {
                write!(f, "struct started but never ended")
            }
            SignatureErrorKind::StructHasNoFields => {
                write!(f, "struct has no fields")
            }
            SignatureErrorKind::DictEndedButNotStarted => {
                write!(f, "dict entry ended but was never started")
            }
            SignatureErrorKind::DictStartedButNotEnded => {
                write!(f, "dict entry started but never ended")
            }
            SignatureErrorKind::DictEntryHasNoFields => {
                write!(f, "dict entry has no fields")
            }
            SignatureErrorKind::DictEntryHasOnlyOneField => {
                write!(f, "dict entry has only one field")
            }
            SignatureErrorKind::DictEntryHasTooManyFields => {
                write!(f, "dict entry has too many fields")
            }
            SignatureErrorKind::DictKeyMustBeBasicType => {
                write!(f, "dict entry key must be a basic type")
            }
            SignatureErrorKind::DictEntryNotInsideArray => {
                write!(f, "dict entry must be the element of an array")
            }
            SignatureErrorKind::ExceededMaximumArrayRecursion => {
                write!(f, "arrays nest deeper than {MAX_CONTAINER_DEPTH} levels")
            }
            SignatureErrorKind::ExceededMaximumStructRecursion => {
                write!(f, "structs nest deeper than {MAX_CONTAINER_DEPTH} levels")
            }
        }
    }
}
