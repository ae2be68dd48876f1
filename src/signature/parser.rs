use super::codec::Codec;
use super::signature_error::SignatureErrorKind;
use super::{SignatureError, MAX_CONTAINER_DEPTH, MAX_DEPTH, MAX_SIGNATURE};

/// A partially built container on the parse stack.
enum Frame {
    /// An `a` waiting to consume exactly one complete type.
    Array { at: usize },
    /// An open `(`, accumulating field codecs.
    Struct { at: usize, fields: Vec<Codec> },
    /// An open `{`, accumulating its key and value codecs.
    Dict { at: usize, fields: Vec<Codec> },
}

/// Parse a signature into one codec per top-level complete type.
///
/// # Examples
///
/// ```
/// use minibus::signature;
///
/// let codecs = signature::parse("yia(is)")?;
/// assert_eq!(codecs.len(), 3);
/// # Ok::<_, minibus::SignatureError>(())
/// ```
pub fn parse(signature: &str) -> Result<Vec<Codec>, SignatureError> {
    let bytes = signature.as_bytes();

    if bytes.len() > MAX_SIGNATURE {
        return Err(SignatureError::new(
            signature,
            MAX_SIGNATURE,
            SignatureErrorKind::SignatureTooLong,
        ));
    }

    let mut root = Vec::new();
    let mut stack = Vec::new();
    let mut arrays = 0usize;
    let mut containers = 0usize;

    let err = |index, kind| Err(SignatureError::new(signature, index, kind));

    for (index, &b) in bytes.iter().enumerate() {
        match b {
            b'a' => {
                if arrays == MAX_CONTAINER_DEPTH || arrays + containers == MAX_DEPTH {
                    return err(index, SignatureErrorKind::ExceededMaximumArrayRecursion);
                }

                arrays += 1;
                stack.push(Frame::Array { at: index });
            }
            b'(' => {
                if containers == MAX_CONTAINER_DEPTH || arrays + containers == MAX_DEPTH {
                    return err(index, SignatureErrorKind::ExceededMaximumStructRecursion);
                }

                containers += 1;
                stack.push(Frame::Struct {
                    at: index,
                    fields: Vec::new(),
                });
            }
            b')' => match stack.pop() {
                Some(Frame::Struct { fields, .. }) => {
                    containers -= 1;

                    if fields.is_empty() {
                        return err(index, SignatureErrorKind::StructHasNoFields);
                    }

                    deliver(Codec::Struct(fields), &mut stack, &mut root, &mut arrays);
                }
                Some(Frame::Array { at }) => {
                    return err(at, SignatureErrorKind::MissingArrayElementType);
                }
                Some(Frame::Dict { at, .. }) => {
                    return err(at, SignatureErrorKind::DictStartedButNotEnded);
                }
                None => return err(index, SignatureErrorKind::StructEndedButNotStarted),
            },
            b'{' => {
                if !matches!(stack.last(), Some(Frame::Array { .. })) {
                    return err(index, SignatureErrorKind::DictEntryNotInsideArray);
                }

                if containers == MAX_CONTAINER_DEPTH || arrays + containers == MAX_DEPTH {
                    return err(index, SignatureErrorKind::ExceededMaximumStructRecursion);
                }

                containers += 1;
                stack.push(Frame::Dict {
                    at: index,
                    fields: Vec::new(),
                });
            }
            b'}' => match stack.pop() {
                Some(Frame::Dict { fields, .. }) => {
                    containers -= 1;

                    let mut fields = fields.into_iter();

                    let (key, value) = match (fields.next(), fields.next(), fields.next()) {
                        (Some(key), Some(value), None) => (key, value),
                        (None, ..) => {
                            return err(index, SignatureErrorKind::DictEntryHasNoFields);
                        }
                        (Some(..), None, ..) => {
                            return err(index, SignatureErrorKind::DictEntryHasOnlyOneField);
                        }
                        _ => {
                            return err(index, SignatureErrorKind::DictEntryHasTooManyFields);
                        }
                    };

                    if !key.is_basic() {
                        return err(index, SignatureErrorKind::DictKeyMustBeBasicType);
                    }

                    deliver(
                        Codec::Dict(Box::new(key), Box::new(value)),
                        &mut stack,
                        &mut root,
                        &mut arrays,
                    );
                }
                Some(Frame::Array { at }) => {
                    return err(at, SignatureErrorKind::MissingArrayElementType);
                }
                Some(Frame::Struct { at, .. }) => {
                    return err(at, SignatureErrorKind::StructStartedButNotEnded);
                }
                None => return err(index, SignatureErrorKind::DictEndedButNotStarted),
            },
            code => {
                let codec = match code {
                    b's' => Codec::Str,
                    b'o' => Codec::ObjectPath,
                    b'g' => Codec::Signature,
                    b'v' => Codec::Variant,
                    b'h' => Codec::UnixFd,
                    code => match Codec::basic(code) {
                        Some(codec) => codec,
                        None => return err(index, SignatureErrorKind::UnknownTypeCode(code)),
                    },
                };

                deliver(codec, &mut stack, &mut root, &mut arrays);
            }
        }
    }

    match stack.last() {
        Some(Frame::Array { at }) => err(*at, SignatureErrorKind::MissingArrayElementType),
        Some(Frame::Struct { at, .. }) => err(*at, SignatureErrorKind::StructStartedButNotEnded),
        Some(Frame::Dict { at, .. }) => err(*at, SignatureErrorKind::DictStartedButNotEnded),
        None => Ok(root),
    }
}

/// Hand a completed codec to the innermost open frame.
///
/// Array frames consume exactly one type, so delivery pops and wraps them
/// right-associatively until a struct, dict or the root receives the codec.
fn deliver(codec: Codec, stack: &mut Vec<Frame>, root: &mut Vec<Codec>, arrays: &mut usize) {
    let mut codec = codec;

    loop {
        match stack.last_mut() {
            Some(Frame::Array { .. }) => {
                stack.pop();
                *arrays -= 1;
                codec = Codec::Array(Box::new(codec));
            }
            Some(Frame::Struct { fields, .. } | Frame::Dict { fields, .. }) => {
                fields.push(codec);
                return;
            }
            None => {
                root.push(codec);
                return;
            }
        }
    }
}
