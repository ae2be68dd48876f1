use crate::cursor::{Cursor, ReadCursor};
use crate::protocol::{ProtocolError, MAX_ARRAY_LENGTH};
use crate::{Result, Value};

use super::MarshalError;

/// The fixed-width scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixed {
    /// `y`, one byte.
    Byte,
    /// `b`, a `u32` holding 0 or 1.
    Bool,
    /// `n`.
    Int16,
    /// `q`.
    Uint16,
    /// `i`.
    Int32,
    /// `u`.
    Uint32,
    /// `x`.
    Int64,
    /// `t`.
    Uint64,
    /// `d`.
    Double,
}

impl Fixed {
    /// The marshalled width, which doubles as the alignment.
    pub fn width(self) -> usize {
        match self {
            Fixed::Byte => 1,
            Fixed::Int16 | Fixed::Uint16 => 2,
            Fixed::Bool | Fixed::Int32 | Fixed::Uint32 => 4,
            Fixed::Int64 | Fixed::Uint64 | Fixed::Double => 8,
        }
    }

    fn code(self) -> char {
        match self {
            Fixed::Byte => 'y',
            Fixed::Bool => 'b',
            Fixed::Int16 => 'n',
            Fixed::Uint16 => 'q',
            Fixed::Int32 => 'i',
            Fixed::Uint32 => 'u',
            Fixed::Int64 => 'x',
            Fixed::Uint64 => 't',
            Fixed::Double => 'd',
        }
    }
}

/// The compiled form of one complete type in a signature.
///
/// A codec knows its alignment, can reproduce its signature, and marshals or
/// unmarshals values through a cursor. Codecs are immutable and freely
/// shareable; containers own their element codecs.
///
/// [`Codec::Dict`], [`Codec::Variant`] and [`Codec::UnixFd`] are reserved
/// extension points: they parse and describe themselves but refuse to
/// marshal.
///
/// # Examples
///
/// ```
/// use minibus::signature;
///
/// let codecs = signature::parse("a(is)")?;
/// assert_eq!(codecs.len(), 1);
/// assert_eq!(codecs[0].alignment(), 4);
/// assert_eq!(codecs[0].signature(), "a(is)");
/// # Ok::<_, minibus::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    /// A fixed-width scalar.
    Fixed(Fixed),
    /// `s`, a length-prefixed UTF-8 string.
    Str,
    /// `o`, marshalled like a string.
    ObjectPath,
    /// `g`, a byte-length-prefixed signature.
    Signature,
    /// `(…)`, an ordered sequence of field codecs.
    Struct(Vec<Codec>),
    /// `a…`, a length-prefixed sequence of one element type.
    Array(Box<Codec>),
    /// `a{kv}` entries; reserved.
    Dict(Box<Codec>, Box<Codec>),
    /// `v`; reserved.
    Variant,
    /// `h`; reserved.
    UnixFd,
}

impl Codec {
    /// The alignment of the codec's first marshalled byte.
    pub fn alignment(&self) -> usize {
        match self {
            Codec::Fixed(fixed) => fixed.width(),
            Codec::Str | Codec::ObjectPath => 4,
            Codec::Signature => 1,
            Codec::Struct(..) => 8,
            Codec::Array(..) => 4,
            Codec::Dict(..) => 8,
            Codec::Variant => 1,
            Codec::UnixFd => 4,
        }
    }

    /// The canonical signature of the codec.
    pub fn signature(&self) -> String {
        let mut out = String::new();
        self.write_signature(&mut out);
        out
    }

    pub(crate) fn write_signature(&self, out: &mut String) {
        match self {
            Codec::Fixed(fixed) => out.push(fixed.code()),
            Codec::Str => out.push('s'),
            Codec::ObjectPath => out.push('o'),
            Codec::Signature => out.push('g'),
            Codec::Struct(fields) => {
                out.push('(');

                for field in fields {
                    field.write_signature(out);
                }

                out.push(')');
            }
            Codec::Array(element) => {
                out.push('a');
                element.write_signature(out);
            }
            Codec::Dict(key, value) => {
                out.push('{');
                key.write_signature(out);
                value.write_signature(out);
                out.push('}');
            }
            Codec::Variant => out.push('v'),
            Codec::UnixFd => out.push('h'),
        }
    }

    /// Test if the codec is a basic (non-container) type.
    pub fn is_basic(&self) -> bool {
        matches!(
            self,
            Codec::Fixed(..) | Codec::Str | Codec::ObjectPath | Codec::Signature | Codec::UnixFd
        )
    }

    /// Look up the codec for a basic type code, as used when decoding header
    /// field values.
    pub(crate) fn basic(code: u8) -> Option<Codec> {
        Some(match code {
            b'y' => Codec::Fixed(Fixed::Byte),
            b'b' => Codec::Fixed(Fixed::Bool),
            b'n' => Codec::Fixed(Fixed::Int16),
            b'q' => Codec::Fixed(Fixed::Uint16),
            b'i' => Codec::Fixed(Fixed::Int32),
            b'u' => Codec::Fixed(Fixed::Uint32),
            b'x' => Codec::Fixed(Fixed::Int64),
            b't' => Codec::Fixed(Fixed::Uint64),
            b'd' => Codec::Fixed(Fixed::Double),
            b's' => Codec::Str,
            b'o' => Codec::ObjectPath,
            b'g' => Codec::Signature,
            _ => return None,
        })
    }

    /// An upper bound on the bytes `marshal` will produce for `value`,
    /// including worst-case alignment padding.
    pub fn estimate(&self, value: &Value) -> usize {
        match (self, value) {
            (Codec::Fixed(fixed), _) => 2 * fixed.width() - 1,
            (Codec::Str | Codec::ObjectPath, value) => {
                8 + value.as_str().map(str::len).unwrap_or_default()
            }
            (Codec::Signature, value) => 2 + value.as_str().map(str::len).unwrap_or_default(),
            (Codec::Struct(fields), Value::Struct(values)) => {
                7 + fields
                    .iter()
                    .zip(values)
                    .map(|(field, value)| field.estimate(value))
                    .sum::<usize>()
            }
            (Codec::Struct(..), _) => 7,
            (Codec::Array(element), Value::Array(values)) => {
                // Covers the length word, its worst-case leading pad, and
                // the element-alignment pad that is emitted even when the
                // array is empty.
                6 + element.alignment()
                    + values
                        .iter()
                        .map(|value| element.estimate(value))
                        .sum::<usize>()
            }
            (Codec::Array(..), _) => 7,
            (Codec::Dict(..) | Codec::Variant | Codec::UnixFd, _) => 0,
        }
    }

    /// Marshal `value` through the cursor.
    ///
    /// The cursor may sit at any starting offset; the codec aligns itself.
    pub fn marshal(&self, cur: &mut Cursor, value: &Value) -> Result<()> {
        match (self, value) {
            (Codec::Fixed(Fixed::Byte), Value::Byte(v)) => cur.put_u8(*v),
            (Codec::Fixed(Fixed::Bool), Value::Bool(v)) => cur.put_bool(*v),
            (Codec::Fixed(Fixed::Int16), Value::Int16(v)) => cur.put_i16(*v),
            (Codec::Fixed(Fixed::Uint16), Value::Uint16(v)) => cur.put_u16(*v),
            (Codec::Fixed(Fixed::Int32), Value::Int32(v)) => cur.put_i32(*v),
            (Codec::Fixed(Fixed::Uint32), Value::Uint32(v)) => cur.put_u32(*v),
            (Codec::Fixed(Fixed::Int64), Value::Int64(v)) => cur.put_i64(*v),
            (Codec::Fixed(Fixed::Uint64), Value::Uint64(v)) => cur.put_u64(*v),
            (Codec::Fixed(Fixed::Double), Value::Double(v)) => cur.put_f64(*v),
            (Codec::Str, Value::Str(v)) => cur.put_string(v)?,
            (Codec::ObjectPath, Value::ObjectPath(v)) => cur.put_string(v)?,
            (Codec::Signature, Value::Signature(v)) => cur.put_signature(v)?,
            (Codec::Struct(fields), Value::Struct(values)) => {
                if fields.len() != values.len() {
                    return Err(self.mismatch(value));
                }

                cur.pad(8);

                for (field, value) in fields.iter().zip(values) {
                    field.marshal(cur, value)?;
                }
            }
            (Codec::Array(element), Value::Array(values)) => {
                let slot = cur.reserve_u32();
                cur.pad(element.alignment());
                let start = cur.position();

                for value in values {
                    element.marshal(cur, value)?;
                }

                let len = cur.position() - start;

                if len > MAX_ARRAY_LENGTH as usize {
                    return Err(MarshalError::ArrayTooLong(len).into());
                }

                cur.patch_u32(slot, len as u32);
            }
            (Codec::Dict(..) | Codec::Variant | Codec::UnixFd, _) => {
                return Err(MarshalError::Unsupported(self.signature().into()).into());
            }
            _ => return Err(self.mismatch(value)),
        }

        Ok(())
    }

    /// Unmarshal one value from the cursor.
    pub fn unmarshal(&self, cur: &mut ReadCursor<'_>) -> Result<Value> {
        Ok(match self {
            Codec::Fixed(Fixed::Byte) => Value::Byte(cur.get_u8()?),
            Codec::Fixed(Fixed::Bool) => Value::Bool(cur.get_bool()?),
            Codec::Fixed(Fixed::Int16) => Value::Int16(cur.get_i16()?),
            Codec::Fixed(Fixed::Uint16) => Value::Uint16(cur.get_u16()?),
            Codec::Fixed(Fixed::Int32) => Value::Int32(cur.get_i32()?),
            Codec::Fixed(Fixed::Uint32) => Value::Uint32(cur.get_u32()?),
            Codec::Fixed(Fixed::Int64) => Value::Int64(cur.get_i64()?),
            Codec::Fixed(Fixed::Uint64) => Value::Uint64(cur.get_u64()?),
            Codec::Fixed(Fixed::Double) => Value::Double(cur.get_f64()?),
            Codec::Str => Value::Str(cur.get_string()?.to_owned()),
            Codec::ObjectPath => Value::ObjectPath(cur.get_string()?.to_owned()),
            Codec::Signature => Value::Signature(cur.get_signature()?.to_owned()),
            Codec::Struct(fields) => {
                cur.pad(8)?;
                let mut values = Vec::with_capacity(fields.len());

                for field in fields {
                    values.push(field.unmarshal(cur)?);
                }

                Value::Struct(values)
            }
            Codec::Array(element) => {
                let len = cur.get_u32()?;

                if len > MAX_ARRAY_LENGTH {
                    return Err(ProtocolError::ArrayTooLong(len).into());
                }

                cur.pad(element.alignment())?;
                let end = cur.position() + len as usize;
                let mut values = Vec::new();

                while cur.position() < end {
                    values.push(element.unmarshal(cur)?);
                }

                if cur.position() != end {
                    return Err(ProtocolError::ArrayLengthMismatch.into());
                }

                Value::Array(values)
            }
            Codec::Dict(..) | Codec::Variant | Codec::UnixFd => {
                return Err(MarshalError::Unsupported(self.signature().into()).into());
            }
        })
    }

    fn mismatch(&self, value: &Value) -> crate::Error {
        MarshalError::Mismatch {
            expected: self.signature().into(),
            found: value.kind_name(),
        }
        .into()
    }
}
