use crate::cursor::Cursor;
use crate::protocol::{
    field, Endianness, Flags, BODY_LENGTH_OFFSET, FIELDS_LENGTH_OFFSET, FIXED_HEADER_LEN,
    MAX_ARRAY_LENGTH, MAX_BODY_LENGTH, VERSION,
};
use crate::signature::{signature_of, Codec, Fixed, MarshalError};
use crate::{Result, Value};

use super::{MessageBuf, MessageKind};

/// The codec of a header field's value, fixed per field id.
fn field_codec(id: u8) -> Codec {
    match id {
        field::PATH => Codec::ObjectPath,
        field::REPLY_SERIAL => Codec::Fixed(Fixed::Uint32),
        field::SIGNATURE => Codec::Signature,
        _ => Codec::Str,
    }
}

/// A builder laying down one D-Bus message.
///
/// Construction writes the fixed 16-byte header with zero placeholders for
/// the body length, serial and header-fields length; [`build`] emits the
/// header fields and body and back-patches the lengths. The serial stays
/// zero: the connection assigns it on send.
///
/// [`build`]: Self::build
///
/// # Examples
///
/// ```
/// use minibus::MessageBuilder;
///
/// let m = MessageBuilder::method_call("/org/freedesktop/DBus", "Hello")
///     .with_destination("org.freedesktop.DBus")
///     .build(&[], &[])?;
///
/// assert_eq!(&m.as_bytes()[..4], &[b'l', 1, 0, 1]);
/// # Ok::<_, minibus::Error>(())
/// ```
#[derive(Debug)]
pub struct MessageBuilder {
    cur: Cursor,
    kind: MessageKind,
    flags: Flags,
    fields: [Option<Value>; 9],
}

impl MessageBuilder {
    /// Construct a builder for a message of the given kind.
    pub fn new(kind: MessageKind) -> Self {
        let mut cur = Cursor::new();
        cur.put_u8(Endianness::Little.code());
        cur.put_u8(kind as u8);
        cur.put_u8(0);
        cur.put_u8(VERSION);
        cur.put_u32(0);
        cur.put_u32(0);
        cur.put_u32(0);

        Self {
            cur,
            kind,
            flags: Flags::EMPTY,
            fields: Default::default(),
        }
    }

    /// Construct a method call to `member` on the object at `path`.
    pub fn method_call(path: &str, member: &str) -> Self {
        Self::new(MessageKind::MethodCall)
            .with_path(path)
            .with_member(member)
    }

    /// Construct a method return answering the call with serial
    /// `reply_serial`.
    pub fn method_return(reply_serial: u32) -> Self {
        Self::new(MessageKind::MethodReturn).with_reply_serial(reply_serial)
    }

    /// Construct an error reply answering the call with serial
    /// `reply_serial`.
    pub fn error(error_name: &str, reply_serial: u32) -> Self {
        let mut builder = Self::new(MessageKind::Error).with_reply_serial(reply_serial);
        builder.fields[field::ERROR_NAME as usize] = Some(Value::Str(error_name.into()));
        builder
    }

    /// Construct a signal emission.
    pub fn signal(path: &str, interface: &str, member: &str) -> Self {
        let mut builder = Self::new(MessageKind::Signal)
            .with_path(path)
            .with_member(member);
        builder.fields[field::INTERFACE as usize] = Some(Value::Str(interface.into()));
        builder
    }

    /// Replace the message flags.
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        let pos = self.cur.position();
        self.cur.seek(2);
        self.cur.put_u8(flags.0);
        self.cur.seek(pos);
        self
    }

    /// Set the PATH header.
    pub fn with_path(mut self, path: &str) -> Self {
        self.fields[field::PATH as usize] = Some(Value::ObjectPath(path.into()));
        self
    }

    /// Set the INTERFACE header.
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.fields[field::INTERFACE as usize] = Some(Value::Str(interface.into()));
        self
    }

    /// Set the MEMBER header.
    pub fn with_member(mut self, member: &str) -> Self {
        self.fields[field::MEMBER as usize] = Some(Value::Str(member.into()));
        self
    }

    /// Set the REPLY_SERIAL header.
    pub fn with_reply_serial(mut self, reply_serial: u32) -> Self {
        self.fields[field::REPLY_SERIAL as usize] = Some(Value::Uint32(reply_serial));
        self
    }

    /// Set the DESTINATION header.
    pub fn with_destination(mut self, destination: &str) -> Self {
        self.fields[field::DESTINATION as usize] = Some(Value::Str(destination.into()));
        self
    }

    /// Set the SENDER header.
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.fields[field::SENDER as usize] = Some(Value::Str(sender.into()));
        self
    }

    /// Record a header entry by id, checking the fixed id to value-type
    /// pairing.
    pub fn set_header(&mut self, id: u8, value: Value) -> Result<()> {
        let valid = match (id, &value) {
            (field::PATH, Value::ObjectPath(..)) => true,
            (field::REPLY_SERIAL, Value::Uint32(..)) => true,
            (field::SIGNATURE, Value::Signature(..)) => true,
            (
                field::INTERFACE | field::MEMBER | field::ERROR_NAME | field::DESTINATION
                | field::SENDER,
                Value::Str(..),
            ) => true,
            _ => false,
        };

        if !valid {
            return Err(MarshalError::Mismatch {
                expected: field_codec(id).signature().into(),
                found: value.kind_name(),
            }
            .into());
        }

        self.fields[id as usize] = Some(value);
        Ok(())
    }

    /// Emit the header fields and body and finish the message.
    ///
    /// `codecs` and `body` describe the body pairwise; the SIGNATURE header
    /// is derived from `codecs` and set automatically iff the body is
    /// non-empty.
    pub fn build(mut self, codecs: &[Codec], body: &[Value]) -> Result<MessageBuf> {
        if codecs.len() != body.len() {
            return Err(MarshalError::Arity {
                expected: codecs.len(),
                found: body.len(),
            }
            .into());
        }

        if !body.is_empty() {
            self.fields[field::SIGNATURE as usize] = Some(Value::Signature(signature_of(codecs)));
        }

        debug_assert_eq!(self.cur.position(), FIXED_HEADER_LEN);

        // Header fields in ascending id order, each an 8-aligned
        // (id, variant) pair on the wire.
        for id in 1..=8u8 {
            let Some(value) = &self.fields[id as usize] else {
                continue;
            };

            self.cur.pad(8);
            self.cur.put_u8(id);
            let codec = field_codec(id);
            self.cur.put_signature(&codec.signature())?;
            codec.marshal(&mut self.cur, value)?;
        }

        // The fields length counts the entries only, not the padding that
        // aligns the body.
        let fields_len = self.cur.position() - FIXED_HEADER_LEN;

        if fields_len > MAX_ARRAY_LENGTH as usize {
            return Err(MarshalError::ArrayTooLong(fields_len).into());
        }

        self.patch(FIELDS_LENGTH_OFFSET, fields_len as u32);

        self.cur.pad(8);
        let body_start = self.cur.position();

        for (codec, value) in codecs.iter().zip(body) {
            codec.marshal(&mut self.cur, value)?;
        }

        let body_len = self.cur.position() - body_start;

        if body_len > MAX_BODY_LENGTH as usize {
            return Err(MarshalError::BodyTooLong(body_len).into());
        }

        self.patch(BODY_LENGTH_OFFSET, body_len as u32);

        Ok(MessageBuf::new(self.cur.into_vec(), self.kind, self.flags))
    }

    fn patch(&mut self, offset: usize, value: u32) {
        let pos = self.cur.position();
        self.cur.seek(offset);
        self.cur.put_u32(value);
        self.cur.seek(pos);
    }
}
