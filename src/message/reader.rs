use crate::cursor::{round_up, ReadCursor};
use crate::protocol::{
    field, Endianness, Flags, ProtocolError, BODY_LENGTH_OFFSET, FIELDS_LENGTH_OFFSET,
    FIXED_HEADER_LEN, MAX_ARRAY_LENGTH, MAX_BODY_LENGTH, VERSION,
};
use crate::signature::Codec;
use crate::{Result, Value};

use super::MessageKind;

/// Validate the fixed prefix of `data` and return its endianness and kind.
fn check_prefix(data: &[u8]) -> Result<(Endianness, MessageKind)> {
    let endianness = Endianness::from_code(data[0])
        .ok_or(ProtocolError::UnknownEndianness(data[0]))?;

    let kind = MessageKind::from_u8(data[1])
        .ok_or(ProtocolError::UnknownMessageKind(data[1]))?;

    if data[3] != VERSION {
        return Err(ProtocolError::UnknownVersion(data[3]).into());
    }

    Ok((endianness, kind))
}

/// Compute the full frame length of the message starting at `data`, or
/// `None` if fewer than 16 bytes are in hand.
///
/// Used by stream reassembly, which sees the fixed header before the rest of
/// the message has arrived.
pub(crate) fn frame_len(data: &[u8]) -> Result<Option<usize>> {
    if data.len() < FIXED_HEADER_LEN {
        return Ok(None);
    }

    let (endianness, _) = check_prefix(data)?;

    let mut cur = ReadCursor::new(data, endianness);
    cur.seek(BODY_LENGTH_OFFSET);
    let body_length = cur.get_u32()?;
    cur.seek(FIELDS_LENGTH_OFFSET);
    let fields_length = cur.get_u32()?;

    if fields_length > MAX_ARRAY_LENGTH {
        return Err(ProtocolError::ArrayTooLong(fields_length).into());
    }

    if body_length > MAX_BODY_LENGTH {
        return Err(ProtocolError::BodyTooLong(body_length).into());
    }

    Ok(Some(
        round_up(FIXED_HEADER_LEN + fields_length as usize, 8) + body_length as usize,
    ))
}

/// A read-only view over one complete message.
///
/// Header fields are located by id on demand through [`find_header`] without
/// deserializing the whole field array; the body is pulled through
/// [`read_body`] with the codecs of its signature.
///
/// [`find_header`]: Self::find_header
/// [`read_body`]: Self::read_body
#[derive(Debug, Clone)]
pub struct MessageReader<'a> {
    data: &'a [u8],
    endianness: Endianness,
    kind: MessageKind,
    flags: Flags,
    body_length: u32,
    serial: u32,
    fields_length: u32,
}

impl<'a> MessageReader<'a> {
    /// Wrap a byte slice containing exactly one message, validating its
    /// fixed header.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(ProtocolError::BufferUnderflow.into());
        }

        let (endianness, kind) = check_prefix(data)?;
        let flags = Flags(data[2]);

        let mut cur = ReadCursor::new(data, endianness);
        cur.seek(BODY_LENGTH_OFFSET);
        let body_length = cur.get_u32()?;
        let serial = cur.get_u32()?;
        let fields_length = cur.get_u32()?;

        if fields_length > MAX_ARRAY_LENGTH {
            return Err(ProtocolError::ArrayTooLong(fields_length).into());
        }

        if body_length > MAX_BODY_LENGTH {
            return Err(ProtocolError::BodyTooLong(body_length).into());
        }

        let total =
            round_up(FIXED_HEADER_LEN + fields_length as usize, 8) + body_length as usize;

        if total > data.len() {
            return Err(ProtocolError::BufferUnderflow.into());
        }

        Ok(Self {
            data,
            endianness,
            kind,
            flags,
            body_length,
            serial,
            fields_length,
        })
    }

    /// The byte order of the message.
    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// The kind of the message.
    #[inline]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The flags of the message.
    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The serial of the message.
    #[inline]
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// The declared length of the body in bytes.
    #[inline]
    pub fn body_length(&self) -> u32 {
        self.body_length
    }

    /// The declared length of the header fields array in bytes, excluding
    /// the padding that follows it.
    #[inline]
    pub fn fields_length(&self) -> u32 {
        self.fields_length
    }

    /// Scan the header fields array for the entry with the given id,
    /// stopping at the first match.
    pub fn find_header(&self, id: u8) -> Result<Option<Value>> {
        let end = FIXED_HEADER_LEN + self.fields_length as usize;
        let mut cur = ReadCursor::new(&self.data[..end], self.endianness);
        cur.seek(FIXED_HEADER_LEN);

        while cur.position() < end {
            cur.pad(8)?;
            let entry_id = cur.get_u8()?;
            let signature = cur.get_signature()?;

            let codec = match signature.as_bytes() {
                &[code] => Codec::basic(code),
                _ => None,
            };

            let Some(codec) = codec else {
                return Err(ProtocolError::UnknownHeaderType(signature.into()).into());
            };

            let value = codec.unmarshal(&mut cur)?;

            if entry_id == id {
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    /// The offset at which the body begins.
    #[inline]
    pub fn body_start(&self) -> usize {
        round_up(FIXED_HEADER_LEN + self.fields_length as usize, 8)
    }

    /// A cursor positioned at the start of the body, bounded by the declared
    /// body length.
    pub fn body(&self) -> ReadCursor<'a> {
        let start = self.body_start();
        let end = start + self.body_length as usize;
        let mut cur = ReadCursor::new(&self.data[..end], self.endianness);
        cur.seek(start);
        cur
    }

    /// Unmarshal the body values in order.
    pub fn read_body(&self, codecs: &[Codec]) -> Result<Vec<Value>> {
        let mut cur = self.body();
        codecs.iter().map(|codec| codec.unmarshal(&mut cur)).collect()
    }

    /// The PATH header.
    pub fn path(&self) -> Result<Option<String>> {
        Ok(self
            .find_header(field::PATH)?
            .and_then(|v| v.as_str().map(str::to_owned)))
    }

    /// The INTERFACE header.
    pub fn interface(&self) -> Result<Option<String>> {
        Ok(self
            .find_header(field::INTERFACE)?
            .and_then(|v| v.as_str().map(str::to_owned)))
    }

    /// The MEMBER header.
    pub fn member(&self) -> Result<Option<String>> {
        Ok(self
            .find_header(field::MEMBER)?
            .and_then(|v| v.as_str().map(str::to_owned)))
    }

    /// The ERROR_NAME header.
    pub fn error_name(&self) -> Result<Option<String>> {
        Ok(self
            .find_header(field::ERROR_NAME)?
            .and_then(|v| v.as_str().map(str::to_owned)))
    }

    /// The REPLY_SERIAL header.
    pub fn reply_serial(&self) -> Result<Option<u32>> {
        Ok(self.find_header(field::REPLY_SERIAL)?.and_then(|v| v.as_u32()))
    }

    /// The DESTINATION header.
    pub fn destination(&self) -> Result<Option<String>> {
        Ok(self
            .find_header(field::DESTINATION)?
            .and_then(|v| v.as_str().map(str::to_owned)))
    }

    /// The SENDER header.
    pub fn sender(&self) -> Result<Option<String>> {
        Ok(self
            .find_header(field::SENDER)?
            .and_then(|v| v.as_str().map(str::to_owned)))
    }

    /// The SIGNATURE header, describing the body.
    pub fn body_signature(&self) -> Result<Option<String>> {
        Ok(self
            .find_header(field::SIGNATURE)?
            .and_then(|v| v.as_str().map(str::to_owned)))
    }
}
