//! Building and reading D-Bus messages.

pub use self::builder::MessageBuilder;
mod builder;

pub use self::reader::MessageReader;
pub(crate) use self::reader::frame_len;
mod reader;

#[cfg(test)]
mod tests;

use crate::protocol::{Flags, SERIAL_OFFSET};

/// The kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// A method call, which may prompt a reply.
    MethodCall = 1,
    /// A method reply carrying returned data.
    MethodReturn = 2,
    /// An error reply.
    Error = 3,
    /// A signal emission.
    Signal = 4,
}

impl MessageKind {
    #[inline]
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => MessageKind::MethodCall,
            2 => MessageKind::MethodReturn,
            3 => MessageKind::Error,
            4 => MessageKind::Signal,
            _ => return None,
        })
    }
}

/// A fully built outbound message.
///
/// The serial field is zero until the connection stamps it on send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBuf {
    pub(crate) bytes: Vec<u8>,
    kind: MessageKind,
    flags: Flags,
}

impl MessageBuf {
    pub(crate) fn new(bytes: Vec<u8>, kind: MessageKind, flags: Flags) -> Self {
        Self { bytes, kind, flags }
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

    /// The full wire bytes of the message.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Test if sending this message should register a reply waiter.
    pub(crate) fn expects_reply(&self) -> bool {
        self.kind == MessageKind::MethodCall && !(self.flags & Flags::NO_REPLY_EXPECTED)
    }

    /// Stamp the serial at its fixed offset. Outbound messages are always
    /// little-endian.
    pub(crate) fn stamp_serial(&mut self, serial: u32) {
        self.bytes[SERIAL_OFFSET..SERIAL_OFFSET + 4].copy_from_slice(&serial.to_le_bytes());
    }
}

/// One complete inbound message, reassembled from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    bytes: Vec<u8>,
}

impl ReceivedMessage {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The full wire bytes of the message.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parse the message into a [`MessageReader`].
    #[inline]
    pub fn reader(&self) -> crate::Result<MessageReader<'_>> {
        MessageReader::new(&self.bytes)
    }
}
