//! An asynchronous client-side D-Bus implementation.
//!
//! The crate is built around three pieces: a signature-directed,
//! alignment-aware marshaller ([`signature`], [`Cursor`]), a message framing
//! codec ([`MessageBuilder`], [`MessageReader`]), and a connection state
//! machine ([`Connection`]) that performs the SASL handshake and the `Hello`
//! call, assigns serials, reassembles the inbound stream and correlates
//! replies with their calls.
//!
//! # Examples
//!
//! ```no_run
//! use minibus::{Connection, MessageBuilder};
//! use minibus::signature::parse;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> minibus::Result<()> {
//! let conn = Connection::session_bus().await?;
//! let handle = conn.handle();
//! tokio::spawn(conn.run());
//!
//! let call = MessageBuilder::method_call("/org/freedesktop/DBus", "ListNames")
//!     .with_interface("org.freedesktop.DBus")
//!     .with_destination("org.freedesktop.DBus")
//!     .build(&[], &[])?;
//!
//! let reply = handle.call(call).await?;
//! let names = reply.reader()?.read_body(&parse("as")?)?;
//! # Ok(()) }
//! ```

#[doc(inline)]
pub use self::error::{Error, Result};
mod error;

#[doc(inline)]
pub use self::protocol::{Endianness, Flags};
pub mod protocol;

#[doc(inline)]
pub use self::cursor::{Cursor, ReadCursor, Slot};
mod cursor;

#[doc(inline)]
pub use self::value::Value;
mod value;

#[doc(inline)]
pub use self::signature::{Codec, CodecCache, MarshalError, SignatureError};
pub mod signature;

#[doc(inline)]
pub use self::message::{
    MessageBuf, MessageBuilder, MessageKind, MessageReader, ReceivedMessage,
};
mod message;

pub mod sasl;

#[doc(inline)]
pub use self::address::Address;
pub mod address;

#[doc(inline)]
pub use self::connection::{Connection, Handle};
mod connection;

pub mod introspect;
