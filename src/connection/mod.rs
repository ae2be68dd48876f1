//! The connection state machine: handshake, serial allocation, call
//! correlation and stream reassembly.

pub(crate) use self::recv_queue::RecvQueue;
mod recv_queue;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::address;
use crate::error::{Error, ErrorKind};
use crate::message::{MessageBuf, MessageBuilder, MessageKind, MessageReader, ReceivedMessage};
use crate::sasl::{self, Auth, AuthError, ServerReply};
use crate::Result;

/// Well-known coordinates of the message bus itself.
pub(crate) const BUS_DESTINATION: &str = "org.freedesktop.DBus";
pub(crate) const BUS_PATH: &str = "/org/freedesktop/DBus";

/// Serials count up from 1 and wrap here; 0 is reserved to mean "no reply
/// serial".
const SERIAL_WRAP: u32 = 1 << 31;

const COMMAND_BACKLOG: usize = 64;
const READ_CHUNK: usize = 4096;

/// The lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Handshaking,
    Authenticated,
    Naming,
    Ready,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Handshaking => write!(f, "handshaking"),
            ConnectionState::Authenticated => write!(f, "authenticated"),
            ConnectionState::Naming => write!(f, "naming"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Work submitted by a [`Handle`].
enum Command {
    Call {
        message: MessageBuf,
        reply: oneshot::Sender<Result<ReceivedMessage>>,
        timeout: Option<Duration>,
    },
    Send {
        message: MessageBuf,
    },
}

/// A registered reply waiter. One-shot: dispatch removes the entry.
#[derive(Debug)]
struct Waiter {
    reply: oneshot::Sender<Result<ReceivedMessage>>,
    deadline: Option<Instant>,
}

/// A client connection to a D-Bus peer.
///
/// The connection is generic over the byte channel, so it can be driven over
/// an in-memory duplex in tests; production use goes through
/// [`session_bus`] or [`system_bus`].
///
/// After [`connect`] completes the connection is ready: take as many
/// [`Handle`]s as needed through [`handle`] and hand the connection itself
/// to [`run`], which drives IO, correlates replies and evicts expired
/// waiters until the peer goes away.
///
/// [`session_bus`]: Self::session_bus
/// [`system_bus`]: Self::system_bus
/// [`connect`]: Self::connect
/// [`handle`]: Self::handle
/// [`run`]: Self::run
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    state: ConnectionState,
    /// Next serial to assign.
    serial: u32,
    pending: HashMap<u32, Waiter>,
    recv: RecvQueue,
    /// Messages reassembled but not yet dispatched.
    inbox: VecDeque<ReceivedMessage>,
    commands: mpsc::Receiver<Command>,
    commands_tx: mpsc::Sender<Command>,
    unique_name: Option<Box<str>>,
}

impl Connection<UnixStream> {
    /// Connect to the session bus named by `DBUS_SESSION_BUS_ADDRESS`.
    pub async fn session_bus() -> Result<Self> {
        let stream = address::session_bus().await?;
        Self::connect(stream, &[Auth::external_from_uid(), Auth::Anonymous]).await
    }

    /// Connect to the system bus named by `DBUS_SYSTEM_BUS_ADDRESS`, falling
    /// back to the well-known socket path.
    pub async fn system_bus() -> Result<Self> {
        let stream = address::system_bus().await?;
        Self::connect(stream, &[Auth::external_from_uid(), Auth::Anonymous]).await
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Establish a connection over `stream`: the mandated NUL byte, SASL
    /// authentication over `methods` in order, `BEGIN`, then the `Hello`
    /// call that yields the connection's unique bus name.
    pub async fn connect(stream: S, methods: &[Auth]) -> Result<Self> {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BACKLOG);

        let mut conn = Self {
            stream,
            state: ConnectionState::Connecting,
            serial: 1,
            pending: HashMap::new(),
            recv: RecvQueue::new(),
            inbox: VecDeque::new(),
            commands,
            commands_tx,
            unique_name: None,
        };

        conn.handshake(methods).await?;
        conn.hello().await?;
        conn.state = ConnectionState::Ready;
        debug!(state = %conn.state, "connection established");
        Ok(conn)
    }

    /// The unique bus name assigned by the `Hello` reply.
    pub fn unique_name(&self) -> Option<&str> {
        self.unique_name.as_deref()
    }

    /// A cloneable handle submitting calls to this connection.
    pub fn handle(&self) -> Handle {
        Handle {
            tx: self.commands_tx.clone(),
        }
    }

    /// Drive the connection until it closes.
    ///
    /// The driver owns the socket, the pending-call table and the
    /// reassembly buffer; handles submit work through the command channel.
    /// When the transport fails or the peer violates the protocol, every
    /// pending waiter is completed with a closed-connection error and the
    /// failure is returned.
    pub async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        self.state = ConnectionState::Closed;
        debug!(state = %self.state, pending = self.pending.len(), "connection closed");

        for (_, waiter) in self.pending.drain() {
            let _ = waiter.reply.send(Err(Error::closed()));
        }

        result
    }

    async fn drive(&mut self) -> Result<()> {
        // Replies that arrived while naming are dispatched first.
        while let Some(frame) = self.inbox.pop_front() {
            self.dispatch(frame)?;
        }

        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let deadline = self.pending.values().filter_map(|w| w.deadline).min();

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.command(command).await?,
                        None => return Ok(()),
                    }
                }
                n = self.stream.read(&mut chunk) => {
                    let n = n?;

                    if n == 0 {
                        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                    }

                    let mut out = Vec::new();
                    self.recv.feed(&chunk[..n], &mut out)?;

                    for frame in out {
                        self.dispatch(frame)?;
                    }
                }
                _ = wait_until(deadline) => {
                    self.expire(Instant::now());
                }
            }
        }
    }

    async fn command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Call {
                mut message,
                reply,
                timeout,
            } => {
                let serial = self.next_serial();
                message.stamp_serial(serial);
                let deadline = timeout.map(|timeout| Instant::now() + timeout);

                // Registered before any byte is written, so a reply racing
                // the write still finds its waiter.
                self.pending.insert(serial, Waiter { reply, deadline });

                trace!(serial, "sending call");
                self.stream.write_all(message.as_bytes()).await?;
            }
            Command::Send { mut message } => {
                let serial = self.next_serial();
                message.stamp_serial(serial);
                trace!(serial, "sending message");
                self.stream.write_all(message.as_bytes()).await?;
            }
        }

        Ok(())
    }

    fn dispatch(&mut self, frame: ReceivedMessage) -> Result<()> {
        let reply_serial = {
            let reader = frame.reader()?;
            reader.reply_serial()?
        };

        match reply_serial {
            Some(reply_serial) => match self.pending.remove(&reply_serial) {
                Some(waiter) => {
                    if waiter.reply.send(Ok(frame)).is_err() {
                        trace!(reply_serial, "reply for a cancelled call");
                    }
                }
                None => trace!(reply_serial, "dropping unmatched reply"),
            },
            // Signals and inbound calls; signal routing would attach here.
            None => trace!("dropping message without reply serial"),
        }

        Ok(())
    }

    fn expire(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, waiter)| waiter.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(serial, _)| *serial)
            .collect();

        for serial in expired {
            if let Some(waiter) = self.pending.remove(&serial) {
                debug!(serial, "call timed out");
                let _ = waiter.reply.send(Err(Error::new(ErrorKind::Timeout)));
            }
        }
    }

    fn next_serial(&mut self) -> u32 {
        let serial = self.serial;

        self.serial = if serial == SERIAL_WRAP { 1 } else { serial + 1 };

        serial
    }

    async fn handshake(&mut self, methods: &[Auth]) -> Result<()> {
        self.state = ConnectionState::Handshaking;
        debug!(state = %self.state, "starting handshake");

        // D-Bus mandates a single NUL byte ahead of the SASL exchange.
        self.stream.write_all(b"\0").await?;

        let mut lines = LineReader::new();
        let mut authenticated = false;

        for auth in methods {
            self.stream.write_all(&auth.line()).await?;
            let line = lines.next_line(&mut self.stream).await?;

            match sasl::parse_reply(&line)? {
                ServerReply::Ok(guid) => {
                    debug!(guid, "authenticated");
                    authenticated = true;
                    break;
                }
                reply => {
                    trace!(?reply, ?auth, "auth method refused");
                }
            }
        }

        if !authenticated {
            return Err(AuthError::Exhausted.into());
        }

        self.stream.write_all(sasl::BEGIN).await?;
        self.state = ConnectionState::Authenticated;

        // Anything past the final line is already binary message data.
        let residue = lines.into_residue();
        let mut out = Vec::new();
        self.recv.feed(&residue, &mut out)?;
        self.inbox.extend(out);
        Ok(())
    }

    async fn hello(&mut self) -> Result<()> {
        self.state = ConnectionState::Naming;

        let mut message = MessageBuilder::method_call(BUS_PATH, "Hello")
            .with_destination(BUS_DESTINATION)
            .build(&[], &[])?;

        let serial = self.next_serial();
        message.stamp_serial(serial);
        self.stream.write_all(message.as_bytes()).await?;

        loop {
            while let Some(frame) = self.inbox.pop_front() {
                let reader = frame.reader()?;

                match reader.reply_serial()? {
                    Some(reply_serial) if reply_serial == serial => {
                        if reader.kind() == MessageKind::Error {
                            let name = reader.error_name()?.unwrap_or_default();
                            let message = error_message(&reader)?;
                            return Err(Error::call(name.into(), message.into()));
                        }

                        let name = reader.body().get_string()?.to_owned();
                        debug!(name, "named by the bus");
                        self.unique_name = Some(name.into());
                        return Ok(());
                    }
                    _ => trace!("dropping message ahead of the Hello reply"),
                }
            }

            self.read_some().await?;
        }
    }

    async fn read_some(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk).await?;

        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        let mut out = Vec::new();
        self.recv.feed(&chunk[..n], &mut out)?;
        self.inbox.extend(out);
        Ok(())
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The error message carried in the body of an error reply, when its
/// signature leads with a string.
fn error_message(reader: &MessageReader<'_>) -> Result<String> {
    match reader.body_signature()? {
        Some(signature) if signature.starts_with('s') => {
            Ok(reader.body().get_string()?.to_owned())
        }
        _ => Ok(String::new()),
    }
}

/// A cloneable handle submitting messages to a running [`Connection`].
#[derive(Debug, Clone)]
pub struct Handle {
    tx: mpsc::Sender<Command>,
}

impl Handle {
    /// Send a method call and await its reply.
    ///
    /// The connection assigns the serial and correlates the reply; an error
    /// reply resolves to an [`Error`] carrying the peer's error name and
    /// message. Dropping the returned future abandons the call; a late reply
    /// is then discarded by the driver.
    pub async fn call(&self, message: MessageBuf) -> Result<ReceivedMessage> {
        self.call_inner(message, None).await
    }

    /// Like [`call`], but the waiter is evicted with a timeout error if no
    /// reply arrives within `timeout`.
    ///
    /// [`call`]: Self::call
    pub async fn call_with_timeout(
        &self,
        message: MessageBuf,
        timeout: Duration,
    ) -> Result<ReceivedMessage> {
        self.call_inner(message, Some(timeout)).await
    }

    /// Queue a message that expects no reply, such as a signal emission.
    pub async fn send(&self, message: MessageBuf) -> Result<()> {
        self.tx
            .send(Command::Send { message })
            .await
            .map_err(|_| Error::closed())
    }

    async fn call_inner(
        &self,
        message: MessageBuf,
        timeout: Option<Duration>,
    ) -> Result<ReceivedMessage> {
        let (tx, rx) = oneshot::channel();

        self.tx
            .send(Command::Call {
                message,
                reply: tx,
                timeout,
            })
            .await
            .map_err(|_| Error::closed())?;

        let frame = rx.await.map_err(|_| Error::new(ErrorKind::Cancelled))??;

        let failure = {
            let reader = frame.reader()?;

            if reader.kind() == MessageKind::Error {
                let name = reader.error_name()?.unwrap_or_default();
                let message = error_message(&reader)?;
                Some(Error::call(name.into(), message.into()))
            } else {
                None
            }
        };

        match failure {
            Some(error) => Err(error),
            None => Ok(frame),
        }
    }
}

/// Buffers handshake text and splits it at CRLF boundaries.
struct LineReader {
    buf: Vec<u8>,
}

impl LineReader {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// The next line, without its CRLF.
    async fn next_line<S>(&mut self, stream: &mut S) -> Result<Vec<u8>>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(at) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let rest = self.buf.split_off(at + 2);
                let mut line = std::mem::replace(&mut self.buf, rest);
                line.truncate(at);
                return Ok(line);
            }

            let mut chunk = [0u8; 256];
            let n = stream.read(&mut chunk).await?;

            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }

            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Bytes read past the last line, which belong to the binary protocol.
    fn into_residue(self) -> Vec<u8> {
        self.buf
    }
}
