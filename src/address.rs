//! D-Bus server addresses and the streams they open.

use std::env;

use tokio::net::UnixStream;

use crate::error::{Error, ErrorKind};
use crate::Result;

const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// A parsed D-Bus server address of the form `transport:key=value,…`.
///
/// The `unix` transport is supported, with exactly one of the `path` or
/// `abstract` keys. A `guid` key is parsed and retained but otherwise unused
/// by the client.
///
/// # Examples
///
/// ```
/// use minibus::Address;
///
/// let address = Address::parse("unix:path=/run/user/1000/bus,guid=abcd")?;
/// assert_eq!(address.guid(), Some("abcd"));
/// # Ok::<_, minibus::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    kind: AddressKind,
    guid: Option<Box<str>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AddressKind {
    /// A filesystem socket path.
    Path(Box<str>),
    /// An abstract namespace socket, NUL-prefixed when opened.
    Abstract(Box<str>),
}

impl Address {
    /// Parse an address string.
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = || Error::new(ErrorKind::InvalidAddress(address.into()));

        let Some((transport, rest)) = address.split_once(':') else {
            return Err(invalid());
        };

        if transport != "unix" {
            return Err(invalid());
        }

        let mut path = None;
        let mut abstract_name = None;
        let mut guid = None;

        for pair in rest.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(invalid());
            };

            match key {
                "path" => path = Some(value),
                "abstract" => abstract_name = Some(value),
                "guid" => guid = Some(value),
                _ => {}
            }
        }

        let kind = match (path, abstract_name) {
            (Some(path), None) => AddressKind::Path(path.into()),
            (None, Some(name)) => AddressKind::Abstract(name.into()),
            _ => return Err(invalid()),
        };

        Ok(Self {
            kind,
            guid: guid.map(Into::into),
        })
    }

    /// The retained `guid` key, if the address carried one.
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    /// Open a stream to the address.
    pub async fn open(&self) -> Result<UnixStream> {
        match &self.kind {
            AddressKind::Path(path) => Ok(UnixStream::connect(path.as_ref()).await?),
            AddressKind::Abstract(name) => connect_abstract(name),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn connect_abstract(name: &str) -> Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;
    use std::os::unix::net;

    let addr = net::SocketAddr::from_abstract_name(name.as_bytes())?;
    let stream = net::UnixStream::connect_addr(&addr)?;
    stream.set_nonblocking(true)?;
    Ok(UnixStream::from_std(stream)?)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn connect_abstract(name: &str) -> Result<UnixStream> {
    Err(Error::new(ErrorKind::InvalidAddress(
        format!("unix:abstract={name}").into(),
    )))
}

/// Open a stream to the session bus named by `DBUS_SESSION_BUS_ADDRESS`.
///
/// The variable being absent is a startup error.
pub async fn session_bus() -> Result<UnixStream> {
    let Some(address) = env::var(ENV_SESSION_BUS).ok() else {
        return Err(Error::new(ErrorKind::MissingBus));
    };

    Address::parse(&address)?.open().await
}

/// Open a stream to the system bus named by `DBUS_SYSTEM_BUS_ADDRESS`,
/// falling back to the well-known socket path.
pub async fn system_bus() -> Result<UnixStream> {
    let address = env::var(ENV_SYSTEM_BUS).unwrap_or_else(|_| DEFAULT_SYSTEM_BUS.to_owned());
    Address::parse(&address)?.open().await
}
