//! The SASL-style text handshake D-Bus performs before binary messages.


use std::error;
use std::fmt;
use std::fmt::Write;
use std::str::from_utf8;

/// The line that finalizes a successful handshake.
pub(crate) const BEGIN: &[u8] = b"BEGIN\r\n";

/// A SASL authentication method, in the form the client sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// `EXTERNAL` authentication carrying the ASCII-hex encoding of the
    /// client's decimal uid.
    External(Box<str>),
    /// `ANONYMOUS` authentication.
    Anonymous,
}

impl Auth {
    /// `EXTERNAL` authentication for the current process uid.
    #[cfg(unix)]
    pub fn external_from_uid() -> Auth {
        // SAFETY: getuid has no failure modes.
        let uid = unsafe { libc::getuid() };
        Self::external_from_u32(uid)
    }

    /// `EXTERNAL` authentication for an explicit uid.
    ///
    /// The payload is the uid written in decimal, each ASCII digit then
    /// hex-encoded.
    ///
    /// # Examples
    ///
    /// ```
    /// use minibus::sasl::Auth;
    ///
    /// assert_eq!(Auth::external_from_u32(1000), Auth::External("31303030".into()));
    /// ```
    pub fn external_from_u32(id: u32) -> Auth {
        let mut hex = String::new();

        for digit in id.to_string().bytes() {
            let _ = write!(hex, "{digit:02x}");
        }

        Auth::External(hex.into())
    }

    /// The full `AUTH` line for this method, CRLF included.
    pub(crate) fn line(&self) -> Vec<u8> {
        match self {
            Auth::External(hex) => format!("AUTH EXTERNAL {hex}\r\n").into_bytes(),
            Auth::Anonymous => b"AUTH ANONYMOUS \r\n".to_vec(),
        }
    }
}

/// A reply line from the server, split at the verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerReply<'a> {
    /// Authentication succeeded; carries the server GUID.
    Ok(&'a str),
    /// The method was rejected; carries the methods the server offers.
    Rejected(&'a str),
    /// A challenge for multi-step methods.
    Data(&'a str),
    /// The server could not parse the client line.
    Error(&'a str),
}

/// Parse one CRLF-delimited server line, already stripped of its line
/// ending.
pub(crate) fn parse_reply(line: &[u8]) -> Result<ServerReply<'_>, AuthError> {
    let Ok(line) = from_utf8(line) else {
        return Err(AuthError::InvalidLine);
    };

    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));

    match verb {
        "OK" => Ok(ServerReply::Ok(rest)),
        "REJECTED" => Ok(ServerReply::Rejected(rest)),
        "DATA" => Ok(ServerReply::Data(rest)),
        "ERROR" => Ok(ServerReply::Error(rest)),
        _ => Err(AuthError::InvalidLine),
    }
}

/// An error raised during the text handshake.
///
/// Authentication failures close the connection.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    /// Every configured method was rejected by the server.
    Exhausted,
    /// The server sent handshake text this crate cannot parse.
    InvalidLine,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Exhausted => write!(f, "No usable auth method"),
            AuthError::InvalidLine => write!(f, "Invalid SASL line"),
        }
    }
}

impl error::Error for AuthError {}
