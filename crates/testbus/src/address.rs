//! Parsing of message-bus addresses such as the one a daemon prints on start.
//!
//! An address is a `;`-separated list of entries. Each entry names a
//! transport followed by `key=value` pairs separated by `,`, for example
//! `unix:path=/tmp/dbus-x,guid=0123`. Values may percent-encode any byte.

use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use thiserror::Error;

/// Errors raised while parsing a bus address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The address contained no entries.
    #[error("bus address is empty")]
    Empty,
    /// An entry had no `transport:` prefix.
    #[error("address entry '{entry}' has no transport prefix")]
    MissingTransport {
        /// Offending entry.
        entry: String,
    },
    /// The transport is not one a bus daemon advertises.
    #[error("unknown bus transport '{transport}'")]
    UnknownTransport {
        /// Transport name as written.
        transport: String,
    },
    /// A parameter lacked `=`.
    #[error("address parameter '{pair}' is not a key=value pair")]
    MalformedPair {
        /// Offending parameter.
        pair: String,
    },
    /// A parameter key appeared twice within one entry.
    #[error("address parameter '{key}' is repeated")]
    DuplicateKey {
        /// Repeated key.
        key: String,
    },
    /// A value contained a `%` not followed by two hex digits.
    #[error("invalid percent escape in address value '{value}'")]
    BadEscape {
        /// Offending value, still encoded.
        value: String,
    },
    /// A value did not decode to UTF-8.
    #[error("address parameter '{key}' does not decode to UTF-8")]
    NotUtf8 {
        /// Key whose value failed to decode.
        key: String,
    },
}

/// Transports understood by message-bus daemons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Unix domain socket.
    Unix,
    /// Plain TCP.
    Tcp,
    /// TCP guarded by a nonce file.
    NonceTcp,
    /// Connection through a spawned process's stdio.
    UnixExec,
    /// macOS launchd-provided socket.
    Launchd,
    /// Autolaunched session bus.
    Autolaunch,
    /// systemd socket activation.
    Systemd,
}

impl Transport {
    /// Transport name as it appears in addresses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unix => "unix",
            Self::Tcp => "tcp",
            Self::NonceTcp => "nonce-tcp",
            Self::UnixExec => "unixexec",
            Self::Launchd => "launchd",
            Self::Autolaunch => "autolaunch",
            Self::Systemd => "systemd",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = AddressError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "unix" => Ok(Self::Unix),
            "tcp" => Ok(Self::Tcp),
            "nonce-tcp" => Ok(Self::NonceTcp),
            "unixexec" => Ok(Self::UnixExec),
            "launchd" => Ok(Self::Launchd),
            "autolaunch" => Ok(Self::Autolaunch),
            "systemd" => Ok(Self::Systemd),
            other => Err(AddressError::UnknownTransport {
                transport: other.to_owned(),
            }),
        }
    }
}

/// One `transport:key=value,...` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressEntry {
    transport: Transport,
    params: Vec<(String, String)>,
}

impl AddressEntry {
    /// Transport of this entry.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// Decoded value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.as_str())
    }

    /// Decoded parameters in their written order.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    fn parse(entry: &str) -> Result<Self, AddressError> {
        let (name, rest) = entry
            .split_once(':')
            .ok_or_else(|| AddressError::MissingTransport {
                entry: entry.to_owned(),
            })?;
        let transport = name.parse::<Transport>()?;
        let mut params: Vec<(String, String)> = Vec::new();
        for pair in rest.split(',').filter(|pair| !pair.is_empty()) {
            let (key, encoded) = pair
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| AddressError::MalformedPair {
                    pair: pair.to_owned(),
                })?;
            if params.iter().any(|(existing, _)| existing == key) {
                return Err(AddressError::DuplicateKey {
                    key: key.to_owned(),
                });
            }
            params.push((key.to_owned(), decode_value(key, encoded)?));
        }
        Ok(Self { transport, params })
    }
}

/// A parsed bus address.
///
/// The original text is kept so the address can be exported unchanged, for
/// example through `DBUS_SESSION_BUS_ADDRESS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusAddress {
    raw: String,
    entries: Vec<AddressEntry>,
}

impl BusAddress {
    /// Parsed entries, in preference order.
    #[must_use]
    pub fn entries(&self) -> &[AddressEntry] {
        &self.entries
    }

    /// The address exactly as it was written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for BusAddress {
    type Err = AddressError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let entries = text
            .split(';')
            .filter(|entry| !entry.is_empty())
            .map(AddressEntry::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if entries.is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(Self {
            raw: text.to_owned(),
            entries,
        })
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn decode_value(key: &str, encoded: &str) -> Result<String, AddressError> {
    let bytes = encoded.as_bytes();
    let well_formed = bytes.iter().enumerate().all(|(index, byte)| {
        *byte != b'%'
            || bytes
                .get(index + 1..index + 3)
                .is_some_and(|digits| digits.iter().all(u8::is_ascii_hexdigit))
    });
    if !well_formed {
        return Err(AddressError::BadEscape {
            value: encoded.to_owned(),
        });
    }
    percent_decode_str(encoded)
        .decode_utf8()
        .map(std::borrow::Cow::into_owned)
        .map_err(|_| AddressError::NotUtf8 {
            key: key.to_owned(),
        })
}
