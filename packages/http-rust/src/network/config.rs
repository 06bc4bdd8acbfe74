//! The `http` configuration section and the additional-server descriptors it
//! carries.
//!
//! The section is read leniently: values may be numbers or numeric strings,
//! and malformed server entries are reported per entry rather than failing
//! the whole section.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::bind::resolve_bind;
use crate::error::BootError;

/// Transport security mode a listener is opened under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Plain,
    Secure,
}

impl Transport {
    /// Parses a `protocol` value (`"http"` or `"https"`, any case).
    #[must_use]
    pub fn parse(protocol: &str) -> Option<Self> {
        if protocol.eq_ignore_ascii_case("http") {
            Some(Self::Plain)
        } else if protocol.eq_ignore_ascii_case("https") {
            Some(Self::Secure)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "http",
            Self::Secure => "https",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS certificate configuration.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain.
    pub cert_path: PathBuf,
    /// Path to the PEM private key.
    pub key_path: PathBuf,
}

/// Result of reading a port value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortValue {
    Absent,
    Valid(u16),
    /// Numeric, but not a port number (negative, fractional or above 65535).
    OutOfRange,
    /// Not a number at all.
    Invalid,
}

/// Reads a port from a number or a numeric string.
#[must_use]
pub fn parse_port(value: Option<&Value>) -> PortValue {
    let parsed = match value {
        None | Some(Value::Null) => return PortValue::Absent,
        Some(Value::Number(n)) => {
            let port = match n.as_u64() {
                Some(port) => u16::try_from(port).ok(),
                None => n.as_f64().and_then(integral_port),
            };
            return port.map_or(PortValue::OutOfRange, PortValue::Valid);
        }
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.parse::<u16>() {
                Ok(port) => Some(port),
                Err(_) if s.parse::<f64>().is_ok_and(|n| !n.is_nan()) => {
                    return PortValue::OutOfRange
                }
                Err(_) => None,
            }
        }
        Some(_) => None,
    };
    parsed.map_or(PortValue::Invalid, PortValue::Valid)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn integral_port(value: f64) -> Option<u16> {
    (value.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&value))
        .then(|| value as u16)
}

/// Why an entry of `servers` was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidServerEntry {
    #[error("One of the config's servers is undefined")]
    Missing,
    #[error("One of the config's servers has invalid port")]
    InvalidPort,
    #[error("One of the config's servers has unknown protocol `{protocol}`")]
    UnknownProtocol { protocol: String },
}

/// A validated entry of `servers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub port: u16,
    /// Resolved bind host.
    pub bind: String,
    pub transport: Transport,
}

impl ServerDescriptor {
    /// Validates one raw `servers` entry.
    ///
    /// # Errors
    ///
    /// Returns the reason the entry cannot be used.
    pub fn from_value(value: &Value) -> Result<Self, InvalidServerEntry> {
        if value.is_null() {
            return Err(InvalidServerEntry::Missing);
        }
        let raw_port = value.get("port");
        let PortValue::Valid(port) = parse_port(raw_port) else {
            return Err(InvalidServerEntry::InvalidPort);
        };
        // A numeric zero is unset here; only the string "0" asks for an ephemeral port.
        if port == 0 && matches!(raw_port, Some(Value::Number(_))) {
            return Err(InvalidServerEntry::InvalidPort);
        }
        let transport = match value.get("protocol") {
            None | Some(Value::Null) => Transport::Plain,
            Some(Value::String(protocol)) => Transport::parse(protocol).ok_or_else(|| {
                InvalidServerEntry::UnknownProtocol {
                    protocol: protocol.clone(),
                }
            })?,
            Some(other) => {
                return Err(InvalidServerEntry::UnknownProtocol {
                    protocol: other.to_string(),
                })
            }
        };
        Ok(Self {
            port,
            bind: resolve_bind(value.get("bind").unwrap_or(&Value::Null)),
            transport,
        })
    }
}

/// Parsed `http` configuration section.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    /// Primary port. `Absent` and `Invalid` both disable the primary listener;
    /// `OutOfRange` never survives [`HttpConfig::from_section`].
    pub port: PortValue,
    /// Resolved primary bind host.
    pub bind: String,
    /// Raw additional-server entries, validated one by one at start.
    pub servers: Vec<Value>,
    pub tls: Option<TlsConfig>,
    raw: Map<String, Value>,
}

impl HttpConfig {
    /// Name of the configuration section.
    pub const SECTION: &'static str = "http";

    /// Parses the `http` section.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::MissingConfig`] if the section is absent and
    /// [`BootError::InvalidConfig`] if it is not an object, has a numeric
    /// `port` that is not a port number, or carries an unreadable `tls` record.
    pub fn from_section(section: Option<Value>) -> Result<Self, BootError> {
        let Some(section) = section else {
            return Err(BootError::MissingConfig {
                section: Self::SECTION,
            });
        };
        let Value::Object(raw) = section else {
            return Err(BootError::InvalidConfig {
                field: Self::SECTION,
                reason: "expected an object".to_string(),
            });
        };

        let port = parse_port(raw.get("port"));
        if let (PortValue::OutOfRange, Some(value)) = (port, raw.get("port")) {
            return Err(BootError::InvalidConfig {
                field: "port",
                reason: format!("{value} is not a port number"),
            });
        }

        let tls = match raw.get("tls") {
            None | Some(Value::Null) => None,
            Some(value) => Some(serde_json::from_value::<TlsConfig>(value.clone()).map_err(
                |e| BootError::InvalidConfig {
                    field: "tls",
                    reason: e.to_string(),
                },
            )?),
        };

        Ok(Self {
            port,
            bind: resolve_bind(raw.get("bind").unwrap_or(&Value::Null)),
            servers: match raw.get("servers") {
                Some(Value::Array(servers)) => servers.clone(),
                _ => Vec::new(),
            },
            tls,
            raw,
        })
    }

    /// A component-specific sub-section, e.g. `api` or `socket`.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.raw.get(name).filter(|value| !value.is_null())
    }
}
