//! AMS network addresses.
//!
//! An AMS net id is written as six dotted decimal octets, e.g. `5.80.201.232.1.1`.
//! On the wire it occupies exactly six bytes, followed by a 16-bit AMS port.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of octets in an AMS net id.
pub const NET_ID_LEN: usize = 6;

/// A 6-byte AMS network identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AmsNetId(pub [u8; NET_ID_LEN]);

impl AmsNetId {
    /// Create a net id from its octets.
    #[must_use]
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self([a, b, c, d, e, f])
    }

    /// Octets in wire order.
    #[must_use]
    pub fn bytes(&self) -> [u8; NET_ID_LEN] {
        self.0
    }

    /// Read a net id from the first six bytes of `bytes`.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; NET_ID_LEN] = bytes.get(..NET_ID_LEN)?.try_into().ok()?;
        Some(Self(octets))
    }
}

impl FromStr for AmsNetId {
    type Err = NetIdError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(NetIdError::Empty);
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != NET_ID_LEN {
            return Err(NetIdError::OctetCount {
                input: trimmed.to_string(),
                found: parts.len(),
            });
        }

        let mut octets = [0u8; NET_ID_LEN];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| NetIdError::InvalidOctet {
                input: trimmed.to_string(),
                octet: (*part).to_string(),
            })?;
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for AmsNetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a}.{b}.{c}.{d}.{e}.{g}")
    }
}

/// An AMS endpoint: net id plus AMS port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AmsAddr {
    /// Network identifier of the device
    pub net_id: AmsNetId,
    /// Logical service on that device (851 is the first TwinCAT 3 PLC runtime)
    pub port: u16,
}

impl AmsAddr {
    /// Create a new endpoint.
    #[must_use]
    pub const fn new(net_id: AmsNetId, port: u16) -> Self {
        Self { net_id, port }
    }

    /// Write the 8-byte wire form (net id + little-endian port).
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.net_id.0);
        out.extend_from_slice(&self.port.to_le_bytes());
    }

    /// Read the 8-byte wire form.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let net_id = AmsNetId::from_slice(bytes)?;
        let port = bytes.get(NET_ID_LEN..NET_ID_LEN + 2)?;
        Some(Self {
            net_id,
            port: u16::from_le_bytes([port[0], port[1]]),
        })
    }
}

impl fmt::Display for AmsAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.net_id, self.port)
    }
}

/// Errors that can occur parsing a net id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetIdError {
    /// Input was empty
    #[error("empty AMS net id")]
    Empty,
    /// Wrong number of dotted parts
    #[error("AMS net id '{input}' has {found} octets, expected 6")]
    OctetCount {
        /// The rejected input
        input: String,
        /// Number of parts found
        found: usize,
    },
    /// A part is not a number in 0..=255
    #[error("AMS net id '{input}' has invalid octet '{octet}'")]
    InvalidOctet {
        /// The rejected input
        input: String,
        /// The offending part
        octet: String,
    },
}
