//! AMS/ADS frame codec.
//!
//! A frame is the fixed 32-byte AMS header followed by the ADS payload:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 6 | target net id |
//! | 6 | 2 | target port |
//! | 8 | 6 | source net id |
//! | 14 | 2 | source port |
//! | 16 | 2 | command id |
//! | 18 | 2 | state flags |
//! | 20 | 4 | payload length |
//! | 24 | 4 | error code |
//! | 28 | 4 | invocation id |
//!
//! Responses carry `result(4) + length(4) + data` right after the header
//! (`result(4)` only for Write). Some deployments prepend the 6-byte AMS/TCP
//! prefix (2 reserved bytes + 4-byte total length); see [`FrameLayout`].
//! All integers are little-endian.

use crate::index::SYM_VALBYNAME;
use crate::netid::AmsAddr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of the AMS header.
pub const AMS_HEADER_LEN: usize = 32;

/// Size of the legacy AMS/TCP length prefix.
pub const LEGACY_PREFIX_LEN: usize = 6;

/// State flags of an outgoing ADS request.
pub const STATE_REQUEST: u16 = 0x0004;

/// State flags of an ADS response.
pub const STATE_RESPONSE: u16 = 0x0005;

/// Deployment-wide choice of frame envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameLayout {
    /// Bare AMS header + payload
    #[default]
    Plain,
    /// 6-byte AMS/TCP prefix before the AMS header; every fixed offset shifts by 6
    Legacy,
}

impl FrameLayout {
    /// Offset of the AMS header within a frame.
    #[must_use]
    pub fn header_offset(self) -> usize {
        match self {
            Self::Plain => 0,
            Self::Legacy => LEGACY_PREFIX_LEN,
        }
    }

    /// Offset of the ADS payload within a frame.
    #[must_use]
    pub fn payload_offset(self) -> usize {
        self.header_offset() + AMS_HEADER_LEN
    }

    /// Offset of the invocation id within a frame.
    #[must_use]
    pub fn invoke_id_offset(self) -> usize {
        self.header_offset() + 28
    }

    fn wrap(self, ams: Vec<u8>) -> Vec<u8> {
        match self {
            Self::Plain => ams,
            Self::Legacy => {
                let mut out = Vec::with_capacity(LEGACY_PREFIX_LEN + ams.len());
                out.extend_from_slice(&0u16.to_le_bytes());
                out.extend_from_slice(&len_u32(ams.len()).to_le_bytes());
                out.extend_from_slice(&ams);
                out
            }
        }
    }
}

impl FromStr for FrameLayout {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "ams" => Ok(Self::Plain),
            "legacy" | "tcp" => Ok(Self::Legacy),
            other => Err(FrameError::UnknownLayout(other.to_string())),
        }
    }
}

/// ADS command ids used by this bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// Read from an index group/offset
    Read = 0x0002,
    /// Write to an index group/offset
    Write = 0x0003,
    /// Write then read in one exchange; also carries sum commands
    ReadWrite = 0x0009,
}

impl Command {
    /// Wire id of the command.
    #[must_use]
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Look up a command by wire id.
    #[must_use]
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x0002 => Some(Self::Read),
            0x0003 => Some(Self::Write),
            0x0009 => Some(Self::ReadWrite),
            _ => None,
        }
    }
}

/// The 32-byte AMS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmsHeader {
    /// Receiving endpoint
    pub target: AmsAddr,
    /// Sending endpoint
    pub source: AmsAddr,
    /// Command id
    pub command: u16,
    /// State flags
    pub state_flags: u16,
    /// Payload length in bytes
    pub length: u32,
    /// AMS-level error code
    pub error_code: u32,
    /// Invocation id for request/response correlation
    pub invoke_id: u32,
}

impl AmsHeader {
    fn write_to(&self, out: &mut Vec<u8>) {
        self.target.write_to(out);
        self.source.write_to(out);
        out.extend_from_slice(&self.command.to_le_bytes());
        out.extend_from_slice(&self.state_flags.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.error_code.to_le_bytes());
        out.extend_from_slice(&self.invoke_id.to_le_bytes());
    }

    /// Parse a header from exactly the first 32 bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns error if fewer than 32 bytes are available.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < AMS_HEADER_LEN {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                min: AMS_HEADER_LEN,
            });
        }
        let addr = |at: usize| {
            AmsAddr::from_slice(&bytes[at..at + 8]).ok_or(FrameError::TooShort {
                len: bytes.len(),
                min: AMS_HEADER_LEN,
            })
        };

        Ok(Self {
            target: addr(0)?,
            source: addr(8)?,
            command: read_u16(bytes, 16),
            state_flags: read_u16(bytes, 18),
            length: read_u32(bytes, 20),
            error_code: read_u32(bytes, 24),
            invoke_id: read_u32(bytes, 28),
        })
    }
}

/// An outgoing ADS request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdsRequest {
    /// Read `length` bytes
    Read {
        /// Index group
        index_group: u32,
        /// Index offset
        index_offset: u32,
        /// Requested byte count
        length: u32,
    },
    /// Write `data`
    Write {
        /// Index group
        index_group: u32,
        /// Index offset
        index_offset: u32,
        /// Value bytes
        data: Vec<u8>,
    },
    /// Write `data` then read `read_length` bytes
    ReadWrite {
        /// Index group
        index_group: u32,
        /// Index offset
        index_offset: u32,
        /// Expected response byte count
        read_length: u32,
        /// Bytes sent with the request
        data: Vec<u8>,
    },
}

impl AdsRequest {
    /// `ReadWrite` that reads a symbol value by its name.
    #[must_use]
    pub fn value_by_name(name: &str, read_length: u32) -> Self {
        Self::ReadWrite {
            index_group: SYM_VALBYNAME,
            index_offset: 0,
            read_length,
            data: null_terminated(name),
        }
    }

    /// Command id for this request.
    #[must_use]
    pub fn command(&self) -> Command {
        match self {
            Self::Read { .. } => Command::Read,
            Self::Write { .. } => Command::Write,
            Self::ReadWrite { .. } => Command::ReadWrite,
        }
    }

    /// Index group and offset addressed by this request.
    #[must_use]
    pub fn address(&self) -> (u32, u32) {
        match self {
            Self::Read {
                index_group,
                index_offset,
                ..
            }
            | Self::Write {
                index_group,
                index_offset,
                ..
            }
            | Self::ReadWrite {
                index_group,
                index_offset,
                ..
            } => (*index_group, *index_offset),
        }
    }

    /// Encode the ADS payload (without header).
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::Read {
                index_group,
                index_offset,
                length,
            } => {
                let mut out = Vec::with_capacity(12);
                out.extend_from_slice(&index_group.to_le_bytes());
                out.extend_from_slice(&index_offset.to_le_bytes());
                out.extend_from_slice(&length.to_le_bytes());
                out
            }
            Self::Write {
                index_group,
                index_offset,
                data,
            } => {
                let mut out = Vec::with_capacity(12 + data.len());
                out.extend_from_slice(&index_group.to_le_bytes());
                out.extend_from_slice(&index_offset.to_le_bytes());
                out.extend_from_slice(&len_u32(data.len()).to_le_bytes());
                out.extend_from_slice(data);
                out
            }
            Self::ReadWrite {
                index_group,
                index_offset,
                read_length,
                data,
            } => {
                let mut out = Vec::with_capacity(16 + data.len());
                out.extend_from_slice(&index_group.to_le_bytes());
                out.extend_from_slice(&index_offset.to_le_bytes());
                out.extend_from_slice(&read_length.to_le_bytes());
                out.extend_from_slice(&len_u32(data.len()).to_le_bytes());
                out.extend_from_slice(data);
                out
            }
        }
    }

    /// Encode a complete request frame.
    #[must_use]
    pub fn encode(
        &self,
        target: AmsAddr,
        source: AmsAddr,
        invoke_id: u32,
        layout: FrameLayout,
    ) -> Vec<u8> {
        let payload = self.payload();
        let header = AmsHeader {
            target,
            source,
            command: self.command().id(),
            state_flags: STATE_REQUEST,
            length: len_u32(payload.len()),
            error_code: 0,
            invoke_id,
        };

        let mut ams = Vec::with_capacity(AMS_HEADER_LEN + payload.len());
        header.write_to(&mut ams);
        ams.extend_from_slice(&payload);
        layout.wrap(ams)
    }

    /// Parse a request frame back into header and request.
    ///
    /// # Errors
    ///
    /// Returns error if the frame is undersized, the command is unknown, or
    /// the header length field disagrees with the payload.
    pub fn parse(bytes: &[u8], layout: FrameLayout) -> Result<(AmsHeader, Self), FrameError> {
        let header_at = layout.header_offset();
        let payload_at = layout.payload_offset();
        if bytes.len() < payload_at {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                min: payload_at,
            });
        }
        let header = AmsHeader::parse(&bytes[header_at..])?;
        let payload = &bytes[payload_at..];
        if header.length as usize != payload.len() {
            return Err(FrameError::LengthMismatch {
                declared: header.length as usize,
                actual: payload.len(),
            });
        }

        let command =
            Command::from_id(header.command).ok_or(FrameError::UnknownCommand(header.command))?;
        let fixed = match command {
            Command::Read | Command::Write => 12,
            Command::ReadWrite => 16,
        };
        if payload.len() < fixed {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                min: payload_at + fixed,
            });
        }

        let index_group = read_u32(payload, 0);
        let index_offset = read_u32(payload, 4);
        let request = match command {
            Command::Read => Self::Read {
                index_group,
                index_offset,
                length: read_u32(payload, 8),
            },
            Command::Write => Self::Write {
                index_group,
                index_offset,
                data: take(payload, 12, read_u32(payload, 8) as usize)?.to_vec(),
            },
            Command::ReadWrite => Self::ReadWrite {
                index_group,
                index_offset,
                read_length: read_u32(payload, 8),
                data: take(payload, 16, read_u32(payload, 12) as usize)?.to_vec(),
            },
        };

        Ok((header, request))
    }
}

/// A parsed ADS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdsResponse {
    /// AMS header of the response
    pub header: AmsHeader,
    /// ADS result code (0 = success)
    pub result: u32,
    /// Returned data
    pub data: Vec<u8>,
}

impl AdsResponse {
    /// Smallest frame that can hold a header plus `result + length`.
    #[must_use]
    pub fn min_len(layout: FrameLayout) -> usize {
        layout.payload_offset() + 8
    }

    /// Parse a response frame.
    ///
    /// A Write response may omit the length field; every other command must
    /// carry `result(4) + length(4)`.
    ///
    /// # Errors
    ///
    /// Returns error if the frame is shorter than header plus result prefix,
    /// or the declared data length runs past the end of the frame.
    pub fn parse(bytes: &[u8], layout: FrameLayout) -> Result<Self, FrameError> {
        let payload_at = layout.payload_offset();
        let min = payload_at + 4;
        if bytes.len() < min {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                min: Self::min_len(layout),
            });
        }
        let header = AmsHeader::parse(&bytes[layout.header_offset()..])?;
        let result = read_u32(bytes, payload_at);

        if header.command == Command::Write.id() && bytes.len() < payload_at + 8 {
            return Ok(Self {
                header,
                result,
                data: Vec::new(),
            });
        }
        if bytes.len() < Self::min_len(layout) {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                min: Self::min_len(layout),
            });
        }

        let length = read_u32(bytes, payload_at + 4) as usize;
        let data = take(bytes, payload_at + 8, length)?.to_vec();

        Ok(Self {
            header,
            result,
            data,
        })
    }

    /// Invocation id of the response.
    #[must_use]
    pub fn invoke_id(&self) -> u32 {
        self.header.invoke_id
    }

    /// Encode a response frame answering `request_header`.
    ///
    /// Used by simulators and tests standing in for a device.
    #[must_use]
    pub fn encode_reply(
        request_header: &AmsHeader,
        result: u32,
        data: &[u8],
        layout: FrameLayout,
    ) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8 + data.len());
        payload.extend_from_slice(&result.to_le_bytes());
        payload.extend_from_slice(&len_u32(data.len()).to_le_bytes());
        payload.extend_from_slice(data);

        let header = AmsHeader {
            target: request_header.source,
            source: request_header.target,
            command: request_header.command,
            state_flags: STATE_RESPONSE,
            length: len_u32(payload.len()),
            error_code: 0,
            invoke_id: request_header.invoke_id,
        };

        let mut ams = Vec::with_capacity(AMS_HEADER_LEN + payload.len());
        header.write_to(&mut ams);
        ams.extend_from_slice(&payload);
        layout.wrap(ams)
    }
}

/// Append a terminating null to `name`.
#[must_use]
pub fn null_terminated(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 1);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out
}

/// Little-endian `u16` at `at`. Caller guarantees bounds.
#[must_use]
pub fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

/// Little-endian `u32` at `at`. Caller guarantees bounds.
#[must_use]
pub fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn take(bytes: &[u8], at: usize, len: usize) -> Result<&[u8], FrameError> {
    at.checked_add(len)
        .and_then(|end| bytes.get(at..end))
        .ok_or(FrameError::Truncated {
            declared: len,
            available: bytes.len().saturating_sub(at),
        })
}

#[allow(clippy::cast_possible_truncation)]
fn len_u32(len: usize) -> u32 {
    len as u32
}

/// Errors raised by the frame codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Frame shorter than the fixed prefix
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort {
        /// Bytes received
        len: usize,
        /// Bytes required
        min: usize,
    },
    /// Declared data length runs past the end of the frame
    #[error("declared length {declared} exceeds the {available} bytes available")]
    Truncated {
        /// Declared byte count
        declared: usize,
        /// Bytes actually present
        available: usize,
    },
    /// Header length field disagrees with the payload
    #[error("header declares {declared} payload bytes, frame carries {actual}")]
    LengthMismatch {
        /// Header length field
        declared: usize,
        /// Actual payload size
        actual: usize,
    },
    /// Command id this codec does not handle
    #[error("unknown command id {0:#06x}")]
    UnknownCommand(u16),
    /// Unrecognised frame layout name
    #[error("unknown frame layout '{0}' (expected 'plain' or 'legacy')")]
    UnknownLayout(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "Read",
            Self::Write => "Write",
            Self::ReadWrite => "ReadWrite",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netid::AmsNetId;

    fn target() -> AmsAddr {
        AmsAddr::new(AmsNetId::new(5, 80, 201, 232, 1, 1), 851)
    }

    fn source() -> AmsAddr {
        AmsAddr::new(AmsNetId::new(10, 0, 0, 7, 1, 1), 32905)
    }

    #[test]
    fn read_request_layout() {
        let request = AdsRequest::Read {
            index_group: 0xF00C,
            index_offset: 0,
            length: 24,
        };
        let frame = request.encode(target(), source(), 7, FrameLayout::Plain);

        assert_eq!(frame.len(), 44);
        assert_eq!(&frame[0..6], &[5, 80, 201, 232, 1, 1]);
        assert_eq!(read_u16(&frame, 6), 851);
        assert_eq!(read_u16(&frame, 14), 32905);
        assert_eq!(read_u16(&frame, 16), 0x0002);
        assert_eq!(read_u16(&frame, 18), STATE_REQUEST);
        assert_eq!(read_u32(&frame, 20), 12);
        assert_eq!(read_u32(&frame, 28), 7);
        assert_eq!(read_u32(&frame, 32), 0xF00C);
        assert_eq!(read_u32(&frame, 40), 24);
    }

    #[test]
    fn read_request_parses_back() {
        for (group, offset, length) in [(0x4020, 0, 1), (0xF00B, 0, 65_536), (u32::MAX, 17, 0)] {
            let request = AdsRequest::Read {
                index_group: group,
                index_offset: offset,
                length,
            };
            for layout in [FrameLayout::Plain, FrameLayout::Legacy] {
                let frame = request.encode(target(), source(), 99, layout);
                let (header, parsed) = AdsRequest::parse(&frame, layout).unwrap();
                assert_eq!(parsed, request);
                assert_eq!(header.invoke_id, 99);
                assert_eq!(header.length as usize, frame.len() - layout.payload_offset());
            }
        }
    }

    #[test]
    fn value_by_name_carries_terminated_name() {
        let request = AdsRequest::value_by_name("MAIN.bStart", 1);
        let frame = request.encode(target(), source(), 1, FrameLayout::Plain);

        assert_eq!(read_u16(&frame, 16), 0x0009);
        assert_eq!(read_u32(&frame, 32), SYM_VALBYNAME);
        assert_eq!(read_u32(&frame, 40), 1);
        assert_eq!(read_u32(&frame, 44), 12);
        assert_eq!(&frame[48..], b"MAIN.bStart\0");
    }

    #[test]
    fn legacy_prefix_carries_ams_length() {
        let request = AdsRequest::Write {
            index_group: 0x4020,
            index_offset: 4,
            data: vec![1, 2],
        };
        let frame = request.encode(target(), source(), 3, FrameLayout::Legacy);

        assert_eq!(read_u16(&frame, 0), 0);
        assert_eq!(read_u32(&frame, 2) as usize, frame.len() - LEGACY_PREFIX_LEN);
        assert_eq!(read_u32(&frame, FrameLayout::Legacy.invoke_id_offset()), 3);
    }

    #[test]
    fn response_parse() {
        let request = AdsRequest::Read {
            index_group: 0xF008,
            index_offset: 0,
            length: 4,
        };
        let frame = request.encode(target(), source(), 42, FrameLayout::Plain);
        let (header, _) = AdsRequest::parse(&frame, FrameLayout::Plain).unwrap();

        for layout in [FrameLayout::Plain, FrameLayout::Legacy] {
            let reply = AdsResponse::encode_reply(&header, 0, &[9, 0, 0, 0], layout);
            let parsed = AdsResponse::parse(&reply, layout).unwrap();
            assert_eq!(parsed.invoke_id(), 42);
            assert_eq!(parsed.result, 0);
            assert_eq!(parsed.data, vec![9, 0, 0, 0]);
            assert_eq!(parsed.header.target, source());
        }
    }

    #[test]
    fn undersized_response_is_framing_error() {
        let err = AdsResponse::parse(&[0u8; 20], FrameLayout::Plain).unwrap_err();
        assert_eq!(err, FrameError::TooShort { len: 20, min: 40 });

        let err = AdsResponse::parse(&[0u8; 42], FrameLayout::Legacy).unwrap_err();
        assert!(matches!(err, FrameError::TooShort { min: 46, .. }));
    }

    #[test]
    fn declared_length_past_end_is_framing_error() {
        let request = AdsRequest::Read {
            index_group: 1,
            index_offset: 2,
            length: 8,
        };
        let frame = request.encode(target(), source(), 5, FrameLayout::Plain);
        let (header, _) = AdsRequest::parse(&frame, FrameLayout::Plain).unwrap();

        let mut reply = AdsResponse::encode_reply(&header, 0, &[1, 2, 3, 4], FrameLayout::Plain);
        reply.truncate(reply.len() - 1);

        let err = AdsResponse::parse(&reply, FrameLayout::Plain).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                declared: 4,
                available: 3
            }
        );
    }

    #[test]
    fn layout_names() {
        assert_eq!("plain".parse::<FrameLayout>().unwrap(), FrameLayout::Plain);
        assert_eq!("LEGACY".parse::<FrameLayout>().unwrap(), FrameLayout::Legacy);
        assert!("nope".parse::<FrameLayout>().is_err());
    }
}
