//! # ADS-over-MQTT Protocol
//!
//! Wire definitions for tunnelling Beckhoff ADS requests through an MQTT broker.
//!
//! ## Contents
//!
//! - [`AmsNetId`] / [`AmsAddr`]: dotted network addresses and their 6-byte form
//! - [`frame`]: the 32-byte AMS header plus Read, Write and ReadWrite payloads
//! - [`index`]: well-known index groups and ADS return codes
//! - [`types`]: typed values packed and unpacked by declared PLC type name
//! - [`topics`]: the MQTT topic scheme and the liveness info payload
//!
//! ## MQTT Topics
//!
//! - requests: `{namespace}/{targetNetId}/ams`
//! - responses: `{namespace}/{localNetId}/ams/res`
//! - liveness: `{namespace}/{netId}/info`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod frame;
pub mod index;
pub mod netid;
pub mod topics;
pub mod types;

pub use frame::{
    AdsRequest, AdsResponse, AmsHeader, Command, FrameError, FrameLayout, AMS_HEADER_LEN,
};
pub use netid::{AmsAddr, AmsNetId, NetIdError};
pub use topics::{parse_online_flag, InfoPayload, TopicKind, TopicScheme};
pub use types::{AdsType, AdsValue, ValueError};
