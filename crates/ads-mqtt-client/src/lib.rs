//! # ADS-over-MQTT Client
//!
//! Engine that talks ADS to a remote PLC through an MQTT broker.
//!
//! ## Architecture
//!
//! - [`AdsClient`]: one connection (namespace, local endpoint, target device);
//!   encodes requests, publishes them and awaits the correlated response
//! - [`CorrelationTable`]: outstanding requests keyed by invocation id
//! - [`SymbolCache`]: discovered symbol tables, one per device
//! - [`AdsClient::load_symbols`]: two-step symbol table discovery
//! - [`AdsClient::sum_read`]: batched reads of a symbol group via sum commands
//! - [`SymbolVersionMonitor`]: symbol version and liveness change detection
//! - [`Transport`]: the pub/sub seam, implemented over `rumqttc` by [`MqttTransport`]
//!
//! Inbound MQTT deliveries are fed to [`AdsClient::handle_message`], which
//! dispatches responses synchronously. Every request is bounded by the
//! configured timeout.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod client;
pub mod config;
pub mod correlation;
pub mod error;
pub mod loader;
pub mod monitor;
pub mod ops;
pub mod sum;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{DeviceKey, SymbolCache, SymbolDescriptor, SymbolTable};
pub use client::{AdsClient, Inbound};
pub use config::AdsConnectionConfig;
pub use correlation::{CorrelationTable, Reply, ResponseShape};
pub use error::AdsError;
pub use loader::{parse_symbol_table, UploadInfo};
pub use monitor::{ChangeEvent, ChangeKind, MonitorState, MonitorStatus, SymbolVersionMonitor};
pub use ops::{ReadOutcome, SymbolAddress, SymbolQuery};
pub use sum::{HandleOutcome, SumEntry, SumReadResult, SymbolGroups};
pub use transport::{MqttSettings, MqttTransport, PublishOptions, Qos, Transport, TransportError};
