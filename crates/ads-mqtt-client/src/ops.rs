//! Single-variable reads and writes.

use crate::client::AdsClient;
use crate::correlation::{Reply, ResponseShape};
use crate::error::AdsError;
use crate::transport::Transport;
use ads_mqtt_proto::index::SYM_VERSION;
use ads_mqtt_proto::types::{byte_width, decode_value, encode_value};
use ads_mqtt_proto::{AdsRequest, AdsValue};

/// Explicit location of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolAddress {
    /// Index group
    pub index_group: u32,
    /// Index offset
    pub index_offset: u32,
    /// Size in bytes
    pub size: u32,
    /// Declared type name, if known
    pub type_name: Option<String>,
}

/// A variable given by cached name or by explicit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolQuery {
    /// Look the address up in the symbol cache
    Name(String),
    /// Use the address as given
    Address(SymbolAddress),
}

impl From<&str> for SymbolQuery {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for SymbolQuery {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<SymbolAddress> for SymbolQuery {
    fn from(address: SymbolAddress) -> Self {
        Self::Address(address)
    }
}

/// Value read from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    /// Bytes as returned
    pub raw: Vec<u8>,
    /// Decoded by declared type, or raw bytes if the type is unknown
    pub value: AdsValue,
}

impl ReadOutcome {
    fn decode(type_name: Option<&str>, raw: Vec<u8>) -> Result<Self, AdsError> {
        let value = decode_value(type_name, &raw)?;
        Ok(Self { raw, value })
    }
}

impl<T: Transport> AdsClient<T> {
    /// Read a variable by name with a value-by-name request.
    ///
    /// The read length is `read_length` if given, else the width of
    /// `type_name`, else the size of the cached symbol.
    ///
    /// # Errors
    ///
    /// Returns `MissingAddress` if no read length can be derived, or any
    /// request error.
    pub async fn read_value_by_name(
        &self,
        name: &str,
        type_name: Option<&str>,
        read_length: Option<u32>,
    ) -> Result<ReadOutcome, AdsError> {
        let cached = self.cache().symbol(&self.device_key(), name);
        let type_name = type_name
            .map(str::to_string)
            .or_else(|| cached.as_ref().map(|s| s.type_name.clone()));

        let length = read_length
            .or_else(|| {
                type_name
                    .as_deref()
                    .and_then(|ty| byte_width(ty, self.config().string_width))
                    .and_then(|width| u32::try_from(width).ok())
            })
            .or_else(|| cached.as_ref().map(|s| s.size))
            .ok_or_else(|| {
                AdsError::MissingAddress(format!("no read length or known type for {name}"))
            })?;

        let request = AdsRequest::value_by_name(name, length);
        let Reply::Data(raw) = self.request(request, ResponseShape::Data).await? else {
            return Err(AdsError::Malformed("expected value data".to_string()));
        };
        ReadOutcome::decode(type_name.as_deref(), raw)
    }

    /// Resolve a query to an address, loading the table if none is cached.
    ///
    /// # Errors
    ///
    /// Returns `SymbolNotFound` if the name is not in the table.
    pub async fn resolve(&self, query: SymbolQuery) -> Result<SymbolAddress, AdsError> {
        match query {
            SymbolQuery::Address(address) => Ok(address),
            SymbolQuery::Name(name) => {
                let table = self.symbol_table().await?;
                let symbol = table
                    .get(&name)
                    .ok_or_else(|| AdsError::SymbolNotFound(name.clone()))?;
                Ok(SymbolAddress {
                    index_group: symbol.index_group,
                    index_offset: symbol.index_offset,
                    size: symbol.size,
                    type_name: Some(symbol.type_name.clone()),
                })
            }
        }
    }

    /// Read a variable by cached name or explicit address.
    ///
    /// # Errors
    ///
    /// Returns `SymbolNotFound` for an unknown name, the device error for a
    /// nonzero result, or any request error.
    pub async fn read_symbol(
        &self,
        query: impl Into<SymbolQuery>,
    ) -> Result<ReadOutcome, AdsError> {
        let address = self.resolve(query.into()).await?;
        let raw = self
            .read(address.index_group, address.index_offset, address.size)
            .await?;
        ReadOutcome::decode(address.type_name.as_deref(), raw)
    }

    /// Write a variable by cached name or explicit address.
    ///
    /// The value is packed into the symbol's declared width before anything
    /// is sent.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPayload` if the value does not fit,
    /// `SymbolNotFound` for an unknown name, or any request error.
    pub async fn write_symbol(
        &self,
        query: impl Into<SymbolQuery>,
        value: &AdsValue,
    ) -> Result<(), AdsError> {
        let address = self.resolve(query.into()).await?;
        let data = encode_value(
            address.type_name.as_deref(),
            Some(address.size as usize),
            value,
        )?;
        self.write(address.index_group, address.index_offset, data)
            .await
    }

    /// Read the device's symbol version counter.
    ///
    /// # Errors
    ///
    /// Returns error if the read fails or carries no data.
    pub async fn read_symbol_version(&self) -> Result<u32, AdsError> {
        let request = AdsRequest::Read {
            index_group: SYM_VERSION,
            index_offset: 0,
            length: 4,
        };
        match self.request(request, ResponseShape::SymbolVersion).await? {
            Reply::SymbolVersion(version) => Ok(version),
            other => Err(AdsError::Malformed(format!(
                "expected symbol version, got {other:?}"
            ))),
        }
    }
}
