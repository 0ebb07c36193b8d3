//! Batched reads through ADS sum commands.
//!
//! Two round trips poll a filtered group of cached symbols:
//!
//! 1. One `SUMUP_READWRITE` frame acquires a handle per symbol by name.
//!    Symbols whose handle request fails are dropped from the batch.
//! 2. One `SUMUP_READ` frame reads every handle at its declared size. The
//!    device answers with one result code per handle followed by the values
//!    back to back.
//!
//! Granted handles are held by the client and reused by later batches, so
//! the handle round only runs for symbols not seen before. A version-changed
//! code anywhere in round 2 means the handles are stale: they are forgotten
//! and the read surfaces as [`AdsError::SymbolVersionChanged`].

use crate::cache::SymbolDescriptor;
use crate::client::AdsClient;
use crate::correlation::{Reply, ResponseShape};
use crate::error::AdsError;
use crate::transport::Transport;
use ads_mqtt_proto::frame::read_u32;
use ads_mqtt_proto::index::{
    codes, SUMUP_READ, SUMUP_READWRITE, SUMUP_WRITE, SYM_HNDBYNAME, SYM_RELEASEHND, SYM_VALBYHND,
};
use ads_mqtt_proto::types::decode_value;
use ads_mqtt_proto::{AdsRequest, AdsValue};
use std::fmt;

/// Size of one sub-request entry in a sum frame.
const SUM_ENTRY_LEN: usize = 16;

/// Name-prefix filter selecting symbols for a batched read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolGroups {
    prefixes: Vec<String>,
}

impl SymbolGroups {
    /// Parse a `;` or `,` separated prefix list.
    ///
    /// Entries are trimmed; empty entries and duplicates are dropped.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut prefixes: Vec<String> = Vec::new();
        for part in input.split([';', ',']) {
            let part = part.trim();
            if !part.is_empty() && !prefixes.iter().any(|p| p == part) {
                prefixes.push(part.to_string());
            }
        }
        Self { prefixes }
    }

    /// Filter groups from individual prefixes.
    #[must_use]
    pub fn from_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined: Vec<String> = prefixes.into_iter().map(|p| p.as_ref().to_string()).collect();
        Self::parse(&joined.join(";"))
    }

    /// Whether `name` lies under one of the prefixes (`P.` + anything).
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            name.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// Configured prefixes.
    #[must_use]
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Whether no prefix is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

impl fmt::Display for SymbolGroups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixes.join(";"))
    }
}

/// Outcome of acquiring one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Handle granted
    Handle(u32),
    /// Device refused with this code
    Failed(u32),
}

/// Parse a handle-acquisition response for `count` symbols.
///
/// The body starts with `count` result codes. The handle area after it holds
/// either one 4-byte slot per requested symbol or, when shorter, handles for
/// the successful symbols only, in request order.
///
/// # Errors
///
/// Returns `Malformed` if the body cannot hold the codes and handles.
pub fn parse_handle_table(data: &[u8], count: usize) -> Result<Vec<HandleOutcome>, AdsError> {
    let codes_len = count * 4;
    if data.len() < codes_len {
        return Err(AdsError::Malformed(format!(
            "handle table of {} bytes cannot hold {count} result codes",
            data.len()
        )));
    }
    let results: Vec<u32> = (0..count).map(|i| read_u32(data, i * 4)).collect();
    let handles = &data[codes_len..];
    let granted = results.iter().filter(|&&code| code == codes::NOERR).count();

    let per_slot = handles.len() >= codes_len;
    if !per_slot && handles.len() < granted * 4 {
        return Err(AdsError::Malformed(format!(
            "handle area of {} bytes cannot hold {granted} handles",
            handles.len()
        )));
    }

    let mut packed = 0;
    Ok(results
        .iter()
        .enumerate()
        .map(|(slot, &code)| {
            if code != codes::NOERR {
                return HandleOutcome::Failed(code);
            }
            let at = if per_slot {
                slot
            } else {
                packed += 1;
                packed - 1
            };
            HandleOutcome::Handle(read_u32(handles, at * 4))
        })
        .collect())
}

/// One symbol of a batched read.
#[derive(Debug, Clone, PartialEq)]
pub struct SumEntry<'a> {
    /// Symbol read
    pub symbol: &'a SymbolDescriptor,
    /// Per-symbol result code
    pub code: u32,
    /// Value bytes, `None` if the response ends early
    pub bytes: Option<&'a [u8]>,
}

impl SumEntry<'_> {
    /// Decode the value by the symbol's declared type.
    ///
    /// # Errors
    ///
    /// Returns the device error for a nonzero code, `Malformed` if the value
    /// is missing, or `UnsupportedPayload` if the bytes do not decode.
    pub fn value(&self) -> Result<AdsValue, AdsError> {
        if self.code != codes::NOERR {
            return Err(AdsError::Device { code: self.code });
        }
        let bytes = self.bytes.ok_or_else(|| {
            AdsError::Malformed(format!("sum read ends before {}", self.symbol.name))
        })?;
        Ok(decode_value(Some(self.symbol.type_name.as_str()), bytes)?)
    }
}

/// Result of a batched read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SumReadResult {
    symbols: Vec<SymbolDescriptor>,
    codes: Vec<u32>,
    raw: Vec<u8>,
}

impl SumReadResult {
    /// Symbols that took part in round 2, in read order.
    #[must_use]
    pub fn symbols(&self) -> &[SymbolDescriptor] {
        &self.symbols
    }

    /// Per-symbol result codes.
    #[must_use]
    pub fn codes(&self) -> &[u32] {
        &self.codes
    }

    /// Returned data as received: result codes followed by values.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Per-symbol view over the returned data.
    #[must_use]
    pub fn entries(&self) -> Vec<SumEntry<'_>> {
        let mut at = self.codes.len() * 4;
        self.symbols
            .iter()
            .zip(&self.codes)
            .map(|(symbol, &code)| {
                let end = at + symbol.size as usize;
                let bytes = self.raw.get(at..end);
                at = end;
                SumEntry {
                    symbol,
                    code,
                    bytes,
                }
            })
            .collect()
    }

    /// Decoded values by symbol name.
    ///
    /// Per-symbol failures are logged and returned in place of the value.
    #[must_use]
    pub fn values(&self) -> Vec<(String, Result<AdsValue, AdsError>)> {
        self.entries()
            .into_iter()
            .map(|entry| {
                let value = entry.value();
                if let Err(e) = &value {
                    tracing::warn!(symbol = %entry.symbol.name, error = %e, "Sum read entry failed");
                }
                (entry.symbol.name.clone(), value)
            })
            .collect()
    }
}

fn handle_request(symbols: &[&SymbolDescriptor]) -> AdsRequest {
    let names_len: usize = symbols.iter().map(|s| s.name.len() + 1).sum();
    let mut data = Vec::with_capacity(symbols.len() * SUM_ENTRY_LEN + names_len);
    for symbol in symbols {
        data.extend_from_slice(&SYM_HNDBYNAME.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&u32_len(symbol.name.len() + 1).to_le_bytes());
    }
    for symbol in symbols {
        data.extend_from_slice(symbol.name.as_bytes());
        data.push(0);
    }

    AdsRequest::ReadWrite {
        index_group: SUMUP_READWRITE,
        index_offset: u32_len(symbols.len()),
        read_length: u32_len(symbols.len() * 8),
        data,
    }
}

fn value_request(batch: &[(SymbolDescriptor, u32)]) -> AdsRequest {
    let mut data = Vec::with_capacity(batch.len() * SUM_ENTRY_LEN);
    let mut read_length = batch.len() * 4;
    for (symbol, handle) in batch {
        data.extend_from_slice(&SYM_VALBYHND.to_le_bytes());
        data.extend_from_slice(&handle.to_le_bytes());
        data.extend_from_slice(&symbol.size.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        read_length += symbol.size as usize;
    }

    AdsRequest::ReadWrite {
        index_group: SUMUP_READ,
        index_offset: u32_len(batch.len()),
        read_length: u32_len(read_length),
        data,
    }
}

/// Sum write body releasing `handles`: one 12-byte entry per handle, then the handles.
fn release_request_data(handles: &[u32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(handles.len() * 16);
    for _ in handles {
        data.extend_from_slice(&SYM_RELEASEHND.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&4u32.to_le_bytes());
    }
    for handle in handles {
        data.extend_from_slice(&handle.to_le_bytes());
    }
    data
}

#[allow(clippy::cast_possible_truncation)]
fn u32_len(len: usize) -> u32 {
    len as u32
}

impl<T: Transport> AdsClient<T> {
    /// Read every cached symbol under `groups` in up to two sum round trips.
    ///
    /// Handles are kept between calls, so the handle round only asks for
    /// symbols not read before. Loads the symbol table first if none is
    /// cached. Returns `Ok(None)` when no symbol has a handle, so nothing
    /// was read.
    ///
    /// # Errors
    ///
    /// Returns `NoMatchingSymbols` if no cached symbol matches,
    /// `SymbolVersionChanged` if the device reports stale handles (every held
    /// handle is forgotten), or any request error.
    pub async fn sum_read(&self, groups: &SymbolGroups) -> Result<Option<SumReadResult>, AdsError> {
        let table = self.symbol_table().await?;
        let selected: Vec<&SymbolDescriptor> =
            table.iter().filter(|s| groups.matches(&s.name)).collect();
        if selected.is_empty() {
            return Err(AdsError::NoMatchingSymbols(groups.to_string()));
        }

        let missing: Vec<&SymbolDescriptor> = selected
            .iter()
            .copied()
            .filter(|s| !self.handles().contains_key(&s.name))
            .collect();
        if !missing.is_empty() {
            self.acquire_handles(&missing).await?;
        }

        let batch: Vec<(SymbolDescriptor, u32)> = selected
            .iter()
            .filter_map(|symbol| {
                let handle = *self.handles().get(&symbol.name)?;
                Some(((*symbol).clone(), handle))
            })
            .collect();
        if batch.is_empty() {
            tracing::warn!(groups = %groups, "No handles acquired, skipping sum read");
            return Ok(None);
        }

        let request = value_request(&batch);
        let reply = self
            .request(request, ResponseShape::SumRead { count: batch.len() })
            .await;
        let (results, raw) = match reply {
            Ok(Reply::SumRead { codes, raw }) => (codes, raw),
            Ok(_) => return Err(AdsError::Malformed("expected a sum read body".to_string())),
            Err(e @ AdsError::SymbolVersionChanged { .. }) => {
                self.forget_handles();
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        for ((symbol, _), &code) in batch.iter().zip(&results) {
            if code == codes::INVALID_HANDLE {
                self.handles().remove(&symbol.name);
            }
        }

        tracing::debug!(symbols = batch.len(), bytes = raw.len(), "Sum read complete");
        Ok(Some(SumReadResult {
            symbols: batch.into_iter().map(|(symbol, _)| symbol).collect(),
            codes: results,
            raw,
        }))
    }

    /// Acquire handles for `symbols` in one round trip and hold the granted ones.
    async fn acquire_handles(&self, symbols: &[&SymbolDescriptor]) -> Result<(), AdsError> {
        let request = handle_request(symbols);
        let Reply::Handles(outcomes) = self
            .request(request, ResponseShape::HandleTable {
                count: symbols.len(),
            })
            .await?
        else {
            return Err(AdsError::Malformed("expected a handle table".to_string()));
        };

        for (symbol, outcome) in symbols.iter().zip(outcomes) {
            match outcome {
                HandleOutcome::Handle(handle) => {
                    self.handles().insert(symbol.name.clone(), handle);
                }
                HandleOutcome::Failed(code) => {
                    tracing::warn!(
                        symbol = %symbol.name,
                        code = format_args!("{code:#06x}"),
                        "Handle request failed, dropping symbol from batch"
                    );
                }
            }
        }
        Ok(())
    }

    /// Release every held handle on the device with one sum write.
    ///
    /// Handles are forgotten locally even if the device refuses some of them.
    /// Returns the number of handles sent for release.
    ///
    /// # Errors
    ///
    /// Returns any request error.
    pub async fn release_handles(&self) -> Result<usize, AdsError> {
        let handles = self.take_handles();
        if handles.is_empty() {
            return Ok(0);
        }

        let data = self
            .read_write(
                SUMUP_WRITE,
                u32_len(handles.len()),
                u32_len(handles.len() * 4),
                release_request_data(&handles),
            )
            .await?;
        let refused = (0..handles.len())
            .filter(|i| data.len() >= (i + 1) * 4 && read_u32(&data, i * 4) != codes::NOERR)
            .count();
        if refused > 0 {
            tracing::debug!(refused, released = handles.len(), "Device refused some handle releases");
        }
        Ok(handles.len())
    }

    /// Drop every held handle without telling the device.
    pub(crate) fn forget_handles(&self) {
        let dropped = self.take_handles().len();
        if dropped > 0 {
            tracing::debug!(dropped, "Forgot stale handles");
        }
    }

    fn take_handles(&self) -> Vec<u32> {
        let names: Vec<String> = self.handles().iter().map(|e| e.key().clone()).collect();
        names
            .iter()
            .filter_map(|name| self.handles().remove(name))
            .map(|(_, handle)| handle)
            .collect()
    }
}
