//! Symbol table discovery.
//!
//! Discovery is two sequential reads: the 24-byte upload-info block (symbol
//! count at offset 0, table size at offset 4), then the table itself. Each
//! table entry is laid out as
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | entry length |
//! | 4 | 4 | index group |
//! | 8 | 4 | index offset |
//! | 12 | 4 | size |
//! | 16 | 4 | data type |
//! | 20 | 4 | flags |
//! | 24 | 2 | name length |
//! | 26 | 2 | type length |
//! | 28 | 2 | comment length |
//! | 30 | .. | name, type, comment (each null terminated) |

use crate::cache::{SymbolDescriptor, SymbolTable};
use crate::client::AdsClient;
use crate::error::AdsError;
use crate::transport::Transport;
use ads_mqtt_proto::frame::{read_u16, read_u32};
use ads_mqtt_proto::index::{SYM_UPLOAD, SYM_UPLOADINFO, UPLOAD_INFO_LEN};
use std::sync::Arc;

/// Fixed prefix of a symbol table entry.
const ENTRY_PREFIX_LEN: usize = 30;

/// Symbol count and table size reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadInfo {
    /// Number of symbols
    pub count: u32,
    /// Table size in bytes
    pub size: u32,
}

impl UploadInfo {
    /// Parse an upload-info block.
    ///
    /// # Errors
    ///
    /// Returns `UploadInfo` if fewer than 8 bytes are present, or
    /// `EmptySymbolTable` if the table size is zero.
    pub fn parse(data: &[u8]) -> Result<Self, AdsError> {
        if data.len() < 8 {
            return Err(AdsError::UploadInfo(format!(
                "{} bytes, need at least 8",
                data.len()
            )));
        }
        let info = Self {
            count: read_u32(data, 0),
            size: read_u32(data, 4),
        };
        if info.size == 0 {
            return Err(AdsError::EmptySymbolTable);
        }
        Ok(info)
    }
}

/// Parse an uploaded symbol table.
///
/// Advances by each entry's declared length, so unknown trailing fields are
/// skipped. Stops at the first entry whose length is below the fixed prefix
/// or would run past the end, returning what was parsed so far.
#[must_use]
pub fn parse_symbol_table(data: &[u8]) -> Vec<SymbolDescriptor> {
    let mut symbols = Vec::new();
    let mut offset = 0;

    while offset + 4 <= data.len() {
        let entry_len = read_u32(data, offset) as usize;
        if entry_len < ENTRY_PREFIX_LEN || entry_len > data.len() - offset {
            if offset < data.len() {
                tracing::debug!(offset, entry_len, "Stopping symbol table parse");
            }
            break;
        }
        symbols.push(parse_entry(&data[offset..offset + entry_len]));
        offset += entry_len;
    }

    symbols
}

fn parse_entry(entry: &[u8]) -> SymbolDescriptor {
    let name_len = usize::from(read_u16(entry, 24));
    let type_len = usize::from(read_u16(entry, 26));
    let comment_len = usize::from(read_u16(entry, 28));

    let mut cursor = ENTRY_PREFIX_LEN;
    let name = text_field(entry, &mut cursor, name_len);
    skip_delimiter(entry, &mut cursor);
    let type_name = text_field(entry, &mut cursor, type_len);
    skip_delimiter(entry, &mut cursor);
    let comment = text_field(entry, &mut cursor, comment_len);

    SymbolDescriptor {
        name,
        index_group: read_u32(entry, 4),
        index_offset: read_u32(entry, 8),
        size: read_u32(entry, 12),
        type_name,
        comment,
        data_type: read_u32(entry, 16),
        flags: read_u32(entry, 20),
    }
}

fn skip_delimiter(entry: &[u8], cursor: &mut usize) {
    if entry.get(*cursor) == Some(&0) {
        *cursor += 1;
    }
}

/// Read `len` bytes of text, clamped to the entry, without trailing nulls.
fn text_field(entry: &[u8], cursor: &mut usize, len: usize) -> String {
    let start = (*cursor).min(entry.len());
    let end = (start + len).min(entry.len());
    *cursor = end;
    let mut text = &entry[start..end];
    while let [rest @ .., 0] = text {
        text = rest;
    }
    String::from_utf8_lossy(text).into_owned()
}

impl<T: Transport> AdsClient<T> {
    /// Discover the target's symbol table and replace its cache entry.
    ///
    /// # Errors
    ///
    /// Returns error if upload info is unusable, the device rejects either
    /// read, the table comes back truncated, or a request times out.
    pub async fn load_symbols(&self) -> Result<Arc<SymbolTable>, AdsError> {
        let info = UploadInfo::parse(&self.read(SYM_UPLOADINFO, 0, UPLOAD_INFO_LEN).await?)?;
        tracing::debug!(count = info.count, size = info.size, "Symbol upload info");

        let data = self.read(SYM_UPLOAD, 0, info.size).await?;
        if data.len() < info.size as usize {
            return Err(AdsError::Malformed(format!(
                "symbol table truncated: {} of {} bytes",
                data.len(),
                info.size
            )));
        }

        let symbols = parse_symbol_table(&data);
        if symbols.len() != info.count as usize {
            tracing::warn!(
                parsed = symbols.len(),
                reported = info.count,
                "Symbol count differs from upload info"
            );
        }

        let device = self.device_key();
        tracing::info!(
            target_addr = %device.target,
            namespace = %device.namespace,
            symbols = symbols.len(),
            bytes = info.size,
            "Symbol table loaded"
        );
        let table = SymbolTable::new(symbols).with_upload_info(info.count, info.size);
        // handles from before the reload may point at moved symbols
        self.forget_handles();
        Ok(self.cache().replace(device, table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor, harness, symbol_entry, upload_info};
    use ads_mqtt_proto::AdsRequest;

    fn sample() -> Vec<SymbolDescriptor> {
        let mut with_comment = descriptor("MAIN.nCount", 4, 2, "INT");
        with_comment.comment = "cycle counter".to_string();
        with_comment.data_type = 2;
        with_comment.flags = 8;
        vec![
            descriptor("MAIN.bStart", 0, 1, "BOOL"),
            with_comment,
            descriptor("GVL.sName", 8, 81, "STRING(80)"),
        ]
    }

    fn table_bytes(symbols: &[SymbolDescriptor]) -> Vec<u8> {
        symbols.iter().flat_map(symbol_entry).collect()
    }

    #[test]
    fn parses_every_entry() {
        let symbols = sample();
        let data = table_bytes(&symbols);

        let parsed = parse_symbol_table(&data);
        assert_eq!(parsed, symbols);

        let advanced: usize = parsed.iter().map(|s| symbol_entry(s).len()).sum();
        assert_eq!(advanced, data.len());
        for symbol in &parsed {
            assert!(!symbol.name.ends_with('\0'));
            assert!(!symbol.type_name.ends_with('\0'));
            assert!(!symbol.comment.ends_with('\0'));
        }
    }

    #[test]
    fn advances_by_declared_length() {
        let symbols = sample();
        let mut data = Vec::new();
        for symbol in &symbols {
            let mut entry = symbol_entry(symbol);
            // unknown trailing sub-fields
            entry.extend_from_slice(&[0xAA; 6]);
            let len = u32::try_from(entry.len()).unwrap();
            entry[0..4].copy_from_slice(&len.to_le_bytes());
            data.extend_from_slice(&entry);
        }

        assert_eq!(parse_symbol_table(&data), symbols);
    }

    #[test]
    fn stops_at_overrunning_entry() {
        let symbols = sample();
        let mut data = table_bytes(&symbols);
        data.truncate(data.len() - 3);

        let parsed = parse_symbol_table(&data);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].name, "MAIN.nCount");

        let mut short = table_bytes(&symbols[..1]);
        short.extend_from_slice(&12u32.to_le_bytes());
        short.extend_from_slice(&[0; 8]);
        assert_eq!(parse_symbol_table(&short).len(), 1);
    }

    #[test]
    fn trims_trailing_nulls() {
        let mut symbol = descriptor("MAIN.x", 0, 4, "DINT");
        symbol.name = "MAIN.x\0\0".to_string();
        let parsed = parse_symbol_table(&symbol_entry(&symbol));
        assert_eq!(parsed[0].name, "MAIN.x");
        assert_eq!(parsed[0].type_name, "DINT");
    }

    #[test]
    fn upload_info_validation() {
        assert_eq!(
            UploadInfo::parse(&upload_info(3, 200)).unwrap(),
            UploadInfo {
                count: 3,
                size: 200
            }
        );
        assert!(matches!(
            UploadInfo::parse(&[1, 0, 0]),
            Err(AdsError::UploadInfo(_))
        ));
        assert!(matches!(
            UploadInfo::parse(&upload_info(0, 0)),
            Err(AdsError::EmptySymbolTable)
        ));
    }

    #[tokio::test]
    async fn load_replaces_cache_entry() {
        let symbols = sample();
        let table = table_bytes(&symbols);
        let size = u32::try_from(table.len()).unwrap();

        let (client, device) = harness(move |request| match request {
            AdsRequest::Read {
                index_group: SYM_UPLOADINFO,
                length: 24,
                ..
            } => Some((0, upload_info(3, size))),
            AdsRequest::Read {
                index_group: SYM_UPLOAD,
                length,
                ..
            } if *length == size => Some((0, table.clone())),
            _ => None,
        });

        client.handles().insert("MAIN.stale".to_string(), 9);

        let loaded = client.load_symbols().await.unwrap();
        assert_eq!(client.held_handles(), 0);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.reported_count(), 3);
        assert_eq!(loaded.reported_size(), size);
        assert_eq!(device.requests().len(), 2);

        let cached = client.cache().get(&client.device_key()).unwrap();
        assert_eq!(cached.get("GVL.sName").map(|s| s.size), Some(81));
    }

    #[tokio::test]
    async fn empty_table_stops_after_info() {
        let (client, device) = harness(|_| Some((0, upload_info(0, 0))));

        let err = client.load_symbols().await.unwrap_err();
        assert!(matches!(err, AdsError::EmptySymbolTable));
        assert_eq!(device.requests().len(), 1);
        assert!(client.cache().get(&client.device_key()).is_none());
    }

    #[tokio::test]
    async fn truncated_table_fails() {
        let (client, _device) = harness(|request| match request {
            AdsRequest::Read {
                index_group: SYM_UPLOADINFO,
                ..
            } => Some((0, upload_info(1, 100))),
            _ => Some((0, vec![0; 40])),
        });

        let err = client.load_symbols().await.unwrap_err();
        assert!(matches!(err, AdsError::Malformed(_)));
    }

    #[tokio::test]
    async fn upload_error_result_fails() {
        let (client, _device) = harness(|request| match request {
            AdsRequest::Read {
                index_group: SYM_UPLOADINFO,
                ..
            } => Some((0, upload_info(1, 100))),
            _ => Some((0x0701, Vec::new())),
        });

        let err = client.load_symbols().await.unwrap_err();
        assert_eq!(err.device_code(), Some(0x0701));
    }
}
