//! Symbol table cache.
//!
//! One table per (namespace, target device). A reload swaps the whole
//! `Arc<SymbolTable>` for its key, so a reader holding the previous table keeps
//! a consistent view and never sees a half-written one.

use ads_mqtt_proto::AmsAddr;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Metadata of one device variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDescriptor {
    /// Fully qualified name, e.g. `MAIN.bStart`
    pub name: String,
    /// Index group
    pub index_group: u32,
    /// Index offset
    pub index_offset: u32,
    /// Size in bytes
    pub size: u32,
    /// Declared type name, e.g. `BOOL` or `STRING(80)`
    pub type_name: String,
    /// Comment from the PLC source
    pub comment: String,
    /// Raw ADS data type code
    pub data_type: u32,
    /// Symbol flags
    pub flags: u32,
}

/// Cache key: one device reached through one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    /// Broker namespace
    pub namespace: String,
    /// Device endpoint
    pub target: AmsAddr,
}

/// Parsed symbol table of one device.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<SymbolDescriptor>,
    by_name: HashMap<String, usize>,
    reported_count: u32,
    reported_size: u32,
}

impl SymbolTable {
    /// Build a table from descriptors in upload order.
    ///
    /// Later duplicates of a name shadow earlier ones in lookups.
    #[must_use]
    pub fn new(symbols: Vec<SymbolDescriptor>) -> Self {
        let by_name = symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| (symbol.name.clone(), i))
            .collect();
        Self {
            symbols,
            by_name,
            reported_count: 0,
            reported_size: 0,
        }
    }

    /// Attach the count and byte size the device reported in its upload info.
    #[must_use]
    pub fn with_upload_info(mut self, count: u32, size: u32) -> Self {
        self.reported_count = count;
        self.reported_size = size;
        self
    }

    /// Look up a symbol by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SymbolDescriptor> {
        self.by_name.get(name).map(|&i| &self.symbols[i])
    }

    /// Symbols in upload order.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolDescriptor> {
        self.symbols.iter()
    }

    /// Number of parsed symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether no symbols were parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbol count reported by the device.
    #[must_use]
    pub fn reported_count(&self) -> u32 {
        self.reported_count
    }

    /// Table byte size reported by the device.
    #[must_use]
    pub fn reported_size(&self) -> u32 {
        self.reported_size
    }
}

/// Shared store of symbol tables.
#[derive(Debug, Default)]
pub struct SymbolCache {
    tables: DashMap<DeviceKey, Arc<SymbolTable>>,
}

impl SymbolCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current table for `device`.
    #[must_use]
    pub fn get(&self, device: &DeviceKey) -> Option<Arc<SymbolTable>> {
        self.tables.get(device).map(|entry| Arc::clone(entry.value()))
    }

    /// Replace the table for `device` in one step.
    pub fn replace(&self, device: DeviceKey, table: SymbolTable) -> Arc<SymbolTable> {
        let table = Arc::new(table);
        self.tables.insert(device, Arc::clone(&table));
        table
    }

    /// Drop the table for `device`.
    pub fn remove(&self, device: &DeviceKey) -> Option<Arc<SymbolTable>> {
        self.tables.remove(device).map(|(_, table)| table)
    }

    /// Look up one symbol of `device`.
    #[must_use]
    pub fn symbol(&self, device: &DeviceKey, name: &str) -> Option<SymbolDescriptor> {
        self.get(device)?.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ads_mqtt_proto::AmsNetId;

    fn symbol(name: &str, offset: u32) -> SymbolDescriptor {
        SymbolDescriptor {
            name: name.to_string(),
            index_group: 0x4020,
            index_offset: offset,
            size: 2,
            type_name: "INT".to_string(),
            comment: String::new(),
            data_type: 2,
            flags: 8,
        }
    }

    fn key(port: u16) -> DeviceKey {
        DeviceKey {
            namespace: "ns".to_string(),
            target: AmsAddr::new(AmsNetId::new(5, 80, 201, 232, 1, 1), port),
        }
    }

    #[test]
    fn lookup_by_exact_name() {
        let table = SymbolTable::new(vec![symbol("MAIN.a", 0), symbol("MAIN.b", 2)]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("MAIN.b").map(|s| s.index_offset), Some(2));
        assert!(table.get("main.b").is_none());
        assert!(table.get("MAIN").is_none());
    }

    #[test]
    fn replace_swaps_whole_table() {
        let cache = SymbolCache::new();
        cache.replace(key(851), SymbolTable::new(vec![symbol("MAIN.a", 0)]));

        let before = cache.get(&key(851)).unwrap();
        cache.replace(
            key(851),
            SymbolTable::new(vec![symbol("MAIN.b", 4)]).with_upload_info(1, 80),
        );

        // old reader still sees its own snapshot
        assert!(before.get("MAIN.a").is_some());
        let after = cache.get(&key(851)).unwrap();
        assert!(after.get("MAIN.a").is_none());
        assert_eq!(after.reported_size(), 80);
        assert!(cache.get(&key(852)).is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let cache = SymbolCache::new();
        cache.replace(key(851), SymbolTable::new(vec![symbol("MAIN.a", 0)]));
        assert!(cache.symbol(&key(851), "MAIN.a").is_some());
        assert!(cache.remove(&key(851)).is_some());
        assert!(cache.symbol(&key(851), "MAIN.a").is_none());
    }

    #[test]
    fn concurrent_readers_see_whole_tables() {
        let cache = SymbolCache::new();
        cache.replace(key(851), SymbolTable::new(vec![symbol("MAIN.a", 0)]));
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for offset in 0..100 {
                    cache.replace(
                        key(851),
                        SymbolTable::new(vec![symbol("MAIN.a", offset), symbol("MAIN.b", offset)]),
                    );
                }
            });
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        let table = cache.get(&key(851)).unwrap();
                        let a = table.get("MAIN.a").unwrap().index_offset;
                        if let Some(b) = table.get("MAIN.b") {
                            assert_eq!(a, b.index_offset);
                        }
                    }
                });
            }
        });
        assert_eq!(cache.get(&key(851)).unwrap().len(), 2);
    }
}
