//! Request/response correlation.
//!
//! Every outgoing request registers its invocation id together with the
//! [`ResponseShape`] it expects. The inbound handler hands each parsed response
//! to [`CorrelationTable::dispatch`], which removes the entry, interprets the
//! body according to the stored shape and fulfils the waiting receiver. A
//! response whose id is not registered is dropped: it may belong to another
//! client sharing the response topic.

use crate::error::AdsError;
use crate::sum::{parse_handle_table, HandleOutcome};
use ads_mqtt_proto::frame::read_u32;
use ads_mqtt_proto::index::codes;
use ads_mqtt_proto::AdsResponse;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

/// What the body of a response is expected to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Plain read, write or read-write data
    Data,
    /// Symbol version counter
    SymbolVersion,
    /// Sum handle acquisition for `count` symbols
    HandleTable {
        /// Number of symbols requested
        count: usize,
    },
    /// Sum read of `count` handles
    SumRead {
        /// Number of handles read
        count: usize,
    },
}

/// Interpreted response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Returned data
    Data(Vec<u8>),
    /// Symbol version counter
    SymbolVersion(u32),
    /// One outcome per requested symbol
    Handles(Vec<HandleOutcome>),
    /// Sum read result
    SumRead {
        /// Per-symbol result codes
        codes: Vec<u32>,
        /// Complete returned data (codes followed by values)
        raw: Vec<u8>,
    },
}

impl ResponseShape {
    /// Interpret a response according to this shape.
    ///
    /// # Errors
    ///
    /// Returns the device error for a nonzero result, `SymbolVersionChanged`
    /// when a sum read reports the version-changed code, or `Malformed` when
    /// the body is too small for the shape.
    pub fn resolve(self, response: AdsResponse) -> Result<Reply, AdsError> {
        let AdsResponse { result, data, .. } = response;

        match self {
            Self::SumRead { count } => resolve_sum_read(result, data, count),
            _ if result != codes::NOERR => Err(AdsError::Device { code: result }),
            Self::Data => Ok(Reply::Data(data)),
            Self::SymbolVersion => {
                if data.is_empty() {
                    return Err(AdsError::Malformed(
                        "symbol version response carries no data".to_string(),
                    ));
                }
                let mut buf = [0u8; 4];
                let n = data.len().min(4);
                buf[..n].copy_from_slice(&data[..n]);
                Ok(Reply::SymbolVersion(u32::from_le_bytes(buf)))
            }
            Self::HandleTable { count } => parse_handle_table(&data, count).map(Reply::Handles),
        }
    }
}

fn resolve_sum_read(result: u32, data: Vec<u8>, count: usize) -> Result<Reply, AdsError> {
    if result == codes::SYMBOL_VERSION_INVALID {
        return Err(AdsError::SymbolVersionChanged { raw: data });
    }
    if result != codes::NOERR {
        return Err(AdsError::Device { code: result });
    }
    if data.len() < count * 4 {
        return Err(AdsError::Malformed(format!(
            "sum read returned {} bytes, need {} for result codes",
            data.len(),
            count * 4
        )));
    }
    let results: Vec<u32> = (0..count).map(|i| read_u32(&data, i * 4)).collect();
    if results.contains(&codes::SYMBOL_VERSION_INVALID) {
        return Err(AdsError::SymbolVersionChanged { raw: data });
    }
    Ok(Reply::SumRead {
        codes: results,
        raw: data,
    })
}

type Completion = oneshot::Sender<Result<Reply, AdsError>>;

struct Pending {
    shape: ResponseShape,
    completion: Completion,
}

/// Outstanding requests keyed by invocation id.
#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<u32, Pending>,
}

impl CorrelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return the receiver its reply is delivered on.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateInvokeId` if `invoke_id` is still outstanding.
    pub fn register(
        &self,
        invoke_id: u32,
        shape: ResponseShape,
    ) -> Result<oneshot::Receiver<Result<Reply, AdsError>>, AdsError> {
        match self.pending.entry(invoke_id) {
            Entry::Occupied(_) => Err(AdsError::DuplicateInvokeId(invoke_id)),
            Entry::Vacant(slot) => {
                let (completion, receiver) = oneshot::channel();
                slot.insert(Pending { shape, completion });
                Ok(receiver)
            }
        }
    }

    /// Complete the request matching `response`.
    ///
    /// Returns `false` when no request is registered under its invocation id.
    pub fn dispatch(&self, response: AdsResponse) -> bool {
        let invoke_id = response.invoke_id();
        let Some((_, entry)) = self.pending.remove(&invoke_id) else {
            return false;
        };
        let outcome = entry.shape.resolve(response);
        tracing::debug!(
            invoke_id,
            shape = ?entry.shape,
            ok = outcome.is_ok(),
            "Dispatched response"
        );
        // receiver may already be gone if the caller stopped waiting
        let _ = entry.completion.send(outcome);
        true
    }

    /// Fail the request with a timeout if it is still outstanding.
    pub fn expire(&self, invoke_id: u32) -> bool {
        let Some((_, entry)) = self.pending.remove(&invoke_id) else {
            return false;
        };
        tracing::warn!(invoke_id, shape = ?entry.shape, "Request timed out");
        let _ = entry.completion.send(Err(AdsError::Timeout { invoke_id }));
        true
    }

    /// Drop the request without completing it.
    pub fn cancel(&self, invoke_id: u32) -> bool {
        self.pending.remove(&invoke_id).is_some()
    }

    /// Drop every outstanding request.
    pub fn cancel_all(&self) {
        self.pending.clear();
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ads_mqtt_proto::{AdsRequest, AmsAddr, AmsNetId, FrameLayout};

    fn response(invoke_id: u32, result: u32, data: &[u8]) -> AdsResponse {
        let request = AdsRequest::Read {
            index_group: 0x4020,
            index_offset: 0,
            length: 1,
        };
        let frame = request.encode(
            AmsAddr::new(AmsNetId::new(5, 80, 201, 232, 1, 1), 851),
            AmsAddr::new(AmsNetId::new(10, 0, 0, 7, 1, 1), 32905),
            invoke_id,
            FrameLayout::Plain,
        );
        let (header, _) = AdsRequest::parse(&frame, FrameLayout::Plain).unwrap();
        let reply = AdsResponse::encode_reply(&header, result, data, FrameLayout::Plain);
        AdsResponse::parse(&reply, FrameLayout::Plain).unwrap()
    }

    #[test]
    fn dispatch_unregistered_is_noop() {
        let table = CorrelationTable::new();
        assert!(!table.dispatch(response(9, 0, &[1])));
        assert!(table.is_empty());
    }

    #[test]
    fn dispatch_fires_once() {
        let table = CorrelationTable::new();
        let mut rx = table.register(1, ResponseShape::Data).unwrap();

        assert!(table.dispatch(response(1, 0, &[7])));
        assert_eq!(rx.try_recv().unwrap().unwrap(), Reply::Data(vec![7]));
        assert!(table.is_empty());

        // duplicate delivery is ignored
        assert!(!table.dispatch(response(1, 0, &[8])));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let table = CorrelationTable::new();
        let _rx = table.register(5, ResponseShape::Data).unwrap();
        assert!(matches!(
            table.register(5, ResponseShape::Data),
            Err(AdsError::DuplicateInvokeId(5))
        ));
    }

    #[test]
    fn expire_and_dispatch_are_exclusive() {
        let table = CorrelationTable::new();
        let mut rx = table.register(3, ResponseShape::Data).unwrap();

        assert!(table.expire(3));
        assert!(!table.dispatch(response(3, 0, &[1])));
        assert!(!table.expire(3));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(AdsError::Timeout { invoke_id: 3 })
        ));
    }

    #[test]
    fn device_error_surfaces_code() {
        let table = CorrelationTable::new();
        let mut rx = table.register(4, ResponseShape::Data).unwrap();
        table.dispatch(response(4, 0x0710, &[]));
        assert_eq!(rx.try_recv().unwrap().unwrap_err().device_code(), Some(0x0710));
    }

    #[test]
    fn shape_decides_interpretation() {
        let version = ResponseShape::SymbolVersion.resolve(response(1, 0, &[7]));
        assert_eq!(version.unwrap(), Reply::SymbolVersion(7));

        let empty = ResponseShape::SymbolVersion.resolve(response(1, 0, &[]));
        assert!(matches!(empty, Err(AdsError::Malformed(_))));

        let mut raw = Vec::new();
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&0x0711u32.to_le_bytes());
        raw.extend_from_slice(&[1, 2]);
        let changed = ResponseShape::SumRead { count: 2 }.resolve(response(1, 0, &raw));
        assert!(matches!(changed, Err(AdsError::SymbolVersionChanged { raw: r }) if r == raw));

        let frame_level = ResponseShape::SumRead { count: 1 }.resolve(response(1, 0x0711, &[]));
        assert!(matches!(frame_level, Err(AdsError::SymbolVersionChanged { .. })));
    }

    #[test]
    fn cancel_drops_without_reply() {
        let table = CorrelationTable::new();
        let mut rx = table.register(8, ResponseShape::Data).unwrap();
        assert!(table.cancel(8));
        assert!(rx.try_recv().is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn concurrent_register_and_dispatch() {
        let table = CorrelationTable::new();
        std::thread::scope(|scope| {
            for worker in 0..4u32 {
                let table = &table;
                scope.spawn(move || {
                    for i in 0..50 {
                        let invoke_id = worker * 1000 + i;
                        let mut rx = table.register(invoke_id, ResponseShape::Data).unwrap();
                        assert!(table.dispatch(response(invoke_id, 0, &[1])));
                        assert_eq!(rx.try_recv().unwrap().unwrap(), Reply::Data(vec![1]));
                    }
                });
            }
        });
        assert!(table.is_empty());
    }
}
