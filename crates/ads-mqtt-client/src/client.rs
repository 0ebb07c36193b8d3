//! The ADS client bound to one connection.

use crate::cache::{DeviceKey, SymbolCache, SymbolTable};
use crate::config::AdsConnectionConfig;
use crate::correlation::{CorrelationTable, Reply, ResponseShape};
use crate::error::AdsError;
use crate::transport::{PublishOptions, Transport};
use ads_mqtt_proto::{parse_online_flag, AdsRequest, AdsResponse, FrameError, TopicKind};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// What the inbound handler did with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Response completed a pending request
    Dispatched {
        /// Invocation id of the response
        invoke_id: u32,
    },
    /// Response matched no pending request and was dropped
    Unmatched {
        /// Invocation id of the response
        invoke_id: u32,
    },
    /// Response frame could not be parsed and was dropped
    Malformed(FrameError),
    /// Liveness info of the target device; `None` if the blob has no flag
    Liveness(Option<bool>),
    /// Topic not handled by this client
    Ignored,
}

struct Inner<T> {
    transport: T,
    config: AdsConnectionConfig,
    cache: Arc<SymbolCache>,
    pending: CorrelationTable,
    next_invoke_id: AtomicU32,
    handles: DashMap<String, u32>,
}

/// ADS client for one (namespace, local endpoint, target device).
///
/// Cheap to clone; clones share the correlation table and invocation counter.
/// Feed every MQTT delivery to [`AdsClient::handle_message`].
pub struct AdsClient<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AdsClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Removes a pending entry if the waiting future is dropped early.
struct PendingGuard<'a> {
    pending: &'a CorrelationTable,
    invoke_id: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.invoke_id);
    }
}

impl<T: Transport> AdsClient<T> {
    /// Create a client over `transport`, sharing `cache` with other clients.
    pub fn new(transport: T, config: AdsConnectionConfig, cache: Arc<SymbolCache>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                cache,
                pending: CorrelationTable::new(),
                next_invoke_id: AtomicU32::new(1),
                handles: DashMap::new(),
            }),
        }
    }

    /// Connection settings.
    #[must_use]
    pub fn config(&self) -> &AdsConnectionConfig {
        &self.inner.config
    }

    /// Shared symbol cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<SymbolCache> {
        &self.inner.cache
    }

    /// Underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Cache key of the target device.
    #[must_use]
    pub fn device_key(&self) -> DeviceKey {
        self.inner.config.device_key()
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Number of device handles held for batched reads.
    #[must_use]
    pub fn held_handles(&self) -> usize {
        self.inner.handles.len()
    }

    /// Device handles by symbol name.
    pub(crate) fn handles(&self) -> &DashMap<String, u32> {
        &self.inner.handles
    }

    /// Subscribe to the response topic and the target's liveness topic.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects a subscription.
    pub fn subscribe(&self) -> Result<(), AdsError> {
        let config = &self.inner.config;
        self.inner.transport.subscribe(&config.response_topic())?;
        self.inner.transport.subscribe(&config.target_info_topic())?;
        Ok(())
    }

    /// Undo [`AdsClient::subscribe`] and drop every pending request.
    ///
    /// # Errors
    ///
    /// Returns error if the transport rejects an unsubscribe.
    pub fn unsubscribe(&self) -> Result<(), AdsError> {
        let config = &self.inner.config;
        self.inner.pending.cancel_all();
        self.inner.transport.unsubscribe(&config.response_topic())?;
        self.inner.transport.unsubscribe(&config.target_info_topic())?;
        Ok(())
    }

    /// Handle one inbound delivery.
    ///
    /// Runs synchronously: responses are parsed and dispatched to their
    /// pending request, liveness blobs are reported back to the caller.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Inbound {
        let config = &self.inner.config;
        let Some((net_id, kind)) = config.topics.parse(topic) else {
            return Inbound::Ignored;
        };

        match kind {
            TopicKind::Response if net_id == config.local.net_id => {
                let response = match AdsResponse::parse(payload, config.layout) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(topic, len = payload.len(), error = %e, "Dropping malformed response");
                        return Inbound::Malformed(e);
                    }
                };
                let invoke_id = response.invoke_id();
                if self.inner.pending.dispatch(response) {
                    Inbound::Dispatched { invoke_id }
                } else {
                    tracing::debug!(invoke_id, "Response matches no pending request");
                    Inbound::Unmatched { invoke_id }
                }
            }
            TopicKind::Info if net_id == config.target.net_id => {
                let online = parse_online_flag(&String::from_utf8_lossy(payload));
                tracing::debug!(target_net_id = %net_id, ?online, "Liveness info received");
                Inbound::Liveness(online)
            }
            _ => Inbound::Ignored,
        }
    }

    fn next_invoke_id(&self) -> u32 {
        // fetch_add wraps on overflow
        self.inner.next_invoke_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `request` and wait for its reply, bounded by the request timeout.
    pub(crate) async fn request(
        &self,
        request: AdsRequest,
        shape: ResponseShape,
    ) -> Result<Reply, AdsError> {
        let inner = &*self.inner;
        let config = &inner.config;
        if !inner.transport.is_connected() {
            return Err(AdsError::NotConnected);
        }

        let invoke_id = self.next_invoke_id();
        let mut receiver = inner.pending.register(invoke_id, shape)?;
        let _guard = PendingGuard {
            pending: &inner.pending,
            invoke_id,
        };

        let frame = request.encode(config.target, config.local, invoke_id, config.layout);
        let (index_group, index_offset) = request.address();
        tracing::debug!(
            invoke_id,
            command = %request.command(),
            index_group = format_args!("{index_group:#06x}"),
            index_offset,
            frame = %hex::encode(&frame),
            "Sending request"
        );
        inner
            .transport
            .publish(&config.request_topic(), frame, PublishOptions::default())?;

        match tokio::time::timeout(config.request_timeout, &mut receiver).await {
            Ok(reply) => reply.unwrap_or(Err(AdsError::Cancelled { invoke_id })),
            Err(_) => {
                inner.pending.expire(invoke_id);
                // a response racing the deadline may already have been delivered
                receiver
                    .await
                    .unwrap_or(Err(AdsError::Timeout { invoke_id }))
            }
        }
    }

    /// Read `length` bytes at an index group/offset.
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the read or no reply arrives.
    pub async fn read(
        &self,
        index_group: u32,
        index_offset: u32,
        length: u32,
    ) -> Result<Vec<u8>, AdsError> {
        let request = AdsRequest::Read {
            index_group,
            index_offset,
            length,
        };
        expect_data(self.request(request, ResponseShape::Data).await?)
    }

    /// Write `data` at an index group/offset.
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the write or no reply arrives.
    pub async fn write(
        &self,
        index_group: u32,
        index_offset: u32,
        data: Vec<u8>,
    ) -> Result<(), AdsError> {
        let request = AdsRequest::Write {
            index_group,
            index_offset,
            data,
        };
        expect_data(self.request(request, ResponseShape::Data).await?).map(|_| ())
    }

    /// Write `data` then read up to `read_length` bytes in one exchange.
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the request or no reply arrives.
    pub async fn read_write(
        &self,
        index_group: u32,
        index_offset: u32,
        read_length: u32,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, AdsError> {
        let request = AdsRequest::ReadWrite {
            index_group,
            index_offset,
            read_length,
            data,
        };
        expect_data(self.request(request, ResponseShape::Data).await?)
    }

    /// Cached symbol table of the target, loading it if none is cached.
    ///
    /// # Errors
    ///
    /// Returns error if the table has to be loaded and loading fails.
    pub async fn symbol_table(&self) -> Result<Arc<SymbolTable>, AdsError> {
        match self.inner.cache.get(&self.device_key()) {
            Some(table) => Ok(table),
            None => self.load_symbols().await,
        }
    }
}

fn expect_data(reply: Reply) -> Result<Vec<u8>, AdsError> {
    match reply {
        Reply::Data(data) => Ok(data),
        other => Err(AdsError::Malformed(format!(
            "expected plain data, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, harness_with, test_config, RecordingTransport};
    use ads_mqtt_proto::{AmsHeader, FrameLayout, InfoPayload};
    use std::time::Duration;

    #[tokio::test]
    async fn invoke_ids_start_at_one_and_increase() {
        let (client, device) = harness(|_| Some((0, vec![1, 2])));

        client.read(0x4020, 0, 2).await.unwrap();
        client.read(0x4020, 2, 2).await.unwrap();

        let ids: Vec<u32> = device.headers().iter().map(|h| h.invoke_id).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn invoke_ids_wrap() {
        let (transport, _rx) = RecordingTransport::new();
        let client = AdsClient::new(transport, test_config(), Arc::default());
        client.inner.next_invoke_id.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(client.next_invoke_id(), u32::MAX);
        assert_eq!(client.next_invoke_id(), 0);
        assert_eq!(client.next_invoke_id(), 1);
    }

    #[tokio::test]
    async fn read_returns_device_data() {
        let (client, device) = harness(|request| match request {
            AdsRequest::Read { length: 4, .. } => Some((0, vec![1, 2, 3, 4])),
            _ => None,
        });

        let data = client.read(0xF008, 0, 4).await.unwrap();
        assert_eq!(data, [1, 2, 3, 4]);
        assert_eq!(client.pending_requests(), 0);
        assert_eq!(
            device.requests(),
            [AdsRequest::Read {
                index_group: 0xF008,
                index_offset: 0,
                length: 4
            }]
        );
    }

    #[tokio::test]
    async fn nonzero_result_is_device_error() {
        let (client, _device) = harness(|_| Some((0x0704, Vec::new())));
        let err = client.write(0x4020, 0, vec![1]).await.unwrap_err();
        assert_eq!(err.device_code(), Some(0x0704));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let config = test_config().with_timeout(Duration::from_millis(30));
        let (client, _device) = harness_with(config, |_| None);

        let err = client.read(0x4020, 0, 1).await.unwrap_err();
        assert!(matches!(err, AdsError::Timeout { invoke_id: 1 }));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn disconnected_transport_sends_nothing() {
        let (transport, mut rx) = RecordingTransport::new();
        transport.set_connected(false);
        let client = AdsClient::new(transport, test_config(), Arc::default());

        let err = client.read(0x4020, 0, 1).await.unwrap_err();
        assert!(matches!(err, AdsError::NotConnected));
        assert!(rx.try_recv().is_err());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn legacy_layout_round_trip() {
        let config = test_config().with_layout(FrameLayout::Legacy);
        let (client, device) = harness_with(config, |_| Some((0, vec![9])));

        assert_eq!(client.read(0x4020, 0, 1).await.unwrap(), [9]);
        assert_eq!(device.headers()[0].invoke_id, 1);
    }

    #[test]
    fn undersized_response_never_dispatched() {
        let (transport, _rx) = RecordingTransport::new();
        let client = AdsClient::new(transport, test_config(), Arc::default());
        let mut receiver = client
            .inner
            .pending
            .register(0, ResponseShape::Data)
            .unwrap();

        let topic = client.config().response_topic();
        let outcome = client.handle_message(&topic, &[0u8; 30]);
        assert!(matches!(outcome, Inbound::Malformed(FrameError::TooShort { .. })));
        assert_eq!(client.pending_requests(), 1);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn stray_response_is_unmatched() {
        let (transport, _rx) = RecordingTransport::new();
        let config = test_config();
        let client = AdsClient::new(transport, config.clone(), Arc::default());

        let header = AmsHeader {
            target: config.target,
            source: config.local,
            command: 2,
            state_flags: 4,
            length: 12,
            error_code: 0,
            invoke_id: 77,
        };
        let reply = AdsResponse::encode_reply(&header, 0, &[1], config.layout);
        assert_eq!(
            client.handle_message(&config.response_topic(), &reply),
            Inbound::Unmatched { invoke_id: 77 }
        );
    }

    #[test]
    fn liveness_and_foreign_topics() {
        let (transport, _rx) = RecordingTransport::new();
        let config = test_config();
        let client = AdsClient::new(transport, config.clone(), Arc::default());

        let blob = InfoPayload::new("PLC", true).to_xml();
        assert_eq!(
            client.handle_message(&config.target_info_topic(), blob.as_bytes()),
            Inbound::Liveness(Some(true))
        );
        assert_eq!(
            client.handle_message(&config.local_info_topic(), blob.as_bytes()),
            Inbound::Ignored
        );
        assert_eq!(
            client.handle_message("elsewhere/topic", b"x"),
            Inbound::Ignored
        );
    }

    #[test]
    fn subscribe_uses_response_and_info_topics() {
        let (transport, _rx) = RecordingTransport::new();
        let config = test_config();
        let client = AdsClient::new(transport.clone(), config.clone(), Arc::default());

        client.subscribe().unwrap();
        assert_eq!(
            transport.subscriptions(),
            [config.response_topic(), config.target_info_topic()]
        );
        client.unsubscribe().unwrap();
        assert!(transport.subscriptions().is_empty());
    }
}
