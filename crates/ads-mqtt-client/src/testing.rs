//! In-memory transport and device simulator for unit tests.

use crate::cache::SymbolDescriptor;
use crate::client::AdsClient;
use crate::config::AdsConnectionConfig;
use crate::transport::{PublishOptions, Transport, TransportError};
use ads_mqtt_proto::{AdsRequest, AdsResponse, AmsHeader, AmsNetId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Transport that records subscriptions and forwards publishes to a channel.
#[derive(Clone)]
pub(crate) struct RecordingTransport {
    connected: Arc<AtomicBool>,
    published: mpsc::UnboundedSender<(String, Vec<u8>)>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let (published, rx) = mpsc::unbounded_channel();
        let transport = Self {
            connected: Arc::new(AtomicBool::new(true)),
            published,
            subscriptions: Arc::default(),
        };
        (transport, rx)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _options: PublishOptions,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.published
            .send((topic.to_string(), payload))
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().unwrap().retain(|t| t != topic);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Requests seen by a simulated device.
#[derive(Clone, Default)]
pub(crate) struct DeviceLog {
    seen: Arc<Mutex<Vec<(AmsHeader, AdsRequest)>>>,
}

impl DeviceLog {
    pub(crate) fn requests(&self) -> Vec<AdsRequest> {
        self.seen.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub(crate) fn headers(&self) -> Vec<AmsHeader> {
        self.seen.lock().unwrap().iter().map(|(h, _)| *h).collect()
    }
}

pub(crate) fn test_config() -> AdsConnectionConfig {
    AdsConnectionConfig::new(
        "VirtualAmsNetwork1",
        AmsNetId::new(10, 0, 0, 7, 1, 1),
        AmsNetId::new(5, 80, 201, 232, 1, 1),
    )
}

/// Client wired to a simulated device answering with `respond`.
///
/// `respond` returns `(result, data)` to answer or `None` to stay silent.
pub(crate) fn harness<F>(respond: F) -> (AdsClient<RecordingTransport>, DeviceLog)
where
    F: FnMut(&AdsRequest) -> Option<(u32, Vec<u8>)> + Send + 'static,
{
    harness_with(test_config(), respond)
}

pub(crate) fn harness_with<F>(
    config: AdsConnectionConfig,
    mut respond: F,
) -> (AdsClient<RecordingTransport>, DeviceLog)
where
    F: FnMut(&AdsRequest) -> Option<(u32, Vec<u8>)> + Send + 'static,
{
    let (transport, mut rx) = RecordingTransport::new();
    let client = AdsClient::new(transport, config, Arc::default());
    let log = DeviceLog::default();

    let device = client.clone();
    let seen = log.clone();
    tokio::spawn(async move {
        let layout = device.config().layout;
        let response_topic = device.config().response_topic();
        while let Some((topic, frame)) = rx.recv().await {
            assert_eq!(topic, device.config().request_topic());
            let (header, request) = AdsRequest::parse(&frame, layout).unwrap();
            seen.seen.lock().unwrap().push((header, request.clone()));
            if let Some((result, data)) = respond(&request) {
                let reply = AdsResponse::encode_reply(&header, result, &data, layout);
                device.handle_message(&response_topic, &reply);
            }
        }
    });

    (client, log)
}

pub(crate) fn descriptor(name: &str, offset: u32, size: u32, type_name: &str) -> SymbolDescriptor {
    SymbolDescriptor {
        name: name.to_string(),
        index_group: 0x4020,
        index_offset: offset,
        size,
        type_name: type_name.to_string(),
        comment: String::new(),
        data_type: 0,
        flags: 0,
    }
}

/// One symbol table entry in upload layout.
pub(crate) fn symbol_entry(symbol: &SymbolDescriptor) -> Vec<u8> {
    let mut body = Vec::new();
    for word in [
        symbol.index_group,
        symbol.index_offset,
        symbol.size,
        symbol.data_type,
        symbol.flags,
    ] {
        body.extend_from_slice(&word.to_le_bytes());
    }
    for text in [&symbol.name, &symbol.type_name, &symbol.comment] {
        body.extend_from_slice(&u16::try_from(text.len()).unwrap().to_le_bytes());
    }
    for text in [&symbol.name, &symbol.type_name, &symbol.comment] {
        body.extend_from_slice(text.as_bytes());
        body.push(0);
    }

    let mut entry = u32::try_from(body.len() + 4).unwrap().to_le_bytes().to_vec();
    entry.extend_from_slice(&body);
    entry
}

/// Upload-info block reporting `count` symbols in `size` bytes.
pub(crate) fn upload_info(count: u32, size: u32) -> Vec<u8> {
    let mut block = vec![0u8; 24];
    block[0..4].copy_from_slice(&count.to_le_bytes());
    block[4..8].copy_from_slice(&size.to_le_bytes());
    block
}
