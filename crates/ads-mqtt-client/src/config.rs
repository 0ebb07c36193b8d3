//! Connection configuration.

use crate::cache::DeviceKey;
use ads_mqtt_proto::index::DEFAULT_PLC_PORT;
use ads_mqtt_proto::types::DEFAULT_STRING_WIDTH;
use ads_mqtt_proto::{AmsAddr, AmsNetId, FrameLayout, TopicScheme};
use std::time::Duration;

/// Default AMS source port of this client.
pub const DEFAULT_SOURCE_PORT: u16 = 32905;

/// Default deadline for every outstanding request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for one (namespace, local endpoint, target device) connection.
#[derive(Debug, Clone)]
pub struct AdsConnectionConfig {
    /// Topic scheme (namespace)
    pub topics: TopicScheme,
    /// This client's endpoint
    pub local: AmsAddr,
    /// The remote device
    pub target: AmsAddr,
    /// Frame envelope used on this deployment
    pub layout: FrameLayout,
    /// Deadline applied to every request
    pub request_timeout: Duration,
    /// Read width of a bare `STRING`
    pub string_width: usize,
}

impl AdsConnectionConfig {
    /// Connection with default ports, layout and timeout.
    #[must_use]
    pub fn new(namespace: impl Into<String>, local: AmsNetId, target: AmsNetId) -> Self {
        Self {
            topics: TopicScheme::new(namespace),
            local: AmsAddr::new(local, DEFAULT_SOURCE_PORT),
            target: AmsAddr::new(target, DEFAULT_PLC_PORT),
            layout: FrameLayout::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            string_width: DEFAULT_STRING_WIDTH,
        }
    }

    /// Set the frame layout.
    #[must_use]
    pub fn with_layout(mut self, layout: FrameLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the request deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the target AMS port.
    #[must_use]
    pub fn with_target_port(mut self, port: u16) -> Self {
        self.target.port = port;
        self
    }

    /// Set the local AMS port.
    #[must_use]
    pub fn with_source_port(mut self, port: u16) -> Self {
        self.local.port = port;
        self
    }

    /// Cache key of the target device.
    #[must_use]
    pub fn device_key(&self) -> DeviceKey {
        DeviceKey {
            namespace: self.topics.namespace.clone(),
            target: self.target,
        }
    }

    /// Topic requests are published on.
    #[must_use]
    pub fn request_topic(&self) -> String {
        self.topics.request(&self.target.net_id)
    }

    /// Topic responses arrive on.
    #[must_use]
    pub fn response_topic(&self) -> String {
        self.topics.response(&self.local.net_id)
    }

    /// Liveness topic of the target device.
    #[must_use]
    pub fn target_info_topic(&self) -> String {
        self.topics.info(&self.target.net_id)
    }

    /// Liveness topic of this client.
    #[must_use]
    pub fn local_info_topic(&self) -> String {
        self.topics.info(&self.local.net_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_topics() {
        let config = AdsConnectionConfig::new(
            "VirtualAmsNetwork1",
            AmsNetId::new(10, 0, 0, 7, 1, 1),
            AmsNetId::new(5, 80, 201, 232, 1, 1),
        );

        assert_eq!(config.target.port, 851);
        assert_eq!(config.local.port, 32905);
        assert_eq!(config.layout, FrameLayout::Plain);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.request_topic(), "VirtualAmsNetwork1/5.80.201.232.1.1/ams");
        assert_eq!(config.response_topic(), "VirtualAmsNetwork1/10.0.0.7.1.1/ams/res");
        assert_eq!(config.target_info_topic(), "VirtualAmsNetwork1/5.80.201.232.1.1/info");
        assert_eq!(config.local_info_topic(), "VirtualAmsNetwork1/10.0.0.7.1.1/info");
    }

    #[test]
    fn device_key_includes_port() {
        let base = AdsConnectionConfig::new(
            "ns",
            AmsNetId::new(1, 1, 1, 1, 1, 1),
            AmsNetId::new(2, 2, 2, 2, 1, 1),
        );
        let other = base.clone().with_target_port(852);
        assert_ne!(base.device_key(), other.device_key());
    }
}
