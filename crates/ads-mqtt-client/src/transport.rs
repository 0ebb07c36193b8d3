//! Pub/sub transport seam and its MQTT implementation.
//!
//! The engine only needs to publish frames and manage subscriptions; the
//! connection lifecycle stays with the transport and shows up here solely as
//! "can we publish right now".

use rumqttc::{AsyncClient, ClientError, EventLoop, MqttOptions, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Qos {
    /// Fire and forget
    #[default]
    AtMostOnce,
    /// Acknowledged delivery
    AtLeastOnce,
}

/// Options for a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Delivery guarantee
    pub qos: Qos,
    /// Whether the broker retains the message
    pub retain: bool,
}

impl PublishOptions {
    /// Retained publish at `AtMostOnce`.
    #[must_use]
    pub fn retained() -> Self {
        Self {
            qos: Qos::AtMostOnce,
            retain: true,
        }
    }
}

/// Publish/subscribe primitives the engine relies on.
///
/// Implementations must not block: frames are handed off and the call returns.
pub trait Transport: Send + Sync + 'static {
    /// Publish `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot accept the message.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError>;

    /// Subscribe to `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued.
    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Unsubscribe from `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued.
    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Whether a publish can currently succeed.
    fn is_connected(&self) -> bool;
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Broker URL (`tcp://host:port`, `mqtt://host:port` or `host[:port]`)
    pub broker_url: String,
    /// MQTT client id
    pub client_id: String,
    /// Optional username
    pub username: Option<String>,
    /// Optional password
    pub password: Option<String>,
    /// Keep-alive interval
    pub keep_alive: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".to_string(),
            client_id: "ads-mqtt".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// [`Transport`] backed by a `rumqttc` client.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Create the client and its event loop.
    ///
    /// The event loop must be polled by the caller; feed every `ConnAck` and
    /// connection error into [`MqttTransport::set_connected`].
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn new(settings: &MqttSettings) -> Result<(Self, EventLoop), TransportError> {
        let (host, port) = parse_mqtt_url(&settings.broker_url)?;

        let mut mqtt_options = MqttOptions::new(&settings.client_id, host, port);
        mqtt_options.set_keep_alive(settings.keep_alive);
        mqtt_options.set_clean_session(true);
        if let Some(username) = &settings.username {
            mqtt_options.set_credentials(
                username.clone(),
                settings.password.clone().unwrap_or_default(),
            );
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);

        Ok((
            Self {
                client,
                connected: Arc::new(AtomicBool::new(false)),
            },
            eventloop,
        ))
    }

    /// Record the connection state observed on the event loop.
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            tracing::info!(connected, "MQTT connection state changed");
        }
    }

    /// Underlying client, for callers that need raw MQTT access.
    #[must_use]
    pub fn client(&self) -> &AsyncClient {
        &self.client
    }
}

impl Transport for MqttTransport {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let qos = match options.qos {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
        };
        self.client
            .try_publish(topic, qos, options.retain, payload)
            .map_err(|e| TransportError::Publish(client_error(&e)))
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        tracing::info!(topic, "Subscribing");
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| TransportError::Subscribe(client_error(&e)))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        tracing::info!(topic, "Unsubscribing");
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| TransportError::Subscribe(client_error(&e)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn client_error(err: &ClientError) -> String {
    err.to_string()
}

/// Parse MQTT URL into host and port.
///
/// # Errors
///
/// Returns error if the scheme is not `tcp`/`mqtt`, the host is missing, or
/// the port is not a number.
pub fn parse_mqtt_url(input: &str) -> Result<(String, u16), TransportError> {
    if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| TransportError::InvalidUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(TransportError::InvalidUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TransportError::InvalidUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port
            .parse()
            .map_err(|_| TransportError::InvalidUrl(format!("{input}: invalid port '{port}'")))?,
    };
    if parts.next().is_some() {
        return Err(TransportError::InvalidUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

/// Errors raised by the transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Invalid MQTT URL
    #[error("invalid MQTT URL: {0}")]
    InvalidUrl(String),
    /// Broker connection is down
    #[error("not connected")]
    NotConnected,
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
    /// Subscribe or unsubscribe failed
    #[error("subscription error: {0}")]
    Subscribe(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mqtt_url_tcp() {
        let (host, port) = parse_mqtt_url("tcp://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_mqtt_url_default_port() {
        let (host, port) = parse_mqtt_url("mqtt://broker.example.com").unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 1883);
    }

    #[test]
    fn parse_mqtt_url_no_scheme() {
        let (host, port) = parse_mqtt_url("10.0.0.5:8883").unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 8883);
    }

    #[test]
    fn parse_mqtt_url_rejects_other_schemes() {
        assert!(matches!(
            parse_mqtt_url("http://localhost:1883"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(parse_mqtt_url("host:1:2").is_err());
        assert!(parse_mqtt_url(":1883").is_err());
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let settings = MqttSettings::default();
        let (transport, _eventloop) = MqttTransport::new(&settings).unwrap();

        let err = tokio_test::assert_err!(transport.publish(
            "ns/1.2.3.4.5.6/ams",
            vec![1],
            PublishOptions::default()
        ));
        assert!(matches!(err, TransportError::NotConnected));

        transport.set_connected(true);
        assert!(transport.is_connected());
        tokio_test::assert_ok!(transport.publish(
            "ns/1.2.3.4.5.6/ams",
            vec![1],
            PublishOptions::retained()
        ));
    }
}
