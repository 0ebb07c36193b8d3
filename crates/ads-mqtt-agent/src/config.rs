//! Agent configuration.

use ads_mqtt_client::config::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_SOURCE_PORT};
use ads_mqtt_client::{AdsConnectionConfig, MqttSettings, SymbolGroups};
use ads_mqtt_proto::index::DEFAULT_PLC_PORT;
use ads_mqtt_proto::{AmsNetId, FrameLayout};
use anyhow::{bail, Context, Result};
use std::time::Duration;
use uuid::Uuid;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Broker connection
    pub mqtt: MqttConfig,

    /// ADS endpoints and framing
    pub ads: AdsConfig,

    /// Cyclic work
    pub schedule: ScheduleConfig,

    /// Name announced in this bridge's info blob
    pub info_name: String,

    /// Extra topics whose deliveries are logged
    pub debug_topics: Vec<String>,
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// MQTT broker URL
    pub broker: String,

    /// MQTT client id; generated when absent
    pub client_id: Option<String>,

    /// Username
    pub username: Option<String>,

    /// Password
    pub password: Option<String>,
}

/// ADS configuration.
#[derive(Debug, Clone)]
pub struct AdsConfig {
    /// Virtual AMS network name
    pub namespace: String,

    /// This bridge's net id
    pub local_net_id: AmsNetId,

    /// This bridge's AMS port
    pub source_port: u16,

    /// PLC net id
    pub target_net_id: AmsNetId,

    /// PLC AMS port
    pub target_port: u16,

    /// Frame envelope
    pub layout: FrameLayout,

    /// Request deadline
    pub request_timeout: Duration,
}

/// Schedule configuration.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Symbol version poll interval
    pub monitor_interval: Duration,

    /// Symbol groups read cyclically (empty disables polling)
    pub poll_groups: SymbolGroups,

    /// Sum read interval
    pub poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker: "tcp://localhost:1883".to_string(),
                client_id: None,
                username: None,
                password: None,
            },
            ads: AdsConfig {
                namespace: "VirtualAmsNetwork1".to_string(),
                local_net_id: AmsNetId::new(127, 0, 0, 1, 1, 1),
                source_port: DEFAULT_SOURCE_PORT,
                target_net_id: AmsNetId::new(127, 0, 0, 1, 1, 2),
                target_port: DEFAULT_PLC_PORT,
                layout: FrameLayout::Plain,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            },
            schedule: ScheduleConfig {
                monitor_interval: Duration::from_secs(10),
                poll_groups: SymbolGroups::default(),
                poll_interval: Duration::from_secs(1),
            },
            info_name: "ads-mqtt-bridge".to_string(),
            debug_topics: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ADS_MQTT_BROKER`: MQTT broker URL
    /// - `ADS_MQTT_CLIENT_ID`: MQTT client id
    /// - `ADS_MQTT_USERNAME` / `ADS_MQTT_PASSWORD`: broker credentials
    /// - `ADS_NAMESPACE`: virtual AMS network name
    /// - `ADS_LOCAL_NET_ID` / `ADS_SOURCE_PORT`: this bridge's endpoint
    /// - `ADS_TARGET_NET_ID` / `ADS_TARGET_PORT`: the PLC endpoint
    /// - `ADS_FRAME_LAYOUT`: "plain" or "legacy"
    /// - `ADS_REQUEST_TIMEOUT_MS`: request deadline in milliseconds
    /// - `ADS_MONITOR_INTERVAL`: symbol version poll interval (e.g. "10s")
    /// - `ADS_POLL_PREFIXES`: symbol groups to read cyclically ("MAIN;GVL")
    /// - `ADS_POLL_INTERVAL`: sum read interval (e.g. "500ms")
    /// - `ADS_INFO_NAME`: name announced on the info topic
    /// - `ADS_DEBUG_TOPICS`: comma separated topic filters to log
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(broker) = lookup("ADS_MQTT_BROKER") {
            config.mqtt.broker = broker;
        }

        config.mqtt.client_id = lookup("ADS_MQTT_CLIENT_ID").filter(|id| !id.is_empty());
        config.mqtt.username = lookup("ADS_MQTT_USERNAME");
        config.mqtt.password = lookup("ADS_MQTT_PASSWORD");

        if let Some(namespace) = lookup("ADS_NAMESPACE") {
            config.ads.namespace = namespace;
        }

        if let Some(net_id) = lookup("ADS_LOCAL_NET_ID") {
            config.ads.local_net_id = net_id.parse().context("Invalid ADS_LOCAL_NET_ID")?;
        }

        if let Some(port) = lookup("ADS_SOURCE_PORT") {
            config.ads.source_port = port.parse().context("Invalid ADS_SOURCE_PORT")?;
        }

        if let Some(net_id) = lookup("ADS_TARGET_NET_ID") {
            config.ads.target_net_id = net_id.parse().context("Invalid ADS_TARGET_NET_ID")?;
        }

        if let Some(port) = lookup("ADS_TARGET_PORT") {
            config.ads.target_port = port.parse().context("Invalid ADS_TARGET_PORT")?;
        }

        if let Some(layout) = lookup("ADS_FRAME_LAYOUT") {
            config.ads.layout = layout.parse().context("Invalid ADS_FRAME_LAYOUT")?;
        }

        if let Some(ms) = lookup("ADS_REQUEST_TIMEOUT_MS") {
            let ms: u64 = ms.parse().context("Invalid ADS_REQUEST_TIMEOUT_MS")?;
            config.ads.request_timeout = Duration::from_millis(ms);
        }

        if let Some(interval) = lookup("ADS_MONITOR_INTERVAL") {
            config.schedule.monitor_interval =
                parse_interval(&interval).context("Invalid ADS_MONITOR_INTERVAL")?;
        }

        if let Some(prefixes) = lookup("ADS_POLL_PREFIXES") {
            config.schedule.poll_groups = SymbolGroups::parse(&prefixes);
        }

        if let Some(interval) = lookup("ADS_POLL_INTERVAL") {
            config.schedule.poll_interval =
                parse_interval(&interval).context("Invalid ADS_POLL_INTERVAL")?;
        }

        if let Some(name) = lookup("ADS_INFO_NAME") {
            config.info_name = name;
        }

        if let Some(topics) = lookup("ADS_DEBUG_TOPICS") {
            config.debug_topics = topics
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        if config.ads.local_net_id == config.ads.target_net_id {
            bail!("ADS_LOCAL_NET_ID and ADS_TARGET_NET_ID must differ");
        }

        Ok(config)
    }

    /// Engine connection settings.
    #[must_use]
    pub fn connection(&self) -> AdsConnectionConfig {
        AdsConnectionConfig::new(
            self.ads.namespace.clone(),
            self.ads.local_net_id,
            self.ads.target_net_id,
        )
        .with_source_port(self.ads.source_port)
        .with_target_port(self.ads.target_port)
        .with_layout(self.ads.layout)
        .with_timeout(self.ads.request_timeout)
    }

    /// Broker settings, generating a client id when none is configured.
    #[must_use]
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            broker_url: self.mqtt.broker.clone(),
            client_id: self
                .mqtt
                .client_id
                .clone()
                .unwrap_or_else(|| format!("ads-mqtt-{}", Uuid::new_v4())),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            ..MqttSettings::default()
        }
    }
}

/// Parse an interval such as `500ms`, `10s` or `2min`; bare numbers are seconds.
///
/// # Errors
///
/// Returns error if the number or unit is invalid, or the interval is zero.
pub fn parse_interval(input: &str) -> Result<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let value: u64 = number
        .parse()
        .with_context(|| format!("'{input}' does not start with a number"))?;

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "min" => Duration::from_secs(
            value
                .checked_mul(60)
                .with_context(|| format!("'{input}' is too long an interval"))?,
        ),
        other => bail!("unknown interval unit '{other}' (expected ms, s or min)"),
    };
    if duration.is_zero() {
        bail!("interval must be greater than zero");
    }
    Ok(duration)
}
