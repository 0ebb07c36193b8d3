//! MQTT topic scheme for ADS-over-MQTT.
//!
//! Topic structure: `{namespace}/{netId}/{suffix}`
//!
//! - `{namespace}/{targetNetId}/ams` carries request frames to a device
//! - `{namespace}/{localNetId}/ams/res` carries response frames back to us
//! - `{namespace}/{netId}/info` carries a retained liveness blob
//!
//! One response topic is shared by every operation on a connection.

use crate::netid::AmsNetId;
use serde::{Deserialize, Serialize};

/// Topic scheme for one broker namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScheme {
    /// Virtual AMS network name (first topic level)
    pub namespace: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            namespace: "VirtualAmsNetwork1".to_string(),
        }
    }
}

impl TopicScheme {
    /// Create a topic scheme for a namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Topic requests to `target` are published on.
    #[must_use]
    pub fn request(&self, target: &AmsNetId) -> String {
        format!("{}/{target}/ams", self.namespace)
    }

    /// Topic responses addressed to `local` arrive on.
    #[must_use]
    pub fn response(&self, local: &AmsNetId) -> String {
        format!("{}/{local}/ams/res", self.namespace)
    }

    /// Liveness topic of `net_id`.
    #[must_use]
    pub fn info(&self, net_id: &AmsNetId) -> String {
        format!("{}/{net_id}/info", self.namespace)
    }

    /// Parse a topic to extract the net id and topic kind.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<(AmsNetId, TopicKind)> {
        let remainder = topic
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix('/')?;
        let (net_id, suffix) = remainder.split_once('/')?;
        let net_id = net_id.parse().ok()?;

        let kind = match suffix {
            "ams" => TopicKind::Request,
            "ams/res" => TopicKind::Response,
            "info" => TopicKind::Info,
            _ => return None,
        };

        Some((net_id, kind))
    }
}

/// Topic kinds in the scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// Request frames
    Request,
    /// Response frames
    Response,
    /// Liveness info
    Info,
}

/// Liveness blob published on the info topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoPayload {
    /// Name announced for this endpoint
    pub name: String,
    /// Operating system version
    pub os_version: String,
    /// Platform name
    pub os_platform: String,
    /// Online flag
    pub online: bool,
}

impl InfoPayload {
    /// Info blob announcing a bridge endpoint.
    #[must_use]
    pub fn new(name: impl Into<String>, online: bool) -> Self {
        Self {
            name: name.into(),
            os_version: "n/a".to_string(),
            os_platform: "rust".to_string(),
            online,
        }
    }

    /// Render the XML blob.
    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            r#"<info><online name="{}" osVersion="{}" osPlatform="{}">{}</online></info>"#,
            self.name, self.os_version, self.os_platform, self.online
        )
    }
}

/// Extract the online flag from an info blob.
///
/// Looks for the `>true</online>` / `>false</online>` marker, ignoring case.
/// Returns `None` if no marker is present.
#[must_use]
pub fn parse_online_flag(payload: &str) -> Option<bool> {
    let lower = payload.to_ascii_lowercase();
    let end = lower.find("</online>")?;
    let open = lower[..end].rfind('>')?;
    match lower[open + 1..end].trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> AmsNetId {
        s.parse().unwrap()
    }

    #[test]
    fn topic_generation() {
        let scheme = TopicScheme::new("VirtualAmsNetwork1");
        let target = net("5.80.201.232.1.1");
        let local = net("10.0.0.7.1.1");

        assert_eq!(scheme.request(&target), "VirtualAmsNetwork1/5.80.201.232.1.1/ams");
        assert_eq!(scheme.response(&local), "VirtualAmsNetwork1/10.0.0.7.1.1/ams/res");
        assert_eq!(scheme.info(&target), "VirtualAmsNetwork1/5.80.201.232.1.1/info");
    }

    #[test]
    fn topic_parsing() {
        let scheme = TopicScheme::new("plant");

        let (id, kind) = scheme.parse("plant/10.0.0.7.1.1/ams/res").unwrap();
        assert_eq!(id, net("10.0.0.7.1.1"));
        assert_eq!(kind, TopicKind::Response);

        let (_, kind) = scheme.parse("plant/5.80.201.232.1.1/info").unwrap();
        assert_eq!(kind, TopicKind::Info);

        assert!(scheme.parse("other/10.0.0.7.1.1/ams").is_none());
        assert!(scheme.parse("plant/not-an-id/ams").is_none());
        assert!(scheme.parse("plant/10.0.0.7.1.1/foo").is_none());
    }

    #[test]
    fn online_marker() {
        let blob = InfoPayload::new("BRIDGE", false).to_xml();
        assert_eq!(
            blob,
            r#"<info><online name="BRIDGE" osVersion="n/a" osPlatform="rust">false</online></info>"#
        );
        assert_eq!(parse_online_flag(&blob), Some(false));
        assert_eq!(
            parse_online_flag(r#"<info><online name="PLC1">TRUE</online><os/></info>"#),
            Some(true)
        );
        assert_eq!(parse_online_flag("<info></info>"), None);
        assert_eq!(parse_online_flag("<online>maybe</online>"), None);
    }
}
