//! Server records and discovery events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// An LMS instance discovered on the network.
///
/// Immutable value record: two responses describing the same server compare
/// equal field for field, and any difference (a new version string, a moved
/// port) is treated as a distinct identity by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Address the discovery response arrived from; primary identity key.
    pub address: IpAddr,

    /// Display name advertised by the server.
    pub name: String,

    /// Server version, when advertised.
    pub version: Option<String>,

    /// Stable identifier across address changes; falls back to `name` when
    /// the server does not advertise one.
    pub unique_id: String,

    /// Port of the JSON-RPC control API.
    pub control_api_port: u16,

    /// CLI port. When present, the service tracks this server's liveness
    /// over a CLI connection instead of waiting out the discovery TTL.
    pub control_channel_port: Option<u16>,
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Event emitted when the set of known servers changes or a socket
/// operation fails.
///
/// `Lost` for a replaced server is always delivered before the `Discovered`
/// that supersedes it; the event channel preserves that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// A server appeared, or a known server re-announced with changed info.
    Discovered(ServerInfo),

    /// A server's TTL expired, its CLI connection dropped, or its info was
    /// superseded by a changed announcement.
    Lost(ServerInfo),

    /// A non-fatal socket error (bind or send failure).
    Error { message: String },
}

/// Lifecycle state of the discovery service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Running => f.write_str("running"),
            ServiceStatus::Stopped => f.write_str("stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn server() -> ServerInfo {
        ServerInfo {
            address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)),
            name: "Living Room".to_string(),
            version: Some("9.0.2".to_string()),
            unique_id: "a1b2c3".to_string(),
            control_api_port: 9000,
            control_channel_port: Some(9090),
        }
    }

    #[test]
    fn any_field_difference_is_a_distinct_identity() {
        let a = server();

        let mut b = a.clone();
        assert_eq!(a, b);

        b.version = Some("9.0.3".to_string());
        assert_ne!(a, b);

        let mut c = a.clone();
        c.control_channel_port = None;
        assert_ne!(a, c);
    }

    #[test]
    fn status_display_matches_api_strings() {
        assert_eq!(ServiceStatus::Running.to_string(), "running");
        assert_eq!(ServiceStatus::Stopped.to_string(), "stopped");
    }

    #[test]
    fn server_info_serializes_camel_case() {
        let json = serde_json::to_value(server()).unwrap();
        assert_eq!(json["controlApiPort"], 9000);
        assert_eq!(json["uniqueId"], "a1b2c3");
    }
}
