//! Configuration for the discovery service.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Configuration for [`DiscoveryService`](crate::DiscoveryService).
///
/// Validated once at `start()`; an invalid configuration is rejected before
/// any socket is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Address discovery requests are broadcast to.
    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: IpAddr,

    /// How long in milliseconds to wait for a known server to answer a
    /// subsequent discovery request before it is presumed lost. Only applies
    /// to servers without a CLI liveness connection.
    #[serde(default = "default_discovered_ttl")]
    pub discovered_ttl_ms: u64,

    /// How often in milliseconds to broadcast discovery requests.
    #[serde(default = "default_discover_interval")]
    pub discover_interval_ms: u64,
}

fn default_broadcast_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}

fn default_discovered_ttl() -> u64 {
    60_000
}

fn default_discover_interval() -> u64 {
    30_000
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_address: default_broadcast_address(),
            discovered_ttl_ms: default_discovered_ttl(),
            discover_interval_ms: default_discover_interval(),
        }
    }
}

impl DiscoveryConfig {
    /// Returns the discovered-server TTL as a Duration
    pub fn discovered_ttl(&self) -> Duration {
        Duration::from_millis(self.discovered_ttl_ms)
    }

    /// Returns the broadcast interval as a Duration
    pub fn discover_interval(&self) -> Duration {
        Duration::from_millis(self.discover_interval_ms)
    }

    /// Validates the configuration.
    ///
    /// The TTL must be larger than the broadcast interval, otherwise every
    /// server would expire between two requests.
    pub fn validate(&self) -> Result<(), String> {
        if self.discover_interval_ms == 0 {
            return Err("discover_interval_ms cannot be 0".to_string());
        }

        if self.discovered_ttl_ms <= self.discover_interval_ms {
            return Err(format!(
                "discovered_ttl_ms ({}) must be larger than discover_interval_ms ({})",
                self.discovered_ttl_ms, self.discover_interval_ms
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.broadcast_address.to_string(), "255.255.255.255");
        assert_eq!(config.discovered_ttl(), Duration::from_secs(60));
        assert_eq!(config.discover_interval(), Duration::from_secs(30));
    }

    #[test]
    fn ttl_not_larger_than_interval_is_rejected() {
        let config = DiscoveryConfig {
            discovered_ttl_ms: 1_000,
            discover_interval_ms: 2_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DiscoveryConfig {
            discovered_ttl_ms: 2_000,
            discover_interval_ms: 2_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = DiscoveryConfig {
            discover_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: DiscoveryConfig =
            serde_json::from_str(r#"{"discovered_ttl_ms": 40000}"#).unwrap();
        assert_eq!(config.discovered_ttl_ms, 40_000);
        assert_eq!(config.discover_interval_ms, 30_000);
        assert_eq!(config.broadcast_address.to_string(), "255.255.255.255");
    }
}
