//! LAN discovery of Lyrion Music Server (LMS, formerly Logitech Media
//! Server / Squeezebox Server) instances.
//!
//! Broadcasts SlimProto discovery requests over UDP port 3483, decodes the
//! TLV responses and maintains a live registry of reachable servers:
//!
//! 1. A scheduler re-broadcasts the discovery request at a fixed interval.
//! 2. Each response is decoded into a [`ServerInfo`] and reconciled against
//!    the registry on a single serialized path.
//! 3. Servers without a CLI port expire after a TTL of silence; servers
//!    advertising one get an out-of-band CLI connection whose close reports
//!    their departure immediately.
//! 4. Subscribers are notified of `discovered`, `lost` and `error` events
//!    in reconciliation order.
//!
//! # Example
//!
//! ```no_run
//! use lms_discovery::{DiscoveryConfig, DiscoveryService};
//!
//! #[tokio::main]
//! async fn main() -> lms_discovery::Result<()> {
//!     let service = DiscoveryService::new();
//!     let events = service.events();
//!
//!     service.start(DiscoveryConfig::default()).await?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod service;
pub mod types;

mod debug;
mod probe;
mod registry;
mod transport;

pub use config::DiscoveryConfig;
pub use debug::DebugCallback;
pub use error::{DiscoveryError, Result};
pub use protocol::DISCOVERY_PORT;
pub use service::DiscoveryService;
pub use types::{DiscoveryEvent, ServerInfo, ServiceStatus};
