//! Watches the local network for LMS instances and prints events.
//!
//! Run with `RUST_LOG=lms_discovery=debug` to see internal traces.

use lms_discovery::{DiscoveryConfig, DiscoveryEvent, DiscoveryService};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let service = Arc::new(DiscoveryService::new());
    let events = service.events();

    let config = DiscoveryConfig {
        discovered_ttl_ms: 40_000,
        ..Default::default()
    };
    service.start(config).await?;

    let counter = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                println!(
                    "servers discovered so far: {}",
                    service.get_all_discovered().len()
                );
            }
        })
    };

    loop {
        tokio::select! {
            event = events.recv() => match event? {
                DiscoveryEvent::Discovered(server) => println!("discovered: {server}"),
                DiscoveryEvent::Lost(server) => println!("lost: {server}"),
                DiscoveryEvent::Error { message } => eprintln!("error: {message}"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    counter.abort();
    service.stop().await;
    println!("discovery service stopped");
    Ok(())
}
