//! Discovery service lifecycle and public API.

use async_channel::{Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::DiscoveryConfig;
use crate::debug::{DebugCallback, DebugSink};
use crate::error::{DiscoveryError, Result};
use crate::protocol::{self, DISCOVERY_PORT};
use crate::registry::{Registry, RegistryMsg, CHANNEL_CAPACITY};
use crate::transport::BroadcastTransport;
use crate::types::{DiscoveryEvent, ServerInfo, ServiceStatus};

/// Capacity of the subscriber event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Receive buffer; discovery responses are far smaller than this.
const RECV_BUFFER_SIZE: usize = 2048;

/// Discovers LMS instances on the local network and tracks their presence.
///
/// One instance owns its socket, timers and probe connections outright;
/// nothing is shared process-wide. The service is restartable: `start`
/// after `stop` builds fresh tasks and channels.
pub struct DiscoveryService {
    running: AtomicBool,
    servers: Arc<DashMap<IpAddr, ServerInfo>>,
    event_tx: Sender<DiscoveryEvent>,
    event_rx: Receiver<DiscoveryEvent>,
    debug: Arc<DebugSink>,
    tasks: Mutex<Option<ServiceTasks>>,
}

struct ServiceTasks {
    scheduler: Option<JoinHandle<()>>,
    receiver: Option<JoinHandle<()>>,
    reconciler: JoinHandle<()>,
    msg_tx: mpsc::Sender<RegistryMsg>,
    local_addr: Option<SocketAddr>,
}

impl DiscoveryService {
    /// Creates a stopped service. No sockets are opened until `start`.
    pub fn new() -> Self {
        let (event_tx, event_rx) = async_channel::bounded(EVENT_CHANNEL_CAPACITY);
        Self {
            running: AtomicBool::new(false),
            servers: Arc::new(DashMap::new()),
            event_tx,
            event_rx,
            debug: Arc::new(DebugSink::default()),
            tasks: Mutex::new(None),
        }
    }

    /// Starts the discovery service.
    ///
    /// Fails fast with [`DiscoveryError::AlreadyStarted`] when running and
    /// with [`DiscoveryError::InvalidConfig`] before any socket is opened
    /// when the configuration is invalid. A socket bind failure is a
    /// runtime condition, not a start failure: it surfaces as a
    /// [`DiscoveryEvent::Error`] and the service keeps running.
    pub async fn start(&self, config: DiscoveryConfig) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            self.debug
                .trace("start() called while the service is already running");
            return Err(DiscoveryError::AlreadyStarted);
        }

        if let Err(reason) = config.validate() {
            self.running.store(false, Ordering::SeqCst);
            self.debug.trace(&format!("invalid configuration: {reason}"));
            return Err(DiscoveryError::InvalidConfig(reason));
        }

        self.debug
            .trace(&format!("starting discovery service with {config:?}"));

        let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let registry = Registry::new(
            config.clone(),
            self.servers.clone(),
            self.event_tx.clone(),
            msg_tx.clone(),
            self.debug.clone(),
        );
        let reconciler = tokio::spawn(registry.run(msg_rx));

        let transport = match BroadcastTransport::open() {
            Ok(transport) => Some(transport),
            Err(e) => {
                warn!(error = %e, "failed to open discovery socket");
                self.debug.trace(&format!("socket error: {e}"));
                self.emit_error(format!("failed to open discovery socket: {e}"));
                None
            }
        };

        let mut local_addr = None;
        let mut receiver = None;
        let mut scheduler = None;

        if let Some(transport) = transport {
            local_addr = transport.local_addr().ok();
            receiver = Some(self.spawn_receiver(transport.clone(), msg_tx.clone()));
            scheduler = Some(self.spawn_scheduler(transport, &config));
        }

        *self.tasks.lock() = Some(ServiceTasks {
            scheduler,
            receiver,
            reconciler,
            msg_tx,
            local_addr,
        });

        info!("discovery service started");
        self.debug.trace("service started");
        Ok(())
    }

    /// Stops the discovery service. A silent no-op when already stopped.
    ///
    /// All timers are cancelled, every CLI connection is detached from its
    /// close notification before it drops, the socket is released and the
    /// registry cleared. No events fire after this returns.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            self.debug.trace("stop(): service already stopped");
            return;
        }
        self.debug.trace("stopping discovery service...");

        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            if let Some(handle) = tasks.scheduler {
                handle.abort();
            }
            if let Some(handle) = tasks.receiver {
                handle.abort();
            }
            // The reconciler tears down every timer and probe before it
            // exits; awaiting it guarantees nothing fires afterwards.
            let _ = tasks.msg_tx.send(RegistryMsg::Shutdown).await;
            let _ = tasks.reconciler.await;
        }

        info!("discovery service stopped");
        self.debug.trace("service stopped");
    }

    /// Returns the status of the discovery service.
    pub fn status(&self) -> ServiceStatus {
        if self.is_running() {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        }
    }

    /// Returns whether the service is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of all currently-known servers.
    pub fn get_all_discovered(&self) -> Vec<ServerInfo> {
        self.servers.iter().map(|e| e.value().clone()).collect()
    }

    /// Returns a receiver for discovery events.
    ///
    /// Events are delivered in reconciliation order; in particular the
    /// `Lost` for a replaced server always precedes its `Discovered`.
    /// Receivers compete for events, so hand each consumer its own clone
    /// only if they are meant to share the stream.
    pub fn events(&self) -> Receiver<DiscoveryEvent> {
        self.event_rx.clone()
    }

    /// Routes internal trace lines to `callback` in addition to `tracing`.
    pub fn set_debug(&self, enabled: bool, callback: Option<DebugCallback>) {
        self.debug.configure(enabled, callback);
    }

    /// Local address of the discovery socket while running, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.tasks.lock().as_ref().and_then(|t| t.local_addr)
    }

    /// Delivers inbound datagrams, one at a time and in arrival order, to
    /// the decode-and-reconcile path.
    fn spawn_receiver(
        &self,
        transport: BroadcastTransport,
        msg_tx: mpsc::Sender<RegistryMsg>,
    ) -> JoinHandle<()> {
        let debug = self.debug.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            loop {
                match transport.recv_from(&mut buf).await {
                    Ok((len, from)) => {
                        debug.trace(&format!("datagram received from {}", from.ip()));
                        match protocol::decode_response(&buf[..len], from.ip()) {
                            Some(info) => {
                                if msg_tx.send(RegistryMsg::Response(info)).await.is_err() {
                                    break;
                                }
                            }
                            // Malformed or foreign datagrams are discarded
                            // silently, debug trace only.
                            None => debug.trace("datagram ignored: not a discovery response"),
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "discovery socket receive error");
                        debug.trace(&format!("socket receive error: {e}"));
                        let _ = event_tx.try_send(DiscoveryEvent::Error {
                            message: format!("socket receive error: {e}"),
                        });
                    }
                }
            }
        })
    }

    /// Broadcasts a discovery request immediately and then on every
    /// interval tick until stopped. Each firing is independent.
    fn spawn_scheduler(
        &self,
        transport: BroadcastTransport,
        config: &DiscoveryConfig,
    ) -> JoinHandle<()> {
        let debug = self.debug.clone();
        let event_tx = self.event_tx.clone();
        let broadcast_addr = config.broadcast_address;
        let interval = config.discover_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                debug.trace(&format!(
                    "sending discovery request to {broadcast_addr}:{DISCOVERY_PORT}"
                ));
                if let Err(e) = transport.send_request(broadcast_addr).await {
                    warn!(error = %e, "failed to send discovery request");
                    debug.trace(&format!("error sending discovery request: {e}"));
                    let _ = event_tx.try_send(DiscoveryEvent::Error {
                        message: format!("failed to send discovery request: {e}"),
                    });
                }
            }
        })
    }

    fn emit_error(&self, message: String) {
        if let Err(e) = self.event_tx.try_send(DiscoveryEvent::Error { message }) {
            warn!(error = %e, "failed to deliver discovery event");
        }
    }
}

impl Default for DiscoveryService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("discovery service dropped while still running");
        }
    }
}
