//! Presence registry and reconciliation.
//!
//! A single task owns all registry state and consumes every input — decoded
//! responses, TTL expiries, probe outcomes, shutdown — from one channel, so
//! no two reconciliations ever run concurrently and the registry needs no
//! locking. Timer tasks and probe tasks feed their outcomes back into the
//! same channel; a per-entry generation counter discards anything that
//! fires after the entry it belonged to was re-armed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::DiscoveryConfig;
use crate::debug::DebugSink;
use crate::probe;
use crate::types::{DiscoveryEvent, ServerInfo};

/// Capacity of the reconciliation input channel.
pub(crate) const CHANNEL_CAPACITY: usize = 256;

/// Inputs serialized onto the reconciliation path.
pub(crate) enum RegistryMsg {
    /// A decoded discovery response arrived.
    Response(ServerInfo),
    /// A TTL timer fired for `addr`.
    Expired { addr: IpAddr, generation: u64 },
    /// A CLI connection attempt succeeded.
    ProbeConnected {
        addr: IpAddr,
        generation: u64,
        stream: TcpStream,
    },
    /// A CLI connection attempt failed or timed out.
    ProbeFailed { addr: IpAddr, generation: u64 },
    /// An attached CLI connection dropped.
    ProbeClosed { addr: IpAddr, generation: u64 },
    /// Tear down all timers and probes and exit the reconciler.
    Shutdown,
}

/// Expiry mechanism attached to a registry entry. Exactly one is active per
/// entry; the pending state is bounded by the probe connect timeout.
enum Expiry {
    /// TTL timer task; sends `Expired` unless aborted first.
    Timer(JoinHandle<()>),
    /// CLI connect attempt in flight; no timer runs while it is pending.
    ProbePending,
    /// CLI connection attached; the monitor task sends `ProbeClosed`.
    Probe(JoinHandle<()>),
}

struct Entry {
    info: ServerInfo,
    expiry: Expiry,
    generation: u64,
    last_seen_at: DateTime<Utc>,
}

/// The reconciler: sole owner and sole mutator of registry state.
pub(crate) struct Registry {
    entries: HashMap<IpAddr, Entry>,
    /// Snapshot mirror read by `get_all_discovered()`.
    mirror: Arc<DashMap<IpAddr, ServerInfo>>,
    event_tx: async_channel::Sender<DiscoveryEvent>,
    /// Loopback sender handed to timer and probe tasks.
    msg_tx: mpsc::Sender<RegistryMsg>,
    config: DiscoveryConfig,
    debug: Arc<DebugSink>,
    next_generation: u64,
}

impl Registry {
    pub fn new(
        config: DiscoveryConfig,
        mirror: Arc<DashMap<IpAddr, ServerInfo>>,
        event_tx: async_channel::Sender<DiscoveryEvent>,
        msg_tx: mpsc::Sender<RegistryMsg>,
        debug: Arc<DebugSink>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            mirror,
            event_tx,
            msg_tx,
            config,
            debug,
            next_generation: 0,
        }
    }

    /// Runs the reconciler until `Shutdown` arrives or every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<RegistryMsg>) {
        while let Some(msg) = rx.recv().await {
            if !self.handle(msg) {
                break;
            }
        }
        self.teardown();
    }

    /// Applies one input; returns `false` on shutdown.
    fn handle(&mut self, msg: RegistryMsg) -> bool {
        match msg {
            RegistryMsg::Response(info) => self.reconcile(info),
            RegistryMsg::Expired { addr, generation } => self.expire(addr, generation),
            RegistryMsg::ProbeConnected {
                addr,
                generation,
                stream,
            } => self.attach_probe(addr, generation, stream),
            RegistryMsg::ProbeFailed { addr, generation } => self.probe_failed(addr, generation),
            RegistryMsg::ProbeClosed { addr, generation } => self.probe_closed(addr, generation),
            RegistryMsg::Shutdown => return false,
        }
        true
    }

    /// Reconciles a decoded response against the registry.
    fn reconcile(&mut self, info: ServerInfo) {
        let addr = info.address;

        // Find the prior identity. The address is the primary key; a known
        // server answering from a new address is tied back through its
        // unique id, and the stale entry at the old address is replaced
        // outright (its timer or probe cancelled).
        let mut kept_probe = None;
        let mut prior_info = None;
        let mut prior_seen: Option<DateTime<Utc>> = None;

        if let Some(entry) = self.entries.remove(&addr) {
            prior_info = Some(entry.info);
            prior_seen = Some(entry.last_seen_at);
            match entry.expiry {
                // A second datagram must never spawn a duplicate connection:
                // an attached or in-flight probe is carried over unchanged.
                Expiry::Timer(handle) => handle.abort(),
                kept => kept_probe = Some((kept, entry.generation)),
            }
        } else if let Some(moved_addr) = self
            .entries
            .iter()
            .find(|(_, e)| e.info.unique_id == info.unique_id)
            .map(|(a, _)| *a)
        {
            if let Some(entry) = self.entries.remove(&moved_addr) {
                self.mirror.remove(&moved_addr);
                Self::cancel(entry.expiry);
                self.debug.trace(&format!(
                    "server {} moved from {moved_addr} to {addr}",
                    entry.info.name
                ));
                prior_info = Some(entry.info);
            }
        }

        let (expiry, generation) = match kept_probe {
            Some(kept) => kept,
            None => self.arm(&info),
        };

        self.entries.insert(
            addr,
            Entry {
                info: info.clone(),
                expiry,
                generation,
                last_seen_at: Utc::now(),
            },
        );
        self.mirror.insert(addr, info.clone());

        match prior_info {
            None => {
                self.debug
                    .trace(&format!("newly-discovered server: {info}"));
                self.emit(DiscoveryEvent::Discovered(info));
            }
            Some(prior) if prior == info => {
                let age = prior_seen
                    .map(|seen| (Utc::now() - seen).num_milliseconds())
                    .unwrap_or_default();
                self.debug
                    .trace(&format!("{info} refreshed (last seen {age}ms ago)"));
            }
            Some(prior) => {
                self.debug
                    .trace(&format!("{info} changed; emitting lost + discovered"));
                self.emit(DiscoveryEvent::Lost(prior));
                self.emit(DiscoveryEvent::Discovered(info));
            }
        }
    }

    /// Picks the expiry mechanism for a fresh or re-armed entry.
    fn arm(&mut self, info: &ServerInfo) -> (Expiry, u64) {
        self.next_generation += 1;
        let generation = self.next_generation;
        match info.control_channel_port {
            Some(port) => {
                probe::spawn_connect(info.address, port, generation, self.msg_tx.clone());
                (Expiry::ProbePending, generation)
            }
            None => (self.spawn_timer(info.address, generation), generation),
        }
    }

    fn spawn_timer(&self, addr: IpAddr, generation: u64) -> Expiry {
        let ttl = self.config.discovered_ttl();
        let tx = self.msg_tx.clone();
        Expiry::Timer(tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = tx.send(RegistryMsg::Expired { addr, generation }).await;
        }))
    }

    fn cancel(expiry: Expiry) {
        match expiry {
            Expiry::Timer(handle) | Expiry::Probe(handle) => handle.abort(),
            // The connect outcome carries a stale generation and is ignored
            // when it rendezvouses; a connected stream is dropped there.
            Expiry::ProbePending => {}
        }
    }

    fn expire(&mut self, addr: IpAddr, generation: u64) {
        let current = self.entries.get(&addr).map(|e| e.generation);
        if current != Some(generation) {
            return; // re-armed since this timer was set
        }
        if let Some(entry) = self.entries.remove(&addr) {
            self.mirror.remove(&addr);
            self.debug
                .trace(&format!("server lost, TTL expired: {}", entry.info));
            self.emit(DiscoveryEvent::Lost(entry.info));
        }
    }

    fn attach_probe(&mut self, addr: IpAddr, generation: u64, stream: TcpStream) {
        let matches = self
            .entries
            .get(&addr)
            .is_some_and(|e| e.generation == generation && matches!(e.expiry, Expiry::ProbePending));
        if !matches {
            // Entry superseded while connecting; dropping the stream closes it.
            return;
        }
        let monitor = probe::spawn_monitor(stream, addr, generation, self.msg_tx.clone());
        if let Some(entry) = self.entries.get_mut(&addr) {
            self.debug.trace(&format!(
                "CLI connection attached for {}; TTL suppressed",
                entry.info
            ));
            entry.expiry = Expiry::Probe(monitor);
        }
    }

    fn probe_failed(&mut self, addr: IpAddr, generation: u64) {
        let matches = self
            .entries
            .get(&addr)
            .is_some_and(|e| e.generation == generation && matches!(e.expiry, Expiry::ProbePending));
        if !matches {
            return;
        }
        // Fall back to the standard TTL expiry for this entry.
        let timer = self.spawn_timer(addr, generation);
        if let Some(entry) = self.entries.get_mut(&addr) {
            self.debug.trace(&format!(
                "CLI connection failed for {}; falling back to TTL",
                entry.info
            ));
            entry.expiry = timer;
        }
    }

    fn probe_closed(&mut self, addr: IpAddr, generation: u64) {
        let current = self.entries.get(&addr).map(|e| e.generation);
        if current != Some(generation) {
            return;
        }
        if let Some(entry) = self.entries.remove(&addr) {
            self.mirror.remove(&addr);
            self.debug
                .trace(&format!("server lost, CLI connection dropped: {}", entry.info));
            self.emit(DiscoveryEvent::Lost(entry.info));
        }
    }

    /// Aborts every timer and probe monitor before dropping the state, so
    /// nothing fires after shutdown. Aborting a monitor detaches its close
    /// notification before its stream drops.
    fn teardown(&mut self) {
        for (_, entry) in self.entries.drain() {
            Self::cancel(entry.expiry);
        }
        self.mirror.clear();
        self.debug.trace("registry cleared");
    }

    fn emit(&self, event: DiscoveryEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!(error = %e, "failed to deliver discovery event");
        }
    }
}
