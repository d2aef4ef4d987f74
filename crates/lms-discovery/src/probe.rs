//! CLI liveness probe.
//!
//! Servers that advertise a CLI port get an out-of-band TCP connection to
//! it. The connection closing signals the server's departure immediately,
//! without waiting out the discovery TTL. Both halves run as detached tasks
//! that rendezvous back into the registry's reconciliation channel; only
//! the connect itself ever blocks, and never the datagram path.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use crate::registry::RegistryMsg;

/// Bound on how long a CLI connection attempt may take.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Spawns a bounded connect attempt to `(addr, port)`.
///
/// The outcome rendezvouses into the reconciliation channel as
/// `ProbeConnected` (carrying the stream) or `ProbeFailed`. Failure is
/// silent fallback territory, never an `error` event.
pub(crate) fn spawn_connect(
    addr: IpAddr,
    port: u16,
    generation: u64,
    tx: mpsc::Sender<RegistryMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let target = SocketAddr::new(addr, port);
        let msg = match timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                debug!(%target, "CLI connection established");
                RegistryMsg::ProbeConnected {
                    addr,
                    generation,
                    stream,
                }
            }
            Ok(Err(e)) => {
                debug!(%target, error = %e, "CLI connection failed");
                RegistryMsg::ProbeFailed { addr, generation }
            }
            Err(_) => {
                debug!(%target, "CLI connection attempt timed out");
                RegistryMsg::ProbeFailed { addr, generation }
            }
        };
        let _ = tx.send(msg).await;
    })
}

/// Monitors an attached CLI connection and reports `ProbeClosed` exactly
/// once when it drops for any reason.
///
/// Unsolicited CLI output is read and discarded. Aborting this task before
/// the stream drops detaches the close notification; deliberate shutdown
/// relies on that to avoid spurious `lost` emissions.
pub(crate) fn spawn_monitor(
    mut stream: TcpStream,
    addr: IpAddr,
    generation: u64,
    tx: mpsc::Sender<RegistryMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(%addr, error = %e, "CLI connection read error");
                    break;
                }
            }
        }
        let _ = tx.send(RegistryMsg::ProbeClosed { addr, generation }).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn connect_reports_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::channel(8);

        spawn_connect(LOCALHOST, port, 7, tx);
        let _server_side = listener.accept().await.unwrap();

        match rx.recv().await.unwrap() {
            RegistryMsg::ProbeConnected {
                addr, generation, ..
            } => {
                assert_eq!(addr, LOCALHOST);
                assert_eq!(generation, 7);
            }
            _ => panic!("expected ProbeConnected"),
        }
    }

    #[tokio::test]
    async fn connect_to_closed_port_reports_failed() {
        // Bind then drop to get a port with nothing listening on it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = mpsc::channel(8);
        spawn_connect(LOCALHOST, port, 3, tx);

        match rx.recv().await.unwrap() {
            RegistryMsg::ProbeFailed { addr, generation } => {
                assert_eq!(addr, LOCALHOST);
                assert_eq!(generation, 3);
            }
            _ => panic!("expected ProbeFailed"),
        }
    }

    #[tokio::test]
    async fn monitor_discards_chatter_and_reports_close_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (mut server_side, _) = listener.accept().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        spawn_monitor(client, LOCALHOST, 9, tx);

        // Server chatter must not trigger anything.
        server_side.write_all(b"listen 1\n").await.unwrap();
        server_side.shutdown().await.unwrap();
        drop(server_side);

        match rx.recv().await.unwrap() {
            RegistryMsg::ProbeClosed { addr, generation } => {
                assert_eq!(addr, LOCALHOST);
                assert_eq!(generation, 9);
            }
            _ => panic!("expected ProbeClosed"),
        }
        assert!(rx.recv().await.is_none());
    }
}
