//! Accepts and dials TCP connections, running the handshake and registering
//! each resulting peer before handing it off to its own frame-reader task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::p2p::frame::Rpc;
use crate::p2p::handshake;
use crate::p2p::peer::Peer;
use crate::p2p::registry::PeerRegistry;

#[derive(Debug, Clone)]
pub struct TcpTransport {
    listen_addr: SocketAddr,
}

impl TcpTransport {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self { listen_addr }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Binds the listening socket. Split out from [`TcpTransport::serve`] so
    /// a caller can surface a bind failure (address in use, permission
    /// denied, ...) synchronously, before handing the accept loop off to a
    /// background task.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening for peers");
        Ok(listener)
    }

    /// Runs the accept loop on an already-bound `listener` until
    /// `cancellation_token` fires. Each accepted connection is handshaken,
    /// registered, and handed its own frame-reader task forwarding decoded
    /// frames onto `rpc_tx`.
    pub async fn serve(
        &self,
        listener: TcpListener,
        registry: Arc<PeerRegistry>,
        rpc_tx: mpsc::Sender<Rpc>,
        cancellation_token: CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, remote_addr) = accepted?;
                    let registry = registry.clone();
                    let rpc_tx = rpc_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = accept_peer(socket, remote_addr, registry, rpc_tx).await {
                            tracing::warn!(%remote_addr, error = %e, "dropping inbound peer");
                        }
                    });
                }
                _ = cancellation_token.cancelled() => {
                    tracing::debug!("transport accept loop shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Dials a remote node, performs the handshake, and runs its frame
    /// reader on the calling task -- callers that want this to run in the
    /// background should `tokio::spawn` the call themselves.
    pub async fn dial(
        &self,
        addr: SocketAddr,
        registry: Arc<PeerRegistry>,
        rpc_tx: mpsc::Sender<Rpc>,
    ) -> anyhow::Result<()> {
        let socket = TcpStream::connect(addr).await?;
        accept_peer(socket, addr, registry, rpc_tx).await
    }
}

async fn accept_peer(
    mut socket: TcpStream,
    remote_addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    rpc_tx: mpsc::Sender<Rpc>,
) -> anyhow::Result<()> {
    handshake::perform(&mut socket).await?;
    let (read_half, write_half) = socket.into_split();
    let peer = Peer::new(remote_addr, read_half, write_half);
    registry.insert(peer.addr_key(), peer.clone());
    tracing::debug!(%remote_addr, "peer connected");
    peer.run_frame_reader(rpc_tx).await;
    registry.remove(&remote_addr.to_string());
    tracing::debug!(%remote_addr, "peer disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn dial_and_listen_register_each_other_and_exchange_a_message() {
        let registry_a = Arc::new(PeerRegistry::new());
        let registry_b = Arc::new(PeerRegistry::new());
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let token = CancellationToken::new();

        let transport_b = TcpTransport::new("127.0.0.1:0".parse().unwrap());
        let listener = transport_b.bind().await.unwrap();
        let bound = listener.local_addr().unwrap();

        let listen_token = token.clone();
        let registry_b_clone = registry_b.clone();
        let listen_task = tokio::spawn(async move {
            transport_b
                .serve(listener, registry_b_clone, tx_b, listen_token)
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;

        let transport_a = TcpTransport::new("127.0.0.1:0".parse().unwrap());
        let dial_registry = registry_a.clone();
        let _dial_task = tokio::spawn(async move {
            let _ = transport_a.dial(bound, dial_registry, tx_a).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry_a.len(), 1);
        assert_eq!(registry_b.len(), 1);

        let a_side_peer = registry_a.snapshot().remove(0);
        a_side_peer.send_message(b"hello-b").await.unwrap();
        let rpc = rx_b.recv().await.unwrap();
        assert_eq!(rpc.payload, b"hello-b");

        token.cancel();
        let _ = listen_task.await;
        let _ = rx_a.try_recv();
    }
}
