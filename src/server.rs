//! The node: owns the local store and peer registry, dispatches inbound
//! control messages, and exposes the store/get/delete client API that
//! fans each operation out to the connected peer set.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ctr::cipher::StreamCipher;
use rand::RngCore;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::NodeConfig;
use crate::crypto;
use crate::error::NodeError;
use crate::p2p::{ControlMessage, Peer, PeerRegistry, Rpc, TcpTransport};
use crate::store::{PathKey, PathTransform, Store};

/// How long [`Node::get`] waits for any single peer to start replying
/// before moving on to the next one. Bounds what would otherwise be an
/// unbounded wait on a peer that doesn't have the file.
const FETCH_PEER_TIMEOUT: Duration = Duration::from_millis(1500);
/// Gives peers a moment to process a `StoreFile`/`GetFile` broadcast and
/// register it before the stream phase begins, in place of an explicit ack.
const STORE_SETTLE_DELAY: Duration = Duration::from_millis(25);
const FETCH_SETTLE_DELAY: Duration = Duration::from_millis(150);

pub struct Node {
    pub id: String,
    enc_key: [u8; crypto::KEY_LEN],
    path_transform: PathTransform,
    store: Store,
    registry: Arc<PeerRegistry>,
    transport: TcpTransport,
    bootstrap_nodes: Vec<SocketAddr>,
    rpc_tx: mpsc::Sender<Rpc>,
    rpc_rx: AsyncMutex<Option<mpsc::Receiver<Rpc>>>,
    cancellation_token: CancellationToken,
    tasks: TaskTracker,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        config.validate()?;
        let id = config.node_id.clone().unwrap_or_else(crate::config::generate_node_id);
        let (rpc_tx, rpc_rx) = mpsc::channel(1024);
        Ok(Arc::new(Self {
            id,
            enc_key: config.encryption_key,
            path_transform: config.path_transform,
            store: Store::new(config.storage_root.clone(), config.path_transform),
            registry: Arc::new(PeerRegistry::new()),
            transport: TcpTransport::new(config.listen_addr),
            bootstrap_nodes: config.bootstrap_nodes.clone(),
            rpc_tx,
            rpc_rx: AsyncMutex::new(Some(rpc_rx)),
            cancellation_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }))
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.transport.listen_addr()
    }

    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Binds the listener, dials every configured bootstrap node, and runs
    /// the dispatch loop. Returns once `shutdown` is called and both
    /// background tasks have wound down. A bind failure (address already in
    /// use, permission denied, ...) is fatal and returned directly, before
    /// anything is spawned.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let listener = self.transport.bind().await?;

        let registry = self.registry.clone();
        let rpc_tx = self.rpc_tx.clone();
        let transport = self.transport.clone();
        let cancellation_token = self.cancellation_token.clone();
        self.tasks.spawn(async move {
            if let Err(e) = transport.serve(listener, registry, rpc_tx, cancellation_token).await {
                tracing::error!(error = %e, "transport accept loop failed");
            }
        });

        self.bootstrap();

        let this = self.clone();
        self.tasks.spawn(async move {
            this.dispatch_loop().await;
        });

        self.tasks.close();
        self.tasks.wait().await;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    fn bootstrap(self: &Arc<Self>) {
        for addr in self.bootstrap_nodes.clone() {
            let transport = self.transport.clone();
            let registry = self.registry.clone();
            let rpc_tx = self.rpc_tx.clone();
            self.tasks.spawn(async move {
                if let Err(e) = transport.dial(addr, registry, rpc_tx).await {
                    tracing::warn!(%addr, error = %e, "failed to dial bootstrap node");
                }
            });
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let mut rx = match self.rpc_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                tracing::warn!("dispatch loop already running, refusing to start a second one");
                return;
            }
        };
        loop {
            tokio::select! {
                maybe_rpc = rx.recv() => {
                    let Some(rpc) = maybe_rpc else { break };
                    self.handle_rpc(rpc).await;
                }
                _ = self.cancellation_token.cancelled() => {
                    tracing::debug!("dispatch loop shutting down");
                    break;
                }
            }
        }
    }

    async fn handle_rpc(&self, rpc: Rpc) {
        if rpc.is_stream {
            tracing::trace!(from = %rpc.from, "stream marker observed with no pending handler, ignoring");
            return;
        }
        let msg = match ControlMessage::decode(&rpc.payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(from = %rpc.from, error = %e, "decoding error");
                return;
            }
        };
        let result = match msg {
            ControlMessage::StoreFile { owner_id, hashed_key, size } => {
                self.handle_store_file(&rpc.from, owner_id, hashed_key, size).await
            }
            ControlMessage::GetFile { owner_id, hashed_key } => {
                self.handle_get_file(&rpc.from, owner_id, hashed_key).await
            }
            ControlMessage::DeleteFile { owner_id, hashed_key } => {
                self.handle_delete_file(owner_id, hashed_key).await
            }
        };
        if let Err(e) = result {
            tracing::warn!(from = %rpc.from, error = %e, "handler error");
        }
    }

    async fn handle_store_file(
        &self,
        from: &str,
        owner_id: String,
        hashed_key: String,
        size: u64,
    ) -> anyhow::Result<()> {
        let peer = self
            .registry
            .get(from)
            .ok_or_else(|| NodeError::unknown_peer(format!("no registered peer for {from}")))?;
        let path_key = PathKey::from_cas_hex(&hashed_key);
        let mut file = self.store.open_for_writing_at(&owner_id, &path_key).await?;
        let n = peer.read_stream_exact(size, &mut file).await?;
        file.flush().await?;
        peer.close_stream();
        tracing::info!(bytes = n, %owner_id, %hashed_key, "stored file received from peer");
        Ok(())
    }

    async fn handle_get_file(&self, from: &str, owner_id: String, hashed_key: String) -> anyhow::Result<()> {
        let peer = self
            .registry
            .get(from)
            .ok_or_else(|| NodeError::unknown_peer(format!("no registered peer for {from}")))?;
        let path_key = PathKey::from_cas_hex(&hashed_key);
        if !self.store.has_at(&owner_id, &path_key).await {
            tracing::debug!(%owner_id, %hashed_key, "asked for a file we don't have, ignoring");
            return Ok(());
        }
        let (size, mut file) = self.store.read_at(&owner_id, &path_key).await?;
        peer.send_stream_marker().await?;
        peer.write_raw(&size.to_le_bytes()).await?;
        let mut buf = vec![0u8; 32 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            peer.write_raw(&buf[..n]).await?;
        }
        tracing::info!(bytes = size, %owner_id, %hashed_key, "served file to peer");
        Ok(())
    }

    async fn handle_delete_file(&self, owner_id: String, hashed_key: String) -> anyhow::Result<()> {
        let path_key = PathKey::from_cas_hex(&hashed_key);
        self.store.delete_at(&owner_id, &path_key, &hashed_key).await?;
        tracing::info!(%owner_id, %hashed_key, "deleted file on behalf of peer broadcast");
        Ok(())
    }

    /// Broadcasts `msg` to every currently connected peer. Failures on
    /// individual peers are logged and do not abort the broadcast.
    async fn broadcast(&self, msg: &ControlMessage) -> anyhow::Result<()> {
        let payload = msg.encode()?;
        for peer in self.registry.snapshot() {
            if let Err(e) = peer.send_message(&payload).await {
                tracing::warn!(peer = %peer.remote_addr, error = %e, "failed to broadcast control message");
            }
        }
        Ok(())
    }

    /// Stores `key` locally, then replicates it to every connected peer:
    /// tee the incoming plaintext into memory while writing it to the
    /// local store, broadcast a `StoreFile` announcement, then encrypt the
    /// buffered plaintext once and fan the ciphertext out to every peer.
    pub async fn store<R>(self: &Arc<Self>, key: &[u8], mut reader: R) -> anyhow::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await?;

        let written = self.store.write(&self.id, key, Cursor::new(&buffer)).await?;
        tracing::debug!(bytes = written, "wrote file to local disk");

        let peers = self.registry.snapshot();
        if peers.is_empty() {
            return Ok(written);
        }

        let hashed_key = self.path_transform.derive(key).filename;
        let announced_size = written + crypto::BLOCK_SIZE as u64;
        self.broadcast(&ControlMessage::StoreFile {
            owner_id: self.id.clone(),
            hashed_key,
            size: announced_size,
        })
        .await?;

        tokio::time::sleep(STORE_SETTLE_DELAY).await;

        for peer in &peers {
            peer.send_stream_marker().await?;
        }
        let fanned = self.encrypt_to_peers(&buffer, &peers).await?;
        tracing::info!(bytes = fanned, peers = peers.len(), "replicated file to peers");

        Ok(written)
    }

    async fn encrypt_to_peers(&self, plaintext: &[u8], peers: &[Arc<Peer>]) -> anyhow::Result<u64> {
        let mut iv = [0u8; crypto::BLOCK_SIZE];
        rand::rng().fill_bytes(&mut iv);
        for peer in peers {
            peer.write_raw(&iv).await?;
        }

        let mut cipher = crypto::new_cipher(&self.enc_key, &iv)?;
        let mut written = crypto::BLOCK_SIZE as u64;
        for chunk in plaintext.chunks(32 * 1024) {
            let mut buf = chunk.to_vec();
            cipher.apply_keystream(&mut buf);
            for peer in peers {
                peer.write_raw(&buf).await?;
            }
            written += buf.len() as u64;
        }
        Ok(written)
    }

    /// Reads `key`, serving it from the local store if present, otherwise
    /// broadcasting a `GetFile` request and taking whichever connected peer
    /// answers first.
    pub async fn get(self: &Arc<Self>, key: &[u8]) -> anyhow::Result<(u64, fs::File)> {
        if self.store.has(&self.id, key).await {
            tracing::info!("serving file from local disk");
            return Ok(self.store.read(&self.id, key).await?);
        }

        tracing::info!("file not present locally, asking connected peers");
        let hashed_key = self.path_transform.derive(key).filename;
        self.broadcast(&ControlMessage::GetFile {
            owner_id: self.id.clone(),
            hashed_key,
        })
        .await?;

        tokio::time::sleep(FETCH_SETTLE_DELAY).await;

        for peer in self.registry.snapshot() {
            let mut file = self.store.open_for_writing(&self.id, key).await?;
            let attempt = tokio::time::timeout(
                FETCH_PEER_TIMEOUT,
                peer.read_stream_decrypt(&self.enc_key, &mut file),
            )
            .await;
            match attempt {
                Ok(Ok((_, n))) => {
                    file.flush().await?;
                    peer.close_stream();
                    tracing::info!(bytes = n, peer = %peer.remote_addr, "received file over the network");
                    return Ok(self.store.read(&self.id, key).await?);
                }
                Ok(Err(e)) => {
                    tracing::debug!(peer = %peer.remote_addr, error = %e, "peer did not serve the file");
                }
                Err(_) => {
                    tracing::debug!(peer = %peer.remote_addr, "peer timed out responding to fetch");
                }
            }
        }

        Err(NodeError::not_found(format!(
            "no peer served key {}",
            String::from_utf8_lossy(key)
        ))
        .into())
    }

    /// Requires local presence, broadcasts a `DeleteFile` so every peer
    /// drops its own copy too, and only then deletes the local file -- if
    /// the broadcast fails, the local copy is left in place rather than
    /// deleted out from under a replication that never went out.
    pub async fn delete(self: &Arc<Self>, key: &[u8]) -> anyhow::Result<()> {
        if !self.store.has(&self.id, key).await {
            return Err(NodeError::not_found(format!(
                "file with key {} does not exist",
                String::from_utf8_lossy(key)
            ))
            .into());
        }

        let hashed_key = self.path_transform.derive(key).filename;
        self.broadcast(&ControlMessage::DeleteFile {
            owner_id: self.id.clone(),
            hashed_key,
        })
        .await?;

        self.store.delete(&self.id, key).await?;
        Ok(())
    }

    /// Removes `key` from this node's own disk without notifying peers --
    /// useful for simulating local data loss before a network fetch, as
    /// distinct from [`Node::delete`], which propagates the removal.
    pub async fn delete_local(&self, key: &[u8]) -> anyhow::Result<()> {
        self.store.delete(&self.id, key).await
    }
}
