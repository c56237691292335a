//! A single peer connection, split into independent read/write halves and
//! carrying the framed/streaming phase handoff described in the transport
//! design: the background frame reader owns `read_half` until it decodes a
//! stream marker, then parks on `stream_done` so a handler can take over the
//! same socket for a raw byte read before handing it back.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use uuid::Uuid;

use crate::crypto;
use crate::p2p::frame::{self, Rpc};

#[derive(Debug)]
pub struct Peer {
    pub uuid: Uuid,
    pub remote_addr: SocketAddr,
    write_half: AsyncMutex<OwnedWriteHalf>,
    read_half: AsyncMutex<OwnedReadHalf>,
    stream_done: Notify,
}

impl Peer {
    pub fn new(remote_addr: SocketAddr, read_half: OwnedReadHalf, write_half: OwnedWriteHalf) -> Arc<Self> {
        Arc::new(Self {
            uuid: Uuid::new_v4(),
            remote_addr,
            write_half: AsyncMutex::new(write_half),
            read_half: AsyncMutex::new(read_half),
            stream_done: Notify::new(),
        })
    }

    pub fn addr_key(&self) -> String {
        self.remote_addr.to_string()
    }

    /// Sends a framed control message (`0x1` discriminator).
    pub async fn send_message(&self, payload: &[u8]) -> anyhow::Result<()> {
        let mut w = self.write_half.lock().await;
        frame::write_message(&mut *w, payload).await
    }

    /// Announces the switch into the stream phase (`0x2` discriminator).
    pub async fn send_stream_marker(&self) -> anyhow::Result<()> {
        let mut w = self.write_half.lock().await;
        frame::write_stream_marker(&mut *w).await
    }

    /// Raw write during the stream phase -- no discriminator, no framing.
    pub async fn write_raw(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut w = self.write_half.lock().await;
        w.write_all(bytes).await?;
        Ok(())
    }

    /// The background reader for this connection: decodes frames and
    /// forwards them on `tx` until the socket closes. On a stream marker it
    /// forwards the event and then waits for [`Peer::close_stream`] before
    /// resuming, so whoever reads the raw bytes that follow has the socket
    /// to themselves.
    pub async fn run_frame_reader(self: Arc<Self>, tx: mpsc::Sender<Rpc>) {
        let from = self.addr_key();
        loop {
            let decoded = {
                let mut r = self.read_half.lock().await;
                frame::read_frame(&mut *r, &from).await
            };
            match decoded {
                Ok(rpc) => {
                    let is_stream = rpc.is_stream;
                    if tx.send(rpc).await.is_err() {
                        return;
                    }
                    if is_stream {
                        self.stream_done.notified().await;
                    }
                }
                Err(_) => return,
            }
        }
    }

    /// Takes over the raw socket for the stream phase and copies exactly
    /// `len` bytes into `dst` verbatim (the store-responder path: no
    /// decryption, the bytes are already ciphertext on disk).
    pub async fn read_stream_exact<W>(&self, len: u64, mut dst: W) -> anyhow::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut r = self.read_half.lock().await;
        let mut limited = (&mut *r).take(len);
        let n = tokio::io::copy(&mut limited, &mut dst).await?;
        Ok(n)
    }

    /// Takes over the raw socket for the stream phase, reads the 8-byte
    /// little-endian size prefix a responder sends ahead of a `GetFile`
    /// reply, and decrypts exactly that many ciphertext bytes into `dst`.
    /// Returns `(announced_size, plaintext_bytes_written)`.
    pub async fn read_stream_decrypt<W>(&self, enc_key: &[u8], mut dst: W) -> anyhow::Result<(u64, u64)>
    where
        W: AsyncWrite + Unpin,
    {
        let mut r = self.read_half.lock().await;
        let size = r.read_u64_le().await?;
        let mut limited = (&mut *r).take(size);
        let n = crypto::decrypt(enc_key, &mut limited, &mut dst).await?;
        Ok((size, n))
    }

    /// Ends the stream phase, letting the background reader resume framed
    /// decoding on this connection.
    pub fn close_stream(&self) {
        self.stream_done.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn connected_pair() -> (Arc<Peer>, Arc<Peer>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let server = accept.await.unwrap();

        let client_addr = client.local_addr().unwrap();
        let (cr, cw) = client.into_split();
        let (sr, sw) = server.into_split();
        (Peer::new(addr, sr, sw), Peer::new(client_addr, cr, cw))
    }

    #[tokio::test]
    async fn send_message_is_observed_as_a_non_stream_rpc() {
        let (server, client) = connected_pair().await;
        let (tx, mut rx) = mpsc::channel(8);
        let reader_task = tokio::spawn(server.clone().run_frame_reader(tx));

        client.send_message(b"ping").await.unwrap();
        let rpc = rx.recv().await.unwrap();
        assert!(!rpc.is_stream);
        assert_eq!(rpc.payload, b"ping");

        drop(client);
        reader_task.await.unwrap();
    }

    #[tokio::test]
    async fn stream_handoff_lets_a_handler_read_raw_bytes_then_resume_framing() {
        let (server, client) = connected_pair().await;
        let (tx, mut rx) = mpsc::channel(8);
        let server_for_reader = server.clone();
        let reader_task = tokio::spawn(server_for_reader.run_frame_reader(tx));

        client.send_stream_marker().await.unwrap();
        client.write_raw(b"raw-ciphertext-bytes").await.unwrap();

        let marker = rx.recv().await.unwrap();
        assert!(marker.is_stream);

        let mut sink = Cursor::new(Vec::new());
        let n = server
            .read_stream_exact("raw-ciphertext-bytes".len() as u64, &mut sink)
            .await
            .unwrap();
        assert_eq!(n, "raw-ciphertext-bytes".len() as u64);
        assert_eq!(sink.into_inner(), b"raw-ciphertext-bytes");
        server.close_stream();

        client.send_message(b"still-alive").await.unwrap();
        let next = rx.recv().await.unwrap();
        assert!(!next.is_stream);
        assert_eq!(next.payload, b"still-alive");

        drop(client);
        reader_task.await.unwrap();
    }
}
