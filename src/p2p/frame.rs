//! The wire-level frame demultiplexer: a single discriminator byte ahead of
//! either a bounded control payload or a switch into raw stream mode.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MSG_TAG: u8 = 0x1;
pub const STREAM_TAG: u8 = 0x2;
const MAX_MESSAGE_LEN: usize = 1024;

/// One decoded frame. When `is_stream` is true, `payload` is empty and the
/// connection has switched into raw byte mode -- the next read from the
/// same connection must bypass this decoder.
#[derive(Debug, Clone)]
pub struct Rpc {
    pub from: String,
    pub payload: Vec<u8>,
    pub is_stream: bool,
}

pub async fn read_frame<R>(reader: &mut R, from: &str) -> anyhow::Result<Rpc>
where
    R: AsyncRead + Unpin,
{
    let tag = reader.read_u8().await?;
    match tag {
        STREAM_TAG => Ok(Rpc {
            from: from.to_string(),
            payload: Vec::new(),
            is_stream: true,
        }),
        MSG_TAG => {
            let mut buf = vec![0u8; MAX_MESSAGE_LEN];
            let n = reader.read(&mut buf).await?;
            anyhow::ensure!(n > 0, "connection closed mid-frame");
            buf.truncate(n);
            Ok(Rpc {
                from: from.to_string(),
                payload: buf,
                is_stream: false,
            })
        }
        other => anyhow::bail!("unknown frame discriminator {other:#04x}"),
    }
}

pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    anyhow::ensure!(!payload.is_empty(), "refusing to send an empty message frame");
    anyhow::ensure!(
        payload.len() <= MAX_MESSAGE_LEN,
        "message payload of {} bytes exceeds the {MAX_MESSAGE_LEN}-byte frame limit",
        payload.len()
    );
    writer.write_u8(MSG_TAG).await?;
    writer.write_all(payload).await?;
    Ok(())
}

pub async fn write_stream_marker<W>(writer: &mut W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u8(STREAM_TAG).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn message_frame_round_trips() {
        let mut wire = Vec::new();
        write_message(&mut wire, b"hello").await.unwrap();
        let rpc = read_frame(&mut Cursor::new(wire), "127.0.0.1:9000").await.unwrap();
        assert!(!rpc.is_stream);
        assert_eq!(rpc.payload, b"hello");
        assert_eq!(rpc.from, "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn stream_marker_carries_no_payload() {
        let mut wire = Vec::new();
        write_stream_marker(&mut wire).await.unwrap();
        let rpc = read_frame(&mut Cursor::new(wire), "peer").await.unwrap();
        assert!(rpc.is_stream);
        assert!(rpc.payload.is_empty());
    }

    #[tokio::test]
    async fn unknown_tag_is_rejected() {
        let wire = vec![0x9u8];
        assert!(read_frame(&mut Cursor::new(wire), "peer").await.is_err());
    }

    #[tokio::test]
    async fn empty_message_refuses_to_send() {
        let mut wire = Vec::new();
        assert!(write_message(&mut wire, b"").await.is_err());
    }

    #[tokio::test]
    async fn oversized_message_refuses_to_send() {
        let mut wire = Vec::new();
        let big = vec![0u8; MAX_MESSAGE_LEN + 1];
        assert!(write_message(&mut wire, &big).await.is_err());
    }
}
