//! A fixed version tag exchanged before any frames flow. It is a capability
//! check, not an authentication step -- any peer that speaks the tag is
//! accepted.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NodeError;

pub const HANDSHAKE_TAG: &[u8] = b"DRIFT-FS-v1";

pub async fn perform<S>(stream: &mut S) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(HANDSHAKE_TAG).await?;
    let mut buf = vec![0u8; HANDSHAKE_TAG.len()];
    stream.read_exact(&mut buf).await?;
    if buf != HANDSHAKE_TAG {
        return Err(NodeError::handshake_mismatch(
            "peer sent an incompatible handshake tag",
        )
        .into());
    }
    Ok(())
}
