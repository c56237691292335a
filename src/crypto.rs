//! IV-prefixed AES-256-CTR streaming. The returned byte count is seeded at
//! `BLOCK_SIZE` rather than zero, so it already folds in the IV prefix (see
//! the size note on [`encrypt`]).

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NodeError;

pub(crate) type Aes256Ctr = Ctr128BE<Aes256>;

pub const KEY_LEN: usize = 32;
pub const BLOCK_SIZE: usize = 16;
const BUF_SIZE: usize = 32 * 1024;

/// Builds a fresh cipher instance for a given IV. Exposed so callers that
/// must fan a single plaintext out to several writers (see
/// [`crate::server::Node::store`]) can drive `apply_keystream` themselves
/// instead of writing to one `dst`. `key`'s length is only known at
/// runtime, so this goes through the fallible slice constructor rather
/// than the `&[u8; N]` `Into` conversion used for the fixed-size `iv`.
pub(crate) fn new_cipher(key: &[u8], iv: &[u8; BLOCK_SIZE]) -> anyhow::Result<Aes256Ctr> {
    Aes256Ctr::new_from_slices(key, iv).map_err(|e| anyhow::anyhow!("invalid key or iv length: {e}"))
}

pub fn validate_key(key: &[u8]) -> Result<(), NodeError> {
    if key.len() != KEY_LEN {
        return Err(NodeError::validation(format!(
            "invalid key length: expected {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

/// Generates a random IV, writes it verbatim to `dst`, then streams the
/// ciphertext. Returns `BLOCK_SIZE + ciphertext_len` -- callers that compute
/// `StoreFile.size` rely on this to already include the IV.
pub async fn encrypt<R, W>(key: &[u8], mut src: R, mut dst: W) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    validate_key(key)?;
    let mut iv = [0u8; BLOCK_SIZE];
    rand::rng().fill_bytes(&mut iv);
    dst.write_all(&iv).await?;

    let mut cipher = new_cipher(key, &iv)?;
    let mut written: u64 = BLOCK_SIZE as u64;
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        cipher.apply_keystream(&mut buf[..n]);
        dst.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    Ok(written)
}

/// Reads the IV prefix from `src`, then streams plaintext into `dst`. Returns
/// the same blockSize-seeded count as [`encrypt`].
pub async fn decrypt<R, W>(key: &[u8], mut src: R, mut dst: W) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    validate_key(key)?;
    let mut iv = [0u8; BLOCK_SIZE];
    src.read_exact(&mut iv).await?;

    let mut cipher = new_cipher(key, &iv)?;
    let mut written: u64 = BLOCK_SIZE as u64;
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        cipher.apply_keystream(&mut buf[..n]);
        dst.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn key(seed: u8) -> [u8; KEY_LEN] {
        [seed; KEY_LEN]
    }

    #[tokio::test]
    async fn round_trip() {
        let k = key(7);
        let plaintext = b"hello distributed world".to_vec();
        let mut ciphertext = Vec::new();
        let n = encrypt(&k, Cursor::new(plaintext.clone()), &mut ciphertext)
            .await
            .unwrap();
        assert_eq!(n as usize, plaintext.len() + BLOCK_SIZE);
        assert_eq!(ciphertext.len(), plaintext.len() + BLOCK_SIZE);

        let mut decoded = Vec::new();
        let dn = decrypt(&k, Cursor::new(ciphertext), &mut decoded).await.unwrap();
        assert_eq!(dn as usize, plaintext.len() + BLOCK_SIZE);
        assert_eq!(decoded, plaintext);
    }

    #[tokio::test]
    async fn zero_length_plaintext() {
        let k = key(1);
        let mut ciphertext = Vec::new();
        let n = encrypt(&k, Cursor::new(Vec::new()), &mut ciphertext).await.unwrap();
        assert_eq!(n as usize, BLOCK_SIZE);
        assert_eq!(ciphertext.len(), BLOCK_SIZE);

        let mut decoded = Vec::new();
        decrypt(&k, Cursor::new(ciphertext), &mut decoded).await.unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn buffer_boundary_32kib() {
        let k = key(42);
        let plaintext: Vec<u8> = (0..32 * 1024).map(|i| (i % 251) as u8).collect();
        let mut ciphertext = Vec::new();
        encrypt(&k, Cursor::new(plaintext.clone()), &mut ciphertext)
            .await
            .unwrap();
        let mut decoded = Vec::new();
        decrypt(&k, Cursor::new(ciphertext), &mut decoded).await.unwrap();
        assert_eq!(decoded, plaintext);
    }

    #[tokio::test]
    async fn wrong_key_does_not_recover_plaintext() {
        let k1 = key(5);
        let k2 = key(6);
        let plaintext = b"a secret nobody else should read".to_vec();
        let mut ciphertext = Vec::new();
        encrypt(&k1, Cursor::new(plaintext.clone()), &mut ciphertext)
            .await
            .unwrap();

        let mut decoded = Vec::new();
        decrypt(&k2, Cursor::new(ciphertext), &mut decoded).await.unwrap();
        assert_ne!(decoded, plaintext);
    }

    #[tokio::test]
    async fn rejects_short_key() {
        let bad_key = [0u8; 10];
        let mut out = Vec::new();
        let err = encrypt(&bad_key, Cursor::new(Vec::new()), &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid key length"));
    }
}
