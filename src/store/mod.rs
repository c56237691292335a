//! Content-addressed local store: streams bytes to/from `{root}/{owner_id}/{path}`.

mod path_key;

pub use path_key::{PathKey, PathTransform};

use std::path::PathBuf;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::crypto;
use crate::error::NodeError;

const DEFAULT_ROOT: &str = "driftnetwork";

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    path_transform: PathTransform,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>, path_transform: PathTransform) -> Self {
        let root = root.into();
        let root = if root.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_ROOT)
        } else {
            root
        };
        Self { root, path_transform }
    }

    fn path_key(&self, key: &[u8]) -> PathKey {
        self.path_transform.derive(key)
    }

    fn full_path(&self, owner_id: &str, key: &[u8]) -> PathBuf {
        self.full_path_at(owner_id, &self.path_key(key))
    }

    fn full_path_at(&self, owner_id: &str, path_key: &PathKey) -> PathBuf {
        self.root.join(owner_id).join(path_key.full_path())
    }

    fn dir_path_at(&self, owner_id: &str, path_key: &PathKey) -> PathBuf {
        self.root.join(owner_id).join(&path_key.dir_segments)
    }

    fn first_segment_path_at(&self, owner_id: &str, path_key: &PathKey) -> PathBuf {
        self.root.join(owner_id).join(path_key.first_segment())
    }

    pub async fn has(&self, owner_id: &str, key: &[u8]) -> bool {
        self.has_at(owner_id, &self.path_key(key)).await
    }

    pub async fn has_at(&self, owner_id: &str, path_key: &PathKey) -> bool {
        fs::metadata(self.full_path_at(owner_id, path_key))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn open_for_writing(&self, owner_id: &str, key: &[u8]) -> anyhow::Result<fs::File> {
        self.open_for_writing_at(owner_id, &self.path_key(key)).await
    }

    /// Opens `(owner_id, path_key)` for writing, creating its CAS directory
    /// tree. `path_key` is taken as given -- callers handling network
    /// messages pass [`PathKey::from_cas_hex`] rather than re-deriving it.
    pub async fn open_for_writing_at(
        &self,
        owner_id: &str,
        path_key: &PathKey,
    ) -> anyhow::Result<fs::File> {
        fs::create_dir_all(self.dir_path_at(owner_id, path_key)).await?;
        let file = fs::File::create(self.full_path_at(owner_id, path_key)).await?;
        Ok(file)
    }

    /// Streams `reader` verbatim into `(owner_id, key)`. Returns bytes written.
    pub async fn write<R>(&self, owner_id: &str, key: &[u8], mut reader: R) -> anyhow::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = self.open_for_writing(owner_id, key).await?;
        let n = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok(n)
    }

    /// Like [`Store::write`] but decrypts `reader` through the stream cipher first.
    /// Returns the plaintext byte count.
    pub async fn write_decrypt<R>(
        &self,
        enc_key: &[u8],
        owner_id: &str,
        key: &[u8],
        reader: R,
    ) -> anyhow::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = self.open_for_writing(owner_id, key).await?;
        let n = crypto::decrypt(enc_key, reader, &mut file).await?;
        file.flush().await?;
        Ok(n)
    }

    /// Opens `(owner_id, key)` for reading. Returns its size and an owned reader.
    pub async fn read(&self, owner_id: &str, key: &[u8]) -> anyhow::Result<(u64, fs::File)> {
        self.read_at(owner_id, &self.path_key(key)).await
    }

    pub async fn read_at(&self, owner_id: &str, path_key: &PathKey) -> anyhow::Result<(u64, fs::File)> {
        let file = fs::File::open(self.full_path_at(owner_id, path_key)).await?;
        let size = file.metadata().await?.len();
        Ok((size, file))
    }

    pub async fn size(&self, owner_id: &str, key: &[u8]) -> anyhow::Result<u64> {
        let meta = fs::metadata(self.full_path(owner_id, key)).await?;
        Ok(meta.len())
    }

    /// Removes `(owner_id, key)` and its CAS directory tree. Fails if absent.
    pub async fn delete(&self, owner_id: &str, key: &[u8]) -> anyhow::Result<()> {
        self.delete_at(owner_id, &self.path_key(key), &hex_key(key)).await
    }

    pub async fn delete_at(
        &self,
        owner_id: &str,
        path_key: &PathKey,
        display_key: &str,
    ) -> anyhow::Result<()> {
        if !self.has_at(owner_id, path_key).await {
            return Err(
                NodeError::not_found(format!("file with key {display_key} does not exist")).into(),
            );
        }
        fs::remove_dir_all(self.first_segment_path_at(owner_id, path_key)).await?;
        Ok(())
    }

    /// Removes the entire storage root.
    pub async fn clear(&self) -> anyhow::Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn hex_key(key: &[u8]) -> String {
    String::from_utf8(key.to_vec()).unwrap_or_else(|_| hex::encode(key))
}
