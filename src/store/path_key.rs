//! Maps a user key to a filesystem path under two selectable strategies:
//! content-addressed (SHA-1 derived) and identity (verbatim).

use sha1::{Digest, Sha1};

const BLOCK_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    pub dir_segments: String,
    pub filename: String,
}

impl PathKey {
    pub fn first_segment(&self) -> &str {
        self.dir_segments.split('/').next().unwrap_or("")
    }

    pub fn full_path(&self) -> String {
        format!("{}/{}", self.dir_segments, self.filename)
    }

    /// Rebuilds a [`PathKey`] directly from a CAS filename received over the
    /// wire, without re-hashing it. A `StoreFile.hashed_key` is already the
    /// hex output of the sender's deriver, so peers must split it into the
    /// same 5-char groups rather than hash it a second time -- otherwise no
    /// two nodes would agree on where an object lives.
    pub fn from_cas_hex(hashed_key: &str) -> PathKey {
        let slice_len = hashed_key.len() / BLOCK_SIZE;
        if slice_len == 0 || hashed_key.len() % BLOCK_SIZE != 0 {
            return PathKey {
                dir_segments: hashed_key.to_string(),
                filename: hashed_key.to_string(),
            };
        }
        let segments: Vec<&str> = (0..slice_len)
            .map(|i| {
                let from = i * BLOCK_SIZE;
                let to = from + BLOCK_SIZE;
                &hashed_key[from..to]
            })
            .collect();
        PathKey {
            dir_segments: segments.join("/"),
            filename: hashed_key.to_string(),
        }
    }
}

/// Selects which derivation a node uses; fixed per server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTransform {
    /// Content-addressed: SHA-1 of the key, hex-encoded, split into 5-char groups.
    ContentAddressed,
    /// Identity: the raw key is used verbatim as both path and filename.
    Identity,
}

impl PathTransform {
    pub fn derive(&self, key: &[u8]) -> PathKey {
        match self {
            PathTransform::ContentAddressed => content_addressed(key),
            PathTransform::Identity => identity(key),
        }
    }
}

fn content_addressed(key: &[u8]) -> PathKey {
    let mut hasher = Sha1::new();
    hasher.update(key);
    let hash = hasher.finalize();
    let hash_str = hex::encode(hash);

    let slice_len = hash_str.len() / BLOCK_SIZE;
    let segments: Vec<&str> = (0..slice_len)
        .map(|i| {
            let from = i * BLOCK_SIZE;
            let to = from + BLOCK_SIZE;
            &hash_str[from..to]
        })
        .collect();

    PathKey {
        dir_segments: segments.join("/"),
        filename: hash_str,
    }
}

fn identity(key: &[u8]) -> PathKey {
    let key_str = String::from_utf8_lossy(key).into_owned();
    PathKey {
        dir_segments: key_str.clone(),
        filename: key_str,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_derive_is_deterministic() {
        let a = PathTransform::ContentAddressed.derive(b"picture.png");
        let b = PathTransform::ContentAddressed.derive(b"picture.png");
        assert_eq!(a, b);
    }

    #[test]
    fn cas_shape() {
        let pk = PathTransform::ContentAddressed.derive(b"picture.png");
        assert_eq!(pk.filename.len(), 40);
        let segments: Vec<&str> = pk.dir_segments.split('/').collect();
        assert_eq!(segments.len(), 8);
        for seg in segments {
            assert_eq!(seg.len(), 5);
        }
    }

    #[test]
    fn full_path_joins_segments_and_filename() {
        let pk = PathTransform::ContentAddressed.derive(b"k");
        assert_eq!(pk.full_path(), format!("{}/{}", pk.dir_segments, pk.filename));
    }

    #[test]
    fn first_segment_is_first_slash_delimited_component() {
        let pk = PathTransform::ContentAddressed.derive(b"k");
        let expected = pk.dir_segments.split('/').next().unwrap();
        assert_eq!(pk.first_segment(), expected);
    }

    #[test]
    fn from_cas_hex_reconstructs_the_same_segments_without_rehashing() {
        let derived = PathTransform::ContentAddressed.derive(b"picture.png");
        let rebuilt = PathKey::from_cas_hex(&derived.filename);
        assert_eq!(derived, rebuilt);
    }

    #[test]
    fn identity_uses_key_verbatim() {
        let pk = PathTransform::Identity.derive(b"raw-key");
        assert_eq!(pk.dir_segments, "raw-key");
        assert_eq!(pk.filename, "raw-key");
    }

    #[test]
    fn cas_key_with_slash_cannot_escape_root() {
        let pk = PathTransform::ContentAddressed.derive(b"../../etc/passwd");
        assert!(!pk.dir_segments.contains(".."));
        assert!(!pk.filename.contains('/'));
    }
}
