//! Node configuration: everything a [`crate::server::Node`] needs to start,
//! gathered in one place the way the `torrent` crate's `TorrentFile`
//! settings are gathered before opening a listener.

use std::net::SocketAddr;
use std::path::PathBuf;

use rand::RngCore;

use crate::crypto;
use crate::error::NodeError;
use crate::store::PathTransform;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    pub encryption_key: [u8; crypto::KEY_LEN],
    pub storage_root: PathBuf,
    pub path_transform: PathTransform,
    pub bootstrap_nodes: Vec<SocketAddr>,
    pub node_id: Option<String>,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), NodeError> {
        crypto::validate_key(&self.encryption_key)
    }
}

/// Generates a random 32-byte hex node id, used when `node_id` is left unset.
pub fn generate_node_id() -> String {
    let mut buf = [0u8; 32];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Generates a random AES-256 key. The demo driver uses this per-node;
/// production deployments should instead provision a key out of band and
/// load it from the environment.
pub fn generate_encryption_key() -> [u8; crypto::KEY_LEN] {
    let mut buf = [0u8; crypto::KEY_LEN];
    rand::rng().fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_node_ids_are_unique_and_64_hex_chars() {
        let a = generate_node_id();
        let b = generate_node_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn validate_accepts_a_well_formed_config() {
        let cfg = NodeConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            encryption_key: generate_encryption_key(),
            storage_root: PathBuf::from("does-not-matter"),
            path_transform: PathTransform::ContentAddressed,
            bootstrap_nodes: Vec::new(),
            node_id: None,
        };
        assert!(cfg.validate().is_ok());
    }
}
