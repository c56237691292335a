//! The shared table of live peer connections, keyed by remote address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::p2p::peer::Peer;

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, Arc<Peer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, addr: String, peer: Arc<Peer>) {
        self.peers.lock().unwrap().insert(addr, peer);
    }

    pub fn remove(&self, addr: &str) -> Option<Arc<Peer>> {
        self.peers.lock().unwrap().remove(addr)
    }

    pub fn get(&self, addr: &str) -> Option<Arc<Peer>> {
        self.peers.lock().unwrap().get(addr).cloned()
    }

    /// Clones the current peer list under the lock and releases it
    /// immediately. Callers must never hold the registry lock across a send
    /// or other await point -- broadcast iterates this snapshot instead.
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
