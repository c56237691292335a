//! A small distributed, content-addressed, encrypted file store: nodes hold
//! a local on-disk store and replicate writes to whichever peers are
//! connected when the write happens.

pub mod config;
pub mod crypto;
pub mod error;
pub mod p2p;
pub mod server;
pub mod store;

pub use config::NodeConfig;
pub use error::{NodeError, NodeErrorCause};
pub use server::Node;
pub use store::{PathKey, PathTransform, Store};
