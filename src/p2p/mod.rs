//! Peer-to-peer transport: framing, handshake, and the connection registry.

pub mod frame;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod registry;
pub mod tcp_transport;

pub use frame::Rpc;
pub use message::ControlMessage;
pub use peer::Peer;
pub use registry::PeerRegistry;
pub use tcp_transport::TcpTransport;
