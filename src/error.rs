use std::fmt;

/// Domain error a caller may want to branch on, distinct from the catch-all
/// `anyhow::Error` used for plain I/O propagation.
#[derive(Debug, Clone)]
pub struct NodeError {
    pub msg: String,
    pub cause: NodeErrorCause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorCause {
    /// Encryption key, derived path, or control message failed a shape check.
    Validation,
    /// The requested key is not present in the local store.
    NotFound,
    /// A peer address used in a send/read was not present in the registry.
    UnknownPeer,
    /// The peer's handshake tag did not match ours.
    HandshakeMismatch,
}

impl NodeError {
    pub fn new(cause: NodeErrorCause, msg: impl Into<String>) -> Self {
        Self {
            cause,
            msg: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(NodeErrorCause::Validation, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(NodeErrorCause::NotFound, msg)
    }

    pub fn unknown_peer(msg: impl Into<String>) -> Self {
        Self::new(NodeErrorCause::UnknownPeer, msg)
    }

    pub fn handshake_mismatch(msg: impl Into<String>) -> Self {
        Self::new(NodeErrorCause::HandshakeMismatch, msg)
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for NodeError {}
