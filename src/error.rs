//! Mesh error types.

use std::io;
use thiserror::Error;

/// Errors produced by the mesh engine.
///
/// Transport and protocol errors observed while servicing peers are also
/// emitted on the node's error stream; the engine itself never panics on
/// peer behavior.
#[derive(Debug, Error)]
pub enum MeshError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize or deserialize a message.
    #[error("codec error: {0}")]
    Codec(String),

    /// Message exceeds the maximum framed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Invalid network magic bytes.
    #[error("invalid network magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    /// Node name is unusable (empty or contains the beacon delimiter).
    #[error("invalid node name: {0:?}")]
    InvalidName(String),

    /// A peer presented our own name during handshake.
    #[error("connecting to myself is not allowed")]
    SelfConnect,

    /// A session for this peer already exists.
    #[error("already connected to {0}")]
    DuplicatePeer(String),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Handshake timed out.
    #[error("handshake timeout")]
    HandshakeTimeout,

    /// Outbound connection timed out.
    #[error("connection timeout to {0}")]
    ConnectTimeout(String),

    /// No known peer with this name.
    #[error("no such peer: {0}")]
    PeerNotFound(String),

    /// No next-hop toward a set recipient.
    #[error("no route to host: {0}")]
    NoRoute(String),

    /// A set message was not positively acknowledged by every recipient.
    /// Each entry names a recipient and the reason it failed.
    #[error("failed to send to: {}", format_failures(.failures))]
    SetFailed { failures: Vec<(String, String)> },

    /// A remote node negatively acknowledged a set message.
    #[error("{recipient} rejected message: {reason}")]
    RemoteNack { recipient: String, reason: String },

    /// A discovery datagram did not match `meshage:<name>`.
    #[error("malformed discovery packet: {0:?}")]
    MalformedBeacon(String),

    /// A message carried a command that is invalid in its position.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// An internal channel was closed while the node was still running.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(recipient, reason)| format!("{recipient} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_failed_display() {
        let err = MeshError::SetFailed {
            failures: vec![
                ("beta".to_string(), "no route to host: beta".to_string()),
                ("gamma".to_string(), "ack timeout".to_string()),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("beta"));
        assert!(text.contains("gamma"));
        assert!(text.contains("ack timeout"));
    }
}
