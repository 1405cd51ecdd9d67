//! Peer registry: the set of live neighbor sessions.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::{MeshError, MeshResult};
use crate::session::SessionCommand;

/// Write handle for one peer session.
///
/// Commands go through an unbounded channel so registry iteration never
/// blocks on peer I/O; the session task drains them onto the socket.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Create a handle around a session's command channel.
    pub fn new(command_tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { command_tx }
    }

    /// Queue a command for the session task. Fails only if the session
    /// task has already exited.
    pub fn send(&self, command: SessionCommand) -> MeshResult<()> {
        self.command_tx
            .send(command)
            .map_err(|_| MeshError::ChannelClosed("session command channel"))
    }
}

/// Mapping from peer name to live session, behind a single mutex.
///
/// The lock is held for map operations and list snapshots only, never
/// across socket I/O.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, SessionHandle>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session. Rejected if a session for this peer already
    /// exists; the caller is expected to close its socket.
    pub fn insert(&self, name: &str, handle: SessionHandle) -> MeshResult<()> {
        let mut peers = self.peers.lock().unwrap();
        if peers.contains_key(name) {
            return Err(MeshError::DuplicatePeer(name.to_string()));
        }
        peers.insert(name.to_string(), handle);
        Ok(())
    }

    /// Remove a session. Idempotent.
    pub fn remove(&self, name: &str) -> Option<SessionHandle> {
        self.peers.lock().unwrap().remove(name)
    }

    /// Get the session for a peer.
    pub fn get(&self, name: &str) -> Option<SessionHandle> {
        self.peers.lock().unwrap().get(name).cloned()
    }

    /// Whether a session for this peer exists.
    pub fn contains(&self, name: &str) -> bool {
        self.peers.lock().unwrap().contains_key(name)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.lock().unwrap().is_empty()
    }

    /// Names of all connected peers.
    pub fn names(&self) -> Vec<String> {
        self.peers.lock().unwrap().keys().cloned().collect()
    }

    /// Snapshot of every live session, taken under the lock and iterated
    /// outside it.
    pub fn sessions(&self) -> Vec<(String, SessionHandle)> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect()
    }
}
