//! Per-peer session tasks.
//!
//! Each installed session owns its socket for its lifetime: one task
//! multiplexes framed reads, queued writes, and hangup. Decoded envelopes
//! feed the shared intake channel; when the link dies from either
//! direction the task removes the session, retracts the edge locally,
//! announces the break to the mesh, and re-enters degree maintenance.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::discovery;
use crate::error::MeshResult;
use crate::node::Shared;
use crate::outbound;
use crate::protocol::{Command, Envelope, MessageCodec};
use crate::registry::SessionHandle;
use crate::router;
use crate::topology::edge_fragment;

/// Commands accepted by a session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Encode and transmit an envelope on the session's socket.
    Send(Envelope),
    /// Close the session and run link repair.
    Hangup,
}

/// Install a session for `peer` and start its task.
///
/// The registry entry is created before the task starts, so a concurrent
/// handshake for the same peer is rejected as a duplicate; on rejection
/// the caller drops the socket.
pub(crate) fn install(
    shared: &Arc<Shared>,
    peer: &str,
    framed: Framed<TcpStream, MessageCodec>,
) -> MeshResult<()> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    shared.registry.insert(peer, SessionHandle::new(command_tx))?;
    tokio::spawn(run_session(
        shared.clone(),
        peer.to_string(),
        framed,
        command_rx,
    ));
    Ok(())
}

async fn run_session(
    shared: Arc<Shared>,
    peer: String,
    framed: Framed<TcpStream, MessageCodec>,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
) {
    let mut shutdown_rx = shared.shutdown_rx();
    let (mut sink, mut stream) = framed.split();

    let reason = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                // Node is going down; drop the socket without link repair.
                shared.registry.remove(&peer);
                return;
            }
            frame = stream.next() => match frame {
                Some(Ok(envelope)) => {
                    if shared.intake_tx.send(envelope).await.is_err() {
                        break "intake closed";
                    }
                }
                Some(Err(e)) => {
                    shared.report(e);
                    break "decode error";
                }
                None => break "closed by peer",
            },
            command = command_rx.recv() => match command {
                Some(SessionCommand::Send(envelope)) => {
                    if let Err(e) = sink.send(envelope).await {
                        shared.report(e);
                        break "write error";
                    }
                }
                Some(SessionCommand::Hangup) | None => break "hangup",
            },
        }
    };

    tracing::debug!(%peer, reason, "disconnecting from peer");
    teardown(&shared, &peer);
}

/// Remove a dead session and repair the topology around it.
fn teardown(shared: &Arc<Shared>, peer: &str) {
    shared.registry.remove(peer);

    let fragment = edge_fragment(shared.name(), peer);
    router::apply_intersection(shared, &fragment);

    // Let everyone know about the new topology.
    outbound::originate_broadcast(shared, Command::Intersection(fragment));

    // Make sure we keep up the necessary degree.
    discovery::maintain_degree(shared);
}
