//! Session establishment.
//!
//! Both endpoints perform a symmetric exchange. The accepting side speaks
//! first: a handshake envelope whose command says whether it currently
//! wants more peers, carrying its adjacency map. The dialing side
//! validates the greeting, replies ack-shaped, and both sides install the
//! session keyed by the other's source name. The dialer then merges the
//! peer's topology with its own, adds the new edge, and announces the
//! union to the mesh.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::error::{MeshError, MeshResult};
use crate::node::Shared;
use crate::outbound;
use crate::protocol::{AckRecord, Command, Envelope, MessageCodec};
use crate::router;
use crate::session;

/// Handshake an inbound connection and install the session.
///
/// The acceptor applies the same self-connect and duplicate-peer checks as
/// the dialer; rejected sockets are dropped without touching the registry.
pub(crate) async fn accept(shared: &Arc<Shared>, stream: TcpStream) -> MeshResult<()> {
    let mut framed = Framed::new(stream, MessageCodec::new());

    let command = if shared.registry.len() < shared.degree() {
        Command::HandshakeSolicited(shared.topology.lock().unwrap().snapshot())
    } else {
        Command::Handshake(shared.topology.lock().unwrap().snapshot())
    };
    let hello = Envelope::set(
        shared.name(),
        Vec::new(),
        Envelope::HANDSHAKE_ID,
        command,
    );
    framed.send(hello).await?;

    // The reply may be any shape; only its source name is used.
    let reply = timeout(shared.config.handshake_timeout, framed.next())
        .await
        .map_err(|_| MeshError::HandshakeTimeout)?
        .ok_or_else(|| MeshError::HandshakeFailed("connection closed".to_string()))??;

    let peer = reply.source;
    if peer == shared.name() {
        return Err(MeshError::SelfConnect);
    }

    // Valid connection; install rejects a concurrent duplicate.
    session::install(shared, &peer, framed)?;
    tracing::debug!(%peer, "accepted session");
    Ok(())
}

/// Dial a peer, handshake, and install the session.
///
/// `solicited` marks dials triggered by a UDP beacon: if the accepting
/// side reports it does not need peers either, the redundant link is
/// dropped silently.
pub(crate) async fn dial(shared: &Arc<Shared>, host: &str, solicited: bool) -> MeshResult<()> {
    let addr = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:{}", shared.config.peer_port)
    };
    tracing::debug!(%addr, solicited, "dialing");

    let stream = timeout(shared.config.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| MeshError::ConnectTimeout(addr.clone()))??;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(error = %e, "failed to set TCP_NODELAY");
    }
    let mut framed = Framed::new(stream, MessageCodec::new());

    let hello = timeout(shared.config.handshake_timeout, framed.next())
        .await
        .map_err(|_| MeshError::HandshakeTimeout)?
        .ok_or_else(|| MeshError::HandshakeFailed("connection closed".to_string()))??;
    tracing::debug!(message = %hello, "dial got");

    let (mut peer_mesh, peer_wants_us) = match hello.command {
        Command::HandshakeSolicited(mesh) => (mesh, true),
        Command::Handshake(mesh) => (mesh, false),
        other => {
            return Err(MeshError::HandshakeFailed(format!(
                "unexpected command: {}",
                other.name()
            )))
        }
    };
    let peer = hello.source;

    // Am I connecting to myself?
    if peer == shared.name() {
        return Err(MeshError::SelfConnect);
    }
    if shared.registry.contains(&peer) {
        return Err(MeshError::DuplicatePeer(peer));
    }
    // Both sides over degree: no new link is warranted.
    if !peer_wants_us && solicited {
        tracing::debug!(%peer, "neither side needs the link, closing");
        return Ok(());
    }

    let reply = Envelope::set(
        shared.name(),
        Vec::new(),
        Envelope::HANDSHAKE_ID,
        Command::Ack(AckRecord::ok(shared.name(), Envelope::HANDSHAKE_ID)),
    );
    framed.send(reply).await?;

    session::install(shared, &peer, framed)?;
    tracing::debug!(%peer, "dialed session");

    // Add the new edge to the peer's view of the network and merge it
    // with ours.
    peer_mesh
        .entry(shared.name().to_string())
        .or_default()
        .push(peer.clone());
    peer_mesh
        .entry(peer.clone())
        .or_default()
        .push(shared.name().to_string());
    router::apply_union(shared, &peer_mesh);

    // Let everyone know about the new topology.
    let snapshot = shared.topology.lock().unwrap().snapshot();
    outbound::originate_broadcast(shared, Command::Union(snapshot));

    Ok(())
}
