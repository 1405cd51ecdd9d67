//! Message router: single consumer of the intake channel.
//!
//! Every inbound envelope passes per-origin sequence dedup, records this
//! node on its route, and is then split between local dispatch and onward
//! forwarding. Control commands feed the topology engine; payloads go to
//! the host's receive stream; acks go to the waiting `set` call.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::MeshError;
use crate::node::{Delivery, Shared};
use crate::outbound;
use crate::protocol::{AckRecord, Command, Envelope, MessageClass};
use crate::topology::MeshMap;

/// Run the router until the node shuts down.
pub(crate) async fn run(shared: Arc<Shared>, mut intake_rx: mpsc::Receiver<Envelope>) {
    let mut shutdown_rx = shared.shutdown_rx();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe = intake_rx.recv() => match maybe {
                Some(envelope) => handle_inbound(&shared, envelope).await,
                None => break,
            },
        }
    }
    tracing::debug!("router stopped");
}

async fn handle_inbound(shared: &Shared, mut envelope: Envelope) {
    tracing::debug!(message = %envelope, "router got");
    match envelope.class {
        MessageClass::Set => {
            let fresh = shared
                .sequences
                .lock()
                .unwrap()
                .observe_set(&envelope.source, envelope.id);
            if !fresh {
                tracing::debug!(message = %envelope, "stale set id, dropping");
                return;
            }
            envelope.route.push(shared.name().to_string());

            let (mine, onward): (Vec<String>, Vec<String>) = envelope
                .recipients
                .iter()
                .cloned()
                .partition(|r| r == shared.name());

            if !mine.is_empty() {
                dispatch_local(shared, &envelope).await;
            }
            if !onward.is_empty() {
                let mut forwarded = envelope;
                forwarded.recipients = onward;
                outbound::forward_set(shared, forwarded);
            }
        }
        MessageClass::Broadcast => {
            let fresh = shared
                .sequences
                .lock()
                .unwrap()
                .observe_broadcast(&envelope.source, envelope.id);
            if !fresh {
                tracing::debug!(message = %envelope, "stale broadcast id, dropping");
                return;
            }
            envelope.route.push(shared.name().to_string());

            // Every neighbor gets a copy, including the one we received
            // from; its sequence table drops the echo.
            outbound::broadcast_to_peers(shared, &envelope);
            dispatch_local(shared, &envelope).await;
        }
    }
}

/// Dispatch an envelope addressed to this node by its command.
async fn dispatch_local(shared: &Shared, envelope: &Envelope) {
    match &envelope.command {
        Command::Union(fragment) => apply_union(shared, fragment),
        Command::Intersection(fragment) => apply_intersection(shared, fragment),
        Command::Payload(body) => {
            let delivery = Delivery {
                source: envelope.source.clone(),
                route: envelope.route.clone(),
                body: body.clone(),
            };
            if shared.receive_tx.send(delivery).await.is_err() {
                shared.report(MeshError::ChannelClosed("receive stream"));
                return;
            }
            // Set deliveries are acknowledged toward the origin once the
            // payload is safely enqueued; broadcasts are not acked.
            if envelope.class == MessageClass::Set {
                let ack = AckRecord::ok(shared.name(), envelope.id);
                outbound::originate_ack(shared, &envelope.source, ack);
            }
        }
        Command::Ack(record) => {
            if !shared.waiters.dispatch(record.clone()) {
                tracing::debug!(ack_of = record.ack_of, "ack with no waiter, dropping");
            }
        }
        Command::Handshake(_) | Command::HandshakeSolicited(_) => {
            shared.report(MeshError::InvalidCommand(
                envelope.command.name().to_string(),
            ));
        }
    }
}

/// Merge an adjacency fragment into the local mesh, then verify that our
/// own row agrees with the registry.
///
/// Union messages must not alter what this node knows about its own
/// connections: any neighbor the merged row claims that the registry does
/// not hold is retracted locally and announced to the mesh as a correcting
/// intersection.
pub(crate) fn apply_union(shared: &Shared, fragment: &MeshMap) {
    tracing::debug!(?fragment, "union");
    let own_row = {
        let mut topology = shared.topology.lock().unwrap();
        topology.union(fragment);
        topology.neighbors(shared.name()).to_vec()
    };

    let stale: Vec<String> = own_row
        .into_iter()
        .filter(|neighbor| !shared.registry.contains(neighbor))
        .collect();
    if stale.is_empty() {
        return;
    }

    let mut correction = MeshMap::new();
    for neighbor in &stale {
        correction.insert(neighbor.clone(), vec![shared.name().to_string()]);
    }
    correction.insert(shared.name().to_string(), stale);

    tracing::debug!(?correction, "union conflicts, broadcasting correction");
    apply_intersection(shared, &correction);
    outbound::originate_broadcast(shared, Command::Intersection(correction));
}

/// Remove the edges an intersection fragment names; nodes whose rows empty
/// out disappear from the mesh and from both sequence tables.
pub(crate) fn apply_intersection(shared: &Shared, fragment: &MeshMap) {
    tracing::debug!(?fragment, "intersection");
    let removed = shared.topology.lock().unwrap().remove_edges(fragment);
    if removed.is_empty() {
        return;
    }
    let mut sequences = shared.sequences.lock().unwrap();
    for name in removed {
        sequences.remove(&name);
    }
}
