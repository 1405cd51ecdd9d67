//! Outbound message plane.
//!
//! Set-class envelopes are grouped by next-hop so each neighbor receives a
//! single copy carrying only the recipients it is responsible for.
//! Broadcast-class envelopes go to every live session. Sends are queued on
//! the sessions' unbounded command channels and never block on peer I/O.
//!
//! Each originating `set` call registers an [`AckWaiters`] entry keyed by
//! its message id; the router dispatches inbound acknowledgements to the
//! matching waiter, so concurrent set calls do not serialize on a shared
//! ack stream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{MeshError, MeshResult};
use crate::node::Shared;
use crate::protocol::{AckRecord, Command, Envelope};
use crate::session::SessionCommand;

/// Per-call acknowledgement waiters, keyed by originated message id.
#[derive(Debug, Default)]
pub struct AckWaiters {
    inner: Mutex<HashMap<u64, mpsc::UnboundedSender<AckRecord>>>,
}

impl AckWaiters {
    /// Create an empty waiter table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for acknowledgements of message `id`.
    pub fn register(&self, id: u64) -> mpsc::UnboundedReceiver<AckRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().insert(id, tx);
        rx
    }

    /// Hand an acknowledgement to the waiter for its message. Returns
    /// false if nobody is waiting (for example after an ack timeout).
    pub fn dispatch(&self, ack: AckRecord) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.get(&ack.ack_of) {
            Some(tx) => tx.send(ack).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter for message `id`.
    pub fn unregister(&self, id: u64) {
        self.inner.lock().unwrap().remove(&id);
    }
}

/// Transmit one copy of a broadcast-class envelope to every live session.
///
/// The neighbor list is snapshotted under the registry lock; the sends
/// themselves are queued without it. Individual failures are reported on
/// the error stream but do not fail the call.
pub(crate) fn broadcast_to_peers(shared: &Shared, envelope: &Envelope) {
    for (peer, handle) in shared.registry.sessions() {
        tracing::debug!(%peer, message = %envelope, "broadcasting");
        if handle.send(SessionCommand::Send(envelope.clone())).is_err() {
            tracing::debug!(%peer, "session gone, skipping broadcast copy");
        }
    }
}

/// Originate a broadcast-class message with the given command.
pub(crate) fn originate_broadcast(shared: &Shared, command: Command) {
    let id = shared
        .sequences
        .lock()
        .unwrap()
        .next_broadcast_id(shared.name());
    let envelope = Envelope::broadcast(shared.name(), id, command);
    broadcast_to_peers(shared, &envelope);
}

/// Send a set-class envelope along known routes.
///
/// Recipients sharing a next-hop are batched into one copy with the
/// recipient list rewritten to the batch. Recipients without a route are
/// negatively acknowledged toward the envelope's origin: directly into the
/// local waiter if the origin is this node, otherwise with an ack message
/// routed back to it.
pub(crate) fn forward_set(shared: &Shared, envelope: Envelope) {
    // Resolve every next-hop under one topology lock, then do the rest
    // without it; nack synthesis re-enters the send path.
    let hops: Vec<(String, Option<String>)> = {
        let mut topology = shared.topology.lock().unwrap();
        envelope
            .recipients
            .iter()
            .map(|r| (r.clone(), topology.next_hop(shared.name(), r)))
            .collect()
    };

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (recipient, hop) in hops {
        match hop {
            Some(hop) => groups.entry(hop).or_default().push(recipient),
            None => {
                let err = MeshError::NoRoute(recipient.clone());
                tracing::error!(%recipient, "no route to set recipient");
                shared.report(err);
                nack(shared, &envelope, &recipient, format!("no route to host: {recipient}"));
            }
        }
    }

    for (hop, recipients) in groups {
        tracing::debug!(%hop, count = recipients.len(), "set sending via next hop");
        match shared.registry.get(&hop) {
            Some(handle) => {
                let mut copy = envelope.clone();
                copy.recipients = recipients;
                if handle.send(SessionCommand::Send(copy)).is_err() {
                    tracing::debug!(%hop, "session gone, set copy dropped");
                }
            }
            None => {
                // The route table said this hop exists but the registry
                // disagrees; the union conflict check will retract it.
                shared.report(MeshError::PeerNotFound(hop.clone()));
                for recipient in recipients {
                    nack(shared, &envelope, &recipient, format!("no session toward {hop}"));
                }
            }
        }
    }
}

/// Originate an acknowledgement toward `origin` for one of its messages.
pub(crate) fn originate_ack(shared: &Shared, origin: &str, ack: AckRecord) {
    if origin == shared.name() {
        if !shared.waiters.dispatch(ack) {
            tracing::debug!("ack with no local waiter, dropping");
        }
        return;
    }
    let id = shared.sequences.lock().unwrap().next_set_id(shared.name());
    let envelope = Envelope::set(
        shared.name(),
        vec![origin.to_string()],
        id,
        Command::Ack(ack),
    );
    forward_set(shared, envelope);
}

fn nack(shared: &Shared, envelope: &Envelope, recipient: &str, reason: String) {
    let ack = AckRecord::failed(recipient, envelope.id, reason);
    originate_ack(shared, &envelope.source, ack);
}

/// Wait for one acknowledgement per recipient, bounded by the configured
/// ack timeout.
///
/// Negative acks are re-emitted on the error stream and collected into the
/// composite failure; recipients still outstanding at the deadline are
/// reported as timed out.
pub(crate) async fn await_acks(
    shared: &Shared,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<AckRecord>,
    recipients: Vec<String>,
) -> MeshResult<()> {
    let deadline = Instant::now() + shared.config.ack_timeout;
    let mut pending = recipients;
    let mut failures = Vec::new();

    while !pending.is_empty() {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(ack)) => {
                let Some(position) = pending.iter().position(|r| *r == ack.recipient) else {
                    tracing::debug!(recipient = %ack.recipient, "ack for unknown recipient");
                    continue;
                };
                pending.remove(position);
                if let Some(reason) = ack.err {
                    shared.report(MeshError::RemoteNack {
                        recipient: ack.recipient.clone(),
                        reason: reason.clone(),
                    });
                    failures.push((ack.recipient, reason));
                }
            }
            Ok(None) => {
                for recipient in pending.drain(..) {
                    failures.push((recipient, "node shutting down".to_string()));
                }
            }
            Err(_) => {
                for recipient in pending.drain(..) {
                    failures.push((recipient, "ack timeout".to_string()));
                }
            }
        }
    }

    shared.waiters.unregister(id);

    if failures.is_empty() {
        Ok(())
    } else {
        Err(MeshError::SetFailed { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiters_dispatch_by_ack_of() {
        let waiters = AckWaiters::new();
        let mut rx = waiters.register(3);

        assert!(waiters.dispatch(AckRecord::ok("beta", 3)));
        assert!(!waiters.dispatch(AckRecord::ok("beta", 4)));

        let ack = rx.try_recv().unwrap();
        assert_eq!(ack.recipient, "beta");
        assert_eq!(ack.ack_of, 3);
    }

    #[test]
    fn test_waiters_unregister() {
        let waiters = AckWaiters::new();
        let _rx = waiters.register(1);
        waiters.unregister(1);
        assert!(!waiters.dispatch(AckRecord::ok("beta", 1)));
    }
}
