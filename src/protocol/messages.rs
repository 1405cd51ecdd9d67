//! Mesh protocol messages.
//!
//! Every framed message on a session is an [`Envelope`]. The command is an
//! enum carrying its own body, so each payload shape has an explicit schema
//! discriminated by the command tag.

use serde::{Deserialize, Serialize};

use crate::topology::MeshMap;

/// Delivery class of an envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageClass {
    /// Unicast to a named list of recipients, routed hop by hop.
    Set,
    /// Flood to all reachable nodes, deduplicated per origin.
    Broadcast,
}

/// Acknowledgement for a set message.
///
/// `err: None` is a positive acknowledgement. `ack_of` is the id of the
/// acknowledged message in the origin's namespace, letting the origin's
/// router hand the ack to the waiting `set` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckRecord {
    /// The recipient this acknowledgement speaks for.
    pub recipient: String,
    /// Failure reason, if the message could not be delivered.
    pub err: Option<String>,
    /// Id of the acknowledged message.
    pub ack_of: u64,
}

impl AckRecord {
    /// Positive acknowledgement from `recipient` for message `ack_of`.
    pub fn ok(recipient: impl Into<String>, ack_of: u64) -> Self {
        Self {
            recipient: recipient.into(),
            err: None,
            ack_of,
        }
    }

    /// Negative acknowledgement with a failure reason.
    pub fn failed(recipient: impl Into<String>, ack_of: u64, reason: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            err: Some(reason.into()),
            ack_of,
        }
    }
}

/// Command tag plus its body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Command {
    /// Merge the carried adjacency fragment into the receiver's mesh.
    Union(MeshMap),
    /// Remove the carried edges from the receiver's mesh.
    Intersection(MeshMap),
    /// Application payload for the receiver's host.
    Payload(Vec<u8>),
    /// Acknowledgement of a set message.
    Ack(AckRecord),
    /// Acceptor's opening handshake; the sender does not currently want
    /// more peers. Carries the sender's adjacency map.
    Handshake(MeshMap),
    /// Acceptor's opening handshake; the sender is below its degree and
    /// solicited this connection.
    HandshakeSolicited(MeshMap),
}

impl Command {
    /// Get a human-readable name for the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Union(_) => "union",
            Command::Intersection(_) => "intersection",
            Command::Payload(_) => "payload",
            Command::Ack(_) => "ack",
            Command::Handshake(_) => "handshake",
            Command::HandshakeSolicited(_) => "handshake_solicited",
        }
    }
}

/// The payload for all message passing on a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Delivery class.
    pub class: MessageClass,
    /// Destination names. Meaningful for set-class envelopes only.
    pub recipients: Vec<String>,
    /// Name of the originating node.
    pub source: String,
    /// Names the message has traversed, origin first. Each forwarder
    /// appends its own name before re-emitting.
    pub route: Vec<String>,
    /// Sequence id in the origin's namespace. Zero is reserved for
    /// handshake messages, which are never subject to dedup.
    pub id: u64,
    /// Command and body.
    pub command: Command,
}

impl Envelope {
    /// Id reserved for handshake envelopes.
    pub const HANDSHAKE_ID: u64 = 0;

    /// Build a set-class envelope originated by `source`.
    pub fn set(
        source: impl Into<String>,
        recipients: Vec<String>,
        id: u64,
        command: Command,
    ) -> Self {
        let source = source.into();
        Self {
            class: MessageClass::Set,
            recipients,
            route: vec![source.clone()],
            source,
            id,
            command,
        }
    }

    /// Build a broadcast-class envelope originated by `source`.
    pub fn broadcast(source: impl Into<String>, id: u64, command: Command) -> Self {
        let source = source.into();
        Self {
            class: MessageClass::Broadcast,
            recipients: Vec::new(),
            route: vec![source.clone()],
            source,
            id,
            command,
        }
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}(source={}, id={}, command={}, recipients={})",
            self.class,
            self.source,
            self.id,
            self.command.name(),
            self.recipients.len()
        )
    }
}
