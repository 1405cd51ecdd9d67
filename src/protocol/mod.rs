//! Wire protocol: message records and framing.

pub mod framing;
pub mod messages;

pub use framing::MessageCodec;
pub use messages::{AckRecord, Command, Envelope, MessageClass};
