//! Length-prefixed message framing codec.
//!
//! Messages are framed as:
//! - 4 bytes: network magic
//! - 4 bytes: big-endian message length
//! - N bytes: bincode-serialized Envelope

use bincode::Options;
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{MAX_MESSAGE_SIZE, NETWORK_MAGIC};
use crate::error::{MeshError, MeshResult};
use crate::protocol::Envelope;

/// Header size: 4 bytes magic + 4 bytes length.
const HEADER_SIZE: usize = 8;

/// Deterministic bincode configuration: fixed-size integer encoding,
/// little-endian byte order, trailing bytes rejected.
fn bincode_opts() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Serialize a protocol value to bytes.
pub fn serialize<T: Serialize>(value: &T) -> MeshResult<Vec<u8>> {
    bincode_opts()
        .serialize(value)
        .map_err(|e| MeshError::Codec(e.to_string()))
}

/// Deserialize a protocol value from bytes.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> MeshResult<T> {
    bincode_opts()
        .deserialize(bytes)
        .map_err(|e| MeshError::Codec(e.to_string()))
}

/// Codec for length-prefixed envelope framing.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Expected length of the current message (if header has been read).
    current_length: Option<usize>,
}

impl MessageCodec {
    /// Create a new message codec.
    pub fn new() -> Self {
        Self {
            current_length: None,
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Envelope;
    type Error = MeshError;

    fn decode(&mut self, src: &mut BytesMut) -> MeshResult<Option<Self::Item>> {
        // If we don't have the length yet, try to read the header
        if self.current_length.is_none() {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let magic: [u8; 4] = src[0..4].try_into().unwrap();
            if magic != NETWORK_MAGIC {
                return Err(MeshError::InvalidMagic {
                    expected: NETWORK_MAGIC,
                    actual: magic,
                });
            }

            let length = u32::from_be_bytes(src[4..8].try_into().unwrap()) as usize;
            if length > MAX_MESSAGE_SIZE {
                return Err(MeshError::MessageTooLarge {
                    size: length,
                    max: MAX_MESSAGE_SIZE,
                });
            }

            self.current_length = Some(length);
        }

        let length = self.current_length.unwrap();

        // Wait for the full message
        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let message_bytes = src.split_to(length);
        self.current_length = None;

        let envelope: Envelope = deserialize(&message_bytes)?;
        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for MessageCodec {
    type Error = MeshError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> MeshResult<()> {
        let message_bytes = serialize(&envelope)?;
        let length = message_bytes.len();

        if length > MAX_MESSAGE_SIZE {
            return Err(MeshError::MessageTooLarge {
                size: length,
                max: MAX_MESSAGE_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + length);
        dst.put_slice(&NETWORK_MAGIC);
        dst.put_u32(length as u32);
        dst.put_slice(&message_bytes);

        Ok(())
    }
}
