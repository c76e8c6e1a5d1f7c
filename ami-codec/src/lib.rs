//! The wire codec: a framed, typed, versioned serialization layer.
//!
//! Every message on the fabric (spec.md §6) is either a single length-
//! prefixed blob, or a multi-frame `[topic, header, body]` envelope. This
//! crate fixes the binary shape of both: [`Frame`]'s header is modeled
//! directly on `communication::networking::MessageHeader` (the teacher's
//! own inter-process framing struct), and the body is `serde` + `bincode`
//! rather than `abomonation`'s unsafe byte-reinterpretation, which matches
//! spec.md's requirement for a "self-describing binary format".

mod frame;
mod channel;

pub use channel::Channel;
pub use frame::{read_frame, write_frame, Frame, FrameHeader};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors that can occur while encoding or decoding a payload or frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to serialize payload: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to deserialize payload: {0}")]
    Decode(#[source] bincode::Error),
    #[error("i/o error while framing a message: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame body exceeds the maximum accepted size ({0} bytes)")]
    TooLarge(u64),
}

/// The largest accepted frame body, guarding against a corrupt length
/// prefix turning into an unbounded allocation.
pub const MAX_FRAME_BYTES: u64 = 256 * 1024 * 1024;

/// Serializes `value` with the self-describing binary format used on the
/// wire everywhere in AMI.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(CodecError::Encode)
}

/// Deserializes a value previously produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_types::{Message, Value};
    use std::collections::BTreeMap;

    #[test]
    fn encode_decode_roundtrips() {
        let mut payload = BTreeMap::new();
        payload.insert("a".to_string(), Value::Scalar(1.0));
        let msg = Message::datagram(1, 2, payload);
        let bytes = encode(&msg).unwrap();
        let back: Message = decode(&bytes).unwrap();
        assert_eq!(msg, back);
    }
}
