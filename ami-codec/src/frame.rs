//! Length-prefixed framing for a single envelope on the wire.
//!
//! Modeled on `communication::networking::MessageHeader`: a fixed set of
//! numeric fields (there: `channel`/`source`/`target`/`length`/`seqno`) read
//! off the front of the stream before the payload. This version renames
//! `target` away (point-to-point framing doesn't need it once delivery is
//! topic-addressed) and keeps `length`/`seqno` for the same reasons the
//! teacher does: knowing how many bytes to read, and detecting reordering
//! or drops on a connection.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::{decode, encode, CodecError, MAX_FRAME_BYTES};

/// Framing metadata for one [`Frame`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Which logical channel this frame belongs to.
    pub channel: Channel,
    /// Identity of the sending process.
    pub source: u64,
    /// Number of bytes in the frame's body.
    pub length: u64,
    /// Monotonically increasing per-connection sequence number.
    pub seqno: u64,
}

/// One `[topic, header, body]` envelope, per spec.md §6.
///
/// `body` holds an already-[`crate::encode`]d payload; `Frame` itself only
/// carries it, it does not know the payload's Rust type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub header: FrameHeader,
    pub topic: String,
    pub body: Vec<u8>,
}

impl Frame {
    /// Builds a frame carrying an already-encoded body.
    pub fn new(channel: Channel, source: u64, seqno: u64, topic: impl Into<String>, body: Vec<u8>) -> Self {
        let length = body.len() as u64;
        Frame { header: FrameHeader { channel, source, length, seqno }, topic: topic.into(), body }
    }

    /// Encodes `payload` and wraps it in a frame.
    pub fn encode<T: Serialize>(
        channel: Channel,
        source: u64,
        seqno: u64,
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, CodecError> {
        Ok(Frame::new(channel, source, seqno, topic, encode(payload)?))
    }

    /// Decodes the frame's body as `T`.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, CodecError> {
        decode(&self.body)
    }
}

/// Writes `frame` to `writer` as a 4-byte little-endian length prefix
/// followed by the bincode-serialized [`Frame`].
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<(), CodecError> {
    let bytes = encode(frame)?;
    if bytes.len() as u64 > MAX_FRAME_BYTES {
        return Err(CodecError::TooLarge(bytes.len() as u64));
    }
    writer.write_u32::<LittleEndian>(bytes.len() as u32)?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Reads one frame from `reader`.
///
/// Returns `Ok(None)` if the stream is at a clean boundary (zero bytes
/// available before the length prefix); any other truncation is an error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>, CodecError> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len as u64 > MAX_FRAME_BYTES {
        return Err(CodecError::TooLarge(len as u64));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    let frame: Frame = decode(&buf)?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_types::Value;

    #[test]
    fn frame_roundtrips_through_a_cursor() {
        let frame = Frame::encode(Channel::Export, 7, 1, "store", &Value::Scalar(42.0)).unwrap();
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).unwrap();

        let mut cursor = io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor).unwrap().expect("frame present");
        assert_eq!(read_back.topic, "store");
        let value: Value = read_back.decode().unwrap();
        assert_eq!(value, Value::Scalar(42.0));
    }

    #[test]
    fn read_frame_on_empty_stream_is_none() {
        let mut cursor = io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>((MAX_FRAME_BYTES + 1) as u32).unwrap();
        let mut cursor = io::Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor), Err(CodecError::TooLarge(_))));
    }
}
