// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! CBOR framing helpers for session messages.

use thiserror::Error;

use crate::Message;

/// Errors produced while framing or parsing packets.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ends before the advertised frame does. Read more bytes
    /// and retry; this is not a protocol violation.
    #[error("incomplete frame")]
    Incomplete,
    /// A message too large for the u32 length prefix.
    #[error("frame of {len} bytes exceeds the length prefix")]
    FrameTooLarge {
        /// Size of the encoded message body.
        len: usize,
    },
    /// CBOR encoding failed.
    #[error("encode: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// CBOR decoding failed.
    #[error("decode: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

/// Serialize a message to CBOR bytes.
pub fn to_cbor(msg: &Message) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(msg, &mut out)?;
    Ok(out)
}

/// Deserialize a message from CBOR bytes.
pub fn from_cbor(bytes: &[u8]) -> Result<Message, WireError> {
    Ok(ciborium::de::from_reader(bytes)?)
}

/// Framing for one packet: len (u32, BE) + CBOR payload. Packets are built
/// and consumed as byte slices; this type only namespaces the codec.
pub struct Packet;

impl Packet {
    /// Encode a [`Message`] into a length-prefixed CBOR packet.
    pub fn encode(msg: &Message) -> Result<Vec<u8>, WireError> {
        let body = to_cbor(msg)?;
        let len = u32::try_from(body.len())
            .map_err(|_| WireError::FrameTooLarge { len: body.len() })?;
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode one packet from `stream`, returning the message and the bytes
    /// consumed. [`WireError::Incomplete`] means "wait for more bytes".
    pub fn decode(stream: &[u8]) -> Result<(Message, usize), WireError> {
        if stream.len() < 4 {
            return Err(WireError::Incomplete);
        }
        let len = u32::from_be_bytes([stream[0], stream[1], stream[2], stream[3]]) as usize;
        if stream.len() < 4 + len {
            return Err(WireError::Incomplete);
        }
        let msg = from_cbor(&stream[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
