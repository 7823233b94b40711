//! Binary framing used by the speech gateway.
//!
//! Every frame starts with a 4-byte header:
//!
//! ```text
//! byte 0: version (4 bits)        | header length in words (4 bits)
//! byte 1: message type (4 bits)   | type flags (4 bits)
//! byte 2: serialization (4 bits)  | compression (4 bits)
//! byte 3: reserved (0)
//! ```
//!
//! followed by an optional big-endian `i32` sequence number, a big-endian `u32`
//! payload size and the payload itself.

pub mod consts;

pub use consts::{Compression, MessageType, Serialization, TypeFlags};
use consts::{
    DEFAULT_HEADER_WORDS, HEADER_LEN, MIN_FRAME_LEN, PAYLOAD_SIZE_LEN, PROTOCOL_VERSION,
    SEQUENCE_LEN,
};

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to serialize payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload of {0} bytes does not fit the size field")]
    PayloadTooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame truncated reading {field}: need {needed} bytes, have {available}")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("header length of zero words")]
    InvalidHeaderLength,
    #[error("unknown message type {0:#06b}")]
    UnknownMessageType(u8),
    #[error("unknown type flags {0:#06b}")]
    UnknownFlags(u8),
    #[error("unknown serialization {0:#06b}")]
    UnknownSerialization(u8),
    #[error("unknown compression {0:#06b}")]
    UnknownCompression(u8),
    #[error("gzip-compressed payloads are not supported")]
    CompressedPayload,
    #[error("invalid structured payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Payload of a decoded frame, interpreted by message type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured-text body of a full response (or request).
    Json(serde_json::Value),
    /// Raw audio bytes carried by an ack.
    Audio(Vec<u8>),
    /// Text of an error response.
    Error(String),
    /// Body of any other message type, passed through untouched.
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    version: u8,
    header_words: u8,
    message_type: MessageType,
    flags: TypeFlags,
    serialization: Serialization,
    compression: Compression,
    sequence: Option<i32>,
    payload: Payload,
    is_last: bool,
}

impl Frame {
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn header_words(&self) -> u8 {
        self.header_words
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    pub fn serialization(&self) -> Serialization {
        self.serialization
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn sequence(&self) -> Option<i32> {
        self.sequence
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// True for error responses and for any frame whose sequence is negative.
    pub fn is_last(&self) -> bool {
        self.is_last
    }
}

fn header(
    message_type: MessageType,
    flags: TypeFlags,
    serialization: Serialization,
    compression: Compression,
) -> [u8; HEADER_LEN] {
    [
        (PROTOCOL_VERSION << 4) | DEFAULT_HEADER_WORDS,
        (message_type.bits() << 4) | flags.bits(),
        (serialization.bits() << 4) | compression.bits(),
        0,
    ]
}

fn payload_size(len: usize) -> Result<[u8; PAYLOAD_SIZE_LEN], EncodeError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| EncodeError::PayloadTooLarge(len))
}

/// Encodes a full-request frame. Full requests never carry a sequence field;
/// the session counter still accounts for them (see `client::Sequence`).
pub fn encode_full_request<T: serde::Serialize>(payload: &T) -> Result<Vec<u8>, EncodeError> {
    let body = serde_json::to_vec(payload)?;
    let size = payload_size(body.len())?;

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + body.len());
    frame.extend_from_slice(&header(
        MessageType::FullRequest,
        TypeFlags::NoSequence,
        Serialization::Json,
        Compression::None,
    ));
    frame.extend_from_slice(&size);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Encodes an audio-only frame. `sequence` is the magnitude; it is negated on
/// the wire when `is_final` is set.
pub fn encode_audio_frame(
    audio: &[u8],
    sequence: i32,
    is_final: bool,
) -> Result<Vec<u8>, EncodeError> {
    let (flags, sequence) = if is_final {
        (TypeFlags::NegativeWithSequence, -sequence.saturating_abs())
    } else {
        (TypeFlags::PositiveSequence, sequence.saturating_abs())
    };
    let size = payload_size(audio.len())?;

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + SEQUENCE_LEN + audio.len());
    frame.extend_from_slice(&header(
        MessageType::AudioOnlyRequest,
        flags,
        Serialization::None,
        Compression::None,
    ));
    frame.extend_from_slice(&sequence.to_be_bytes());
    frame.extend_from_slice(&size);
    frame.extend_from_slice(audio);
    Ok(frame)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.bytes.len().saturating_sub(self.position);
        if available < len {
            return Err(DecodeError::Truncated { field, needed: len, available });
        }
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn take_4(&mut self, field: &'static str) -> Result<[u8; 4], DecodeError> {
        let slice = self.take(field, 4)?;
        Ok([slice[0], slice[1], slice[2], slice[3]])
    }
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, DecodeError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(DecodeError::Truncated {
            field: "header",
            needed: MIN_FRAME_LEN,
            available: bytes.len(),
        });
    }

    let version = bytes[0] >> 4;
    let header_words = bytes[0] & 0x0F;
    if header_words == 0 {
        return Err(DecodeError::InvalidHeaderLength);
    }
    let message_type = MessageType::from_bits(bytes[1] >> 4)
        .ok_or(DecodeError::UnknownMessageType(bytes[1] >> 4))?;
    let flags = TypeFlags::from_bits(bytes[1] & 0x0F)
        .ok_or(DecodeError::UnknownFlags(bytes[1] & 0x0F))?;
    let serialization = Serialization::from_bits(bytes[2] >> 4)
        .ok_or(DecodeError::UnknownSerialization(bytes[2] >> 4))?;
    let compression = Compression::from_bits(bytes[2] & 0x0F)
        .ok_or(DecodeError::UnknownCompression(bytes[2] & 0x0F))?;

    let mut cursor = Cursor { bytes, position: 0 };
    cursor.take("header", usize::from(header_words) * 4)?;

    let sequence = if flags.has_sequence() {
        Some(i32::from_be_bytes(cursor.take_4("sequence")?))
    } else {
        None
    };
    let size = u32::from_be_bytes(cursor.take_4("payload size")?) as usize;
    let body = cursor.take("payload", size)?;

    if compression == Compression::Gzip {
        return Err(DecodeError::CompressedPayload);
    }

    let mut is_last = sequence.is_some_and(|seq| seq < 0);
    let payload = match message_type {
        MessageType::FullResponse | MessageType::FullRequest
            if serialization == Serialization::Json =>
        {
            if body.is_empty() {
                Payload::Json(serde_json::Value::Null)
            } else {
                Payload::Json(serde_json::from_slice(body)?)
            }
        }
        MessageType::Ack => Payload::Audio(body.to_vec()),
        MessageType::ErrorResponse => {
            is_last = true;
            Payload::Error(String::from_utf8_lossy(body).into_owned())
        }
        _ => Payload::Raw(body.to_vec()),
    };

    Ok(Frame {
        version,
        header_words,
        message_type,
        flags,
        serialization,
        compression,
        sequence,
        payload,
        is_last,
    })
}
