/// Protocol version carried in the high nibble of header byte 0.
pub const PROTOCOL_VERSION: u8 = 0b0001;
/// Header length in 4-byte words carried in the low nibble of header byte 0.
pub const DEFAULT_HEADER_WORDS: u8 = 0b0001;

pub const HEADER_LEN: usize = 4;
pub const SEQUENCE_LEN: usize = 4;
pub const PAYLOAD_SIZE_LEN: usize = 4;
/// Smallest frame a peer can send: header plus payload size.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + PAYLOAD_SIZE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    FullRequest,
    AudioOnlyRequest,
    FullResponse,
    Ack,
    ErrorResponse,
}

impl MessageType {
    pub fn bits(self) -> u8 {
        match self {
            MessageType::FullRequest => 0b0001,
            MessageType::AudioOnlyRequest => 0b0010,
            MessageType::FullResponse => 0b1001,
            MessageType::Ack => 0b1011,
            MessageType::ErrorResponse => 0b1111,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b0001 => Some(MessageType::FullRequest),
            0b0010 => Some(MessageType::AudioOnlyRequest),
            0b1001 => Some(MessageType::FullResponse),
            0b1011 => Some(MessageType::Ack),
            0b1111 => Some(MessageType::ErrorResponse),
            _ => None,
        }
    }
}

/// Message-type specific flags (low nibble of header byte 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFlags {
    NoSequence,
    PositiveSequence,
    NegativeSequence,
    NegativeWithSequence,
}

impl TypeFlags {
    pub fn bits(self) -> u8 {
        match self {
            TypeFlags::NoSequence => 0b0000,
            TypeFlags::PositiveSequence => 0b0001,
            TypeFlags::NegativeSequence => 0b0010,
            TypeFlags::NegativeWithSequence => 0b0011,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b0000 => Some(TypeFlags::NoSequence),
            0b0001 => Some(TypeFlags::PositiveSequence),
            0b0010 => Some(TypeFlags::NegativeSequence),
            0b0011 => Some(TypeFlags::NegativeWithSequence),
            _ => None,
        }
    }

    /// Whether a signed 32-bit sequence field follows the header.
    pub fn has_sequence(self) -> bool {
        !matches!(self, TypeFlags::NoSequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    None,
    Json,
    Thrift,
}

impl Serialization {
    pub fn bits(self) -> u8 {
        match self {
            Serialization::None => 0b0000,
            Serialization::Json => 0b0001,
            Serialization::Thrift => 0b0011,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b0000 => Some(Serialization::None),
            0b0001 => Some(Serialization::Json),
            0b0011 => Some(Serialization::Thrift),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    pub fn bits(self) -> u8 {
        match self {
            Compression::None => 0b0000,
            Compression::Gzip => 0b0001,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b0000 => Some(Compression::None),
            0b0001 => Some(Compression::Gzip),
            _ => None,
        }
    }
}
