use std::fmt;
use thiserror::Error;

/// Tag bytes at or above this value are reserved for server responses.
pub const RESPONSE_TAG_THRESHOLD: u8 = 0x80;

/// Terminates every frame on the wire.
pub const FRAME_SENTINEL: u8 = b'\n';

/// Escape marker used inside frame values.
pub const ESCAPE_BYTE: u8 = b'\\';

/// Tag byte plus the two length bytes.
pub const HEADER_LEN: usize = 3;

/// Largest escaped value a frame can declare.
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Errors raised while encoding or decoding a single frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Frame too short: {len} bytes, need at least 3")]
    TooShort { len: usize },

    #[error("Declared length {declared} exceeds the {available} bytes available")]
    LengthMismatch { declared: usize, available: usize },

    #[error("Escaped value of {len} bytes does not fit a 65535 byte frame")]
    ValueTooLong { len: usize },

    #[error("Invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("Frame is missing its terminator")]
    MissingTerminator,

    #[error("Unexpected {count} trailing bytes after frame value")]
    TrailingBytes { count: usize },
}

/// Message types understood by client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Login = 0x00,
    ServerHello = 0x03,
    JoinSolo = 0x1D,
    HostGame = 0x1E,
    ListOpenGames = 0x1F,
    JoinGame = 0x20,
    PlayMove = 0x21,
    ListLegalMoves = 0x22,
    GameOver = 0x80,
    MoveReceived = 0x81,
    Ack = 0x82,
    Rejected = 0x83,
}

impl Tag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Tag::Login),
            0x03 => Some(Tag::ServerHello),
            0x1D => Some(Tag::JoinSolo),
            0x1E => Some(Tag::HostGame),
            0x1F => Some(Tag::ListOpenGames),
            0x20 => Some(Tag::JoinGame),
            0x21 => Some(Tag::PlayMove),
            0x22 => Some(Tag::ListLegalMoves),
            0x80 => Some(Tag::GameOver),
            0x81 => Some(Tag::MoveReceived),
            0x82 => Some(Tag::Ack),
            0x83 => Some(Tag::Rejected),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// True for server-to-client tags. The hello reply predates the
    /// response range and is listed explicitly.
    pub fn is_response(self) -> bool {
        self == Tag::ServerHello || self.as_byte() >= RESPONSE_TAG_THRESHOLD
    }

    /// Asynchronous notifications the server pushes outside a request.
    pub fn is_push(self) -> bool {
        matches!(self, Tag::MoveReceived | Tag::GameOver)
    }

    /// Requests whose payload is encrypted to the server before signing.
    pub fn is_encrypted_request(self) -> bool {
        matches!(self, Tag::PlayMove | Tag::ListLegalMoves)
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::Login => "login",
            Tag::ServerHello => "server_hello",
            Tag::JoinSolo => "join_solo",
            Tag::HostGame => "host_game",
            Tag::ListOpenGames => "list_open_games",
            Tag::JoinGame => "join_game",
            Tag::PlayMove => "play_move",
            Tag::ListLegalMoves => "list_legal_moves",
            Tag::GameOver => "game_over",
            Tag::MoveReceived => "move_received",
            Tag::Ack => "ack",
            Tag::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.as_byte())
    }
}

/// A decoded tag-length-value frame. The tag is kept as a raw byte so that
/// frames with unknown tags survive decoding and can be skipped by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn new(tag: Tag, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag: tag.as_byte(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> Option<Tag> {
        Tag::from_byte(self.tag)
    }

    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        encode(self.tag, &self.value)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FramingError> {
        decode(bytes)
    }
}

/// Replace every sentinel with `\n` and every backslash with `\\`.
pub fn escape(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for &byte in value {
        match byte {
            FRAME_SENTINEL => out.extend_from_slice(&[ESCAPE_BYTE, b'n']),
            ESCAPE_BYTE => out.extend_from_slice(&[ESCAPE_BYTE, ESCAPE_BYTE]),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape`].
pub fn unescape(escaped: &[u8]) -> Result<Vec<u8>, FramingError> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut iter = escaped.iter().enumerate();
    while let Some((offset, &byte)) = iter.next() {
        if byte != ESCAPE_BYTE {
            out.push(byte);
            continue;
        }
        match iter.next() {
            Some((_, &b'n')) => out.push(FRAME_SENTINEL),
            Some((_, &ESCAPE_BYTE)) => out.push(ESCAPE_BYTE),
            _ => return Err(FramingError::InvalidEscape { offset }),
        }
    }
    Ok(out)
}

/// Build a complete frame: tag, big-endian escaped length, escaped value, sentinel.
pub fn encode(tag: u8, value: &[u8]) -> Result<Vec<u8>, FramingError> {
    let escaped = escape(value);
    if escaped.len() > MAX_VALUE_LEN {
        return Err(FramingError::ValueTooLong { len: escaped.len() });
    }

    let len = escaped.len() as u16;
    let mut frame = Vec::with_capacity(HEADER_LEN + escaped.len() + 1);
    frame.push(tag);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&escaped);
    frame.push(FRAME_SENTINEL);
    Ok(frame)
}

/// Parse one frame. The trailing sentinel is optional.
pub fn decode(bytes: &[u8]) -> Result<Tlv, FramingError> {
    if bytes.len() < HEADER_LEN {
        return Err(FramingError::TooShort { len: bytes.len() });
    }

    let declared = declared_len(bytes);
    let body = &bytes[HEADER_LEN..];
    if declared > body.len() {
        return Err(FramingError::LengthMismatch {
            declared,
            available: body.len(),
        });
    }

    let (escaped, rest) = body.split_at(declared);
    match rest {
        [] | [FRAME_SENTINEL] => {}
        _ => return Err(FramingError::TrailingBytes { count: rest.len() }),
    }

    Ok(Tlv {
        tag: bytes[0],
        value: unescape(escaped)?,
    })
}

/// Length field of a buffer holding at least a full header.
pub(crate) fn declared_len(header: &[u8]) -> usize {
    u16::from_be_bytes([header[1], header[2]]) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let frame = encode(Tag::Ack.as_byte(), b"abc").unwrap();
        assert_eq!(frame, vec![0x82, 0x00, 0x03, b'a', b'b', b'c', b'\n']);
    }

    #[test]
    fn test_sentinel_is_escaped() {
        let frame = encode(Tag::Ack.as_byte(), b"a\nb").unwrap();
        assert_eq!(&frame[1..3], &[0x00, 0x04]);
        assert_eq!(&frame[3..7], b"a\\nb");
        assert_eq!(frame.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_round_trip_with_escape_lookalikes() {
        let values: [&[u8]; 7] = [
            b"",
            b"\n",
            b"\\",
            b"\\n",
            b"line one\nline two\n",
            b"\\\n\\\\n",
            &[0u8, 255, 10, 92, 110, 10],
        ];
        for value in values {
            let decoded = decode(&encode(0x21, value).unwrap()).unwrap();
            assert_eq!(decoded.tag, 0x21);
            assert_eq!(decoded.value, value);
        }
    }

    #[test]
    fn test_decode_without_terminator() {
        let decoded = decode(&[0x82, 0x00, 0x02, b'o', b'k']).unwrap();
        assert_eq!(decoded.kind(), Some(Tag::Ack));
        assert_eq!(decoded.value, b"ok");
    }

    #[test]
    fn test_decode_too_short() {
        assert_eq!(decode(&[0x82, 0x00]), Err(FramingError::TooShort { len: 2 }));
        assert_eq!(decode(&[]), Err(FramingError::TooShort { len: 0 }));
    }

    #[test]
    fn test_decode_length_exceeds_available() {
        let err = decode(&[0x82, 0x00, 0x05, b'a', b'b']).unwrap_err();
        assert_eq!(
            err,
            FramingError::LengthMismatch {
                declared: 5,
                available: 2
            }
        );
    }

    #[test]
    fn test_decode_rejects_dangling_escape() {
        let err = decode(&[0x82, 0x00, 0x02, b'a', b'\\']).unwrap_err();
        assert_eq!(err, FramingError::InvalidEscape { offset: 1 });

        let err = decode(&[0x82, 0x00, 0x02, b'\\', b'x']).unwrap_err();
        assert_eq!(err, FramingError::InvalidEscape { offset: 0 });
    }

    #[test]
    fn test_encode_rejects_oversized_value() {
        let value = vec![b'\n'; MAX_VALUE_LEN / 2 + 1];
        assert!(matches!(
            encode(0x82, &value),
            Err(FramingError::ValueTooLong { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_survives_decode() {
        let decoded = decode(&encode(0x55, b"x").unwrap()).unwrap();
        assert_eq!(decoded.tag, 0x55);
        assert_eq!(decoded.kind(), None);
    }

    #[test]
    fn test_tag_classification() {
        assert!(Tag::ServerHello.is_response());
        assert!(Tag::Rejected.is_response());
        assert!(!Tag::PlayMove.is_response());
        assert!(Tag::PlayMove.is_encrypted_request());
        assert!(!Tag::HostGame.is_encrypted_request());
        for byte in 0u8..=255 {
            if let Some(tag) = Tag::from_byte(byte) {
                assert_eq!(tag.as_byte(), byte);
            }
        }
    }
}
