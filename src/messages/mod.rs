pub mod tlv;
pub mod types;
pub mod wire;

pub use tlv::{decode, encode, FramingError, Tag, Tlv, RESPONSE_TAG_THRESHOLD};
pub use types::{GameOverNotice, LoginProfile, MoveNotice, PayloadError};
pub use wire::{FrameReader, FrameWriter, WireConfig, WireProtocolError, MAX_FRAME_SIZE};
