//! Framed binary wire protocol: CRC, parser, and builders.

pub mod codec;
pub mod crc16;
pub mod frame;

pub use codec::{build_frame, build_response, CodecError};
pub use crc16::{crc16_ccitt, crc16_verify};
pub use frame::{Frame, FrameParser, ParserStats};
