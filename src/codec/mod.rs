//! Frame Codec
//!
//! Encoding and incremental decoding of the length-prefixed wire format:
//!
//! ```text
//! byte 0     : frame type (120 fixed length, reserved; 121 dynamic length)
//! bytes 1-4  : total length, i32 big-endian, header included
//! byte 5     : data type (1 command, 2 heart, 3 binary, 4 text, 5 json)
//! bytes 6-9  : checksum, only when total length > 6
//! bytes 10.. : payload, total length - 10 bytes
//! ```
//!
//! # Components
//!
//! - `Frame`: one message plus its encoder and signature check
//! - `FrameDecoder`: per-connection stateful decoder handling half and sticky packets
//! - `PackageCodec`: `tokio_util::codec` adapter around the decoder

pub use decoder::{DecodeStep, FrameDecoder, PendingHeader};
pub use frame::{
    data_sign, DataType, Frame, FrameType, FRAME_HEAD_LENGTH, MIN_SIGNED_PAYLOAD,
    SHORT_FRAME_LENGTH,
};
pub use framed::PackageCodec;

mod decoder;
mod frame;
mod framed;
