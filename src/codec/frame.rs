// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::{self, Display, Formatter};

use bytes::Bytes;

use crate::buffer::ByteBuffer;
use crate::{AppError, AppResult};

/// Size of a header-only frame: type, total length and data type.
pub const SHORT_FRAME_LENGTH: i32 = 6;
/// Size of a full frame header: the short header plus the checksum.
pub const FRAME_HEAD_LENGTH: i32 = 10;
/// Payloads shorter than this carry the sentinel signature.
pub const MIN_SIGNED_PAYLOAD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// reserved, the decoder does not accept it
    FixedLength = 120,
    DynamicLength = 121,
}

impl TryFrom<u8> for FrameType {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            120 => Ok(FrameType::FixedLength),
            121 => Ok(FrameType::DynamicLength),
            other => Err(AppError::InvalidFrame(format!("unknown frame type {}", other))),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(value: FrameType) -> Self {
        value as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Command,
    Heart,
    Binary,
    Text,
    Json,
    /// 0 and 6..=255
    Reserved(u8),
}

impl From<u8> for DataType {
    fn from(value: u8) -> Self {
        match value {
            1 => DataType::Command,
            2 => DataType::Heart,
            3 => DataType::Binary,
            4 => DataType::Text,
            5 => DataType::Json,
            other => DataType::Reserved(other),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::Command => 1,
            DataType::Heart => 2,
            DataType::Binary => 3,
            DataType::Text => 4,
            DataType::Json => 5,
            DataType::Reserved(other) => other,
        }
    }
}

/// One application message on the wire.
///
/// ```text
/// type:1 | total_length:4 | data_type:1 | checksum:4 | payload:total_length-10
/// ```
///
/// The checksum and payload are only present when `total_length > 6`. A frame of exactly
/// six bytes is a short frame, which is how heartbeats travel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub total_length: i32,
    pub data_type: DataType,
    pub checksum: i32,
    pub payload: Option<Bytes>,
}

impl Frame {
    /// Builds a dynamic-length frame; the length and checksum are derived from `payload`.
    pub fn new(data_type: DataType, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let checksum = data_sign(Some(&payload));
        Frame {
            frame_type: FrameType::DynamicLength,
            total_length: FRAME_HEAD_LENGTH + payload.len() as i32,
            data_type,
            checksum,
            payload: Some(payload),
        }
    }

    pub fn heartbeat() -> Self {
        Frame {
            frame_type: FrameType::DynamicLength,
            total_length: SHORT_FRAME_LENGTH,
            data_type: DataType::Heart,
            checksum: 0,
            payload: None,
        }
    }

    /// Builds a frame from raw header values without deriving anything, so the result
    /// may well be rejected by [`Frame::encode`].
    pub fn from_parts(
        frame_type: FrameType,
        total_length: i32,
        data_type: DataType,
        checksum: i32,
        payload: Option<Bytes>,
    ) -> Self {
        Frame {
            frame_type,
            total_length,
            data_type,
            checksum,
            payload,
        }
    }

    pub fn is_short(&self) -> bool {
        self.total_length == SHORT_FRAME_LENGTH
    }

    pub fn is_heartbeat(&self) -> bool {
        self.data_type == DataType::Heart
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Declared payload length, 0 for short frames.
    pub fn data_length(&self) -> usize {
        if self.total_length <= SHORT_FRAME_LENGTH || self.payload.is_none() {
            return 0;
        }
        (self.total_length - FRAME_HEAD_LENGTH).max(0) as usize
    }

    /// Signature recomputed from the current payload.
    pub fn signature(&self) -> i32 {
        data_sign(self.payload.as_ref())
    }

    /// Checks the carried checksum against the recomputed signature.
    pub fn verify(&self) -> AppResult<()> {
        let actual = self.signature();
        if actual != self.checksum {
            return Err(AppError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Encodes the frame into wire bytes.
    ///
    /// Both frame types share the layout. Rejects a length below the short frame size, a short
    /// frame that carries a payload, a data type of 0 on a full frame, and a payload whose
    /// length disagrees with `total_length - 10`.
    pub fn encode(&self) -> AppResult<ByteBuffer> {
        if self.total_length < SHORT_FRAME_LENGTH {
            return Err(AppError::InvalidFrame(format!(
                "frame length {} less than {}",
                self.total_length, SHORT_FRAME_LENGTH
            )));
        }
        let mut buffer = ByteBuffer::new();
        if self.is_short() {
            if self.payload.is_some() {
                return Err(AppError::InvalidFrame(
                    "short frame must not carry a payload".to_string(),
                ));
            }
            buffer
                .write_u8(self.frame_type.into())
                .write_i32(self.total_length)
                .write_u8(self.data_type.into());
            return Ok(buffer);
        }
        if u8::from(self.data_type) == 0 {
            return Err(AppError::InvalidFrame(
                "data type 0 is reserved".to_string(),
            ));
        }
        let payload = self.payload();
        let expected = self.total_length as i64 - FRAME_HEAD_LENGTH as i64;
        if payload.len() as i64 != expected {
            return Err(AppError::InvalidFrame(format!(
                "payload length {} does not match frame length {}",
                payload.len(),
                self.total_length
            )));
        }
        buffer
            .write_u8(self.frame_type.into())
            .write_i32(self.total_length)
            .write_u8(self.data_type.into())
            .write_i32(self.checksum)
            .write_bytes(payload);
        Ok(buffer)
    }

    /// Encodes straight to an immutable byte string, ready for a socket write.
    pub fn to_bytes(&self) -> AppResult<Bytes> {
        Ok(self.encode()?.to_bytes())
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "Frame {{ type: {:?}, total_length: {}, data_type: {:?}, checksum: {}, payload: {} bytes }}",
            self.frame_type,
            self.total_length,
            self.data_type,
            self.checksum,
            self.data_length()
        )
    }
}

/// Lightweight payload signature.
///
/// No payload yields 0 and a payload shorter than 10 bytes yields 1. Otherwise the bytes at
/// `L/4` and `3L/4` are sampled and `[L/4, payload[L/4], 3L/4, payload[3L/4]]` (positions
/// truncated to a byte) is read as a big-endian i32.
pub fn data_sign(payload: Option<&Bytes>) -> i32 {
    let payload = match payload {
        None => return 0,
        Some(payload) => payload,
    };
    let len = payload.len();
    if len < MIN_SIGNED_PAYLOAD {
        return 1;
    }
    let first = len / 4;
    let second = len * 3 / 4;
    i32::from_be_bytes([first as u8, payload[first], second as u8, payload[second]])
}
