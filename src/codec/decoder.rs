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

use tracing::{debug, error, trace, warn};

use super::frame::{DataType, Frame, FrameType, FRAME_HEAD_LENGTH, SHORT_FRAME_LENGTH};
use crate::buffer::ByteBuffer;
use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// Progress of the decoder on the frame at the head of the staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeStep {
    #[default]
    Fresh,
    TypeRead,
    LengthTypeRead,
    Complete,
    Partial,
    Invalid,
}

/// Header of the frame the decoder is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingHeader {
    pub frame_type: FrameType,
    pub total_length: i32,
    pub data_type: DataType,
}

/// Incremental decoder for one byte stream.
///
/// Every call to [`FrameDecoder::decode`] appends a chunk to the staging buffer and pulls out
/// as many complete frames as the buffered bytes allow. A frame split across reads stays
/// buffered until its last byte arrives; frames coalesced in one read all come out of the
/// same call, in order.
///
/// A leading byte that is not a dynamic-length frame type, or a header whose declared length
/// cannot be a valid frame, costs exactly that one byte: it is skipped and decoding resumes on
/// the next byte. Frames whose checksum does not match their payload are dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    staging: ByteBuffer,
    pending: Option<PendingHeader>,
    step: DecodeStep,
    dropped_frames: u64,
    skipped_bytes: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder::default()
    }

    pub fn step(&self) -> DecodeStep {
        self.step
    }

    /// Bytes held back for the next call.
    pub fn buffered_bytes(&self) -> usize {
        self.staging.readable_bytes()
    }

    pub fn pending_header(&self) -> Option<PendingHeader> {
        self.pending
    }

    /// Number of complete frames discarded because their checksum did not match.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Number of bytes skipped while resynchronizing on a bad header.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Forgets all buffered bytes and partial state.
    pub fn reset(&mut self) {
        self.staging.clear();
        self.pending = None;
        self.step = DecodeStep::Fresh;
    }

    /// Feeds a newly arrived chunk and returns every frame it completes, in arrival order.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.staging.write_bytes(chunk);
        let mut frames = Vec::new();
        loop {
            match self.parse() {
                Ok(Some(frame)) => match frame.verify() {
                    Ok(()) => frames.push(frame),
                    Err(e) => {
                        self.dropped_frames += 1;
                        warn!("dropping frame {}: {}", frame, e);
                    }
                },
                Ok(None) => break,
                Err(AppError::InvalidFrame(reason)) => {
                    self.skipped_bytes += 1;
                    debug!("skipping one byte to resync: {}", reason);
                }
                Err(e) => {
                    // the header checks guarantee enough bytes for every read
                    error!("decoder failed on buffered bytes: {}", e);
                    self.reset();
                    break;
                }
            }
        }
        frames
    }

    /// One decode attempt on the head of the staging buffer, followed by compaction.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    fn parse(&mut self) -> AppResult<Option<Frame>> {
        let result = self.parse_attempt();
        self.staging.discard_read_bytes();
        match result {
            Ok(frame) => Ok(Some(frame)),
            Err(Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn parse_attempt(&mut self) -> AppResult<Frame> {
        if self.staging.readable_bytes() < SHORT_FRAME_LENGTH as usize {
            return Err(Incomplete);
        }
        let start = self.staging.reader_index();
        if self.step == DecodeStep::Complete || self.step == DecodeStep::Invalid {
            self.step = DecodeStep::Fresh;
        }

        let frame_type = match FrameType::try_from(self.staging.read_u8()?) {
            Ok(FrameType::DynamicLength) => FrameType::DynamicLength,
            Ok(FrameType::FixedLength) => {
                return Err(self.reject(start, "fixed-length frames are not supported".into()));
            }
            Err(AppError::InvalidFrame(reason)) => return Err(self.reject(start, reason)),
            Err(e) => return Err(e),
        };
        self.step = DecodeStep::TypeRead;

        let total_length = self.staging.read_i32()?;
        let data_type = DataType::from(self.staging.read_u8()?);
        self.step = DecodeStep::LengthTypeRead;
        trace!(
            "frame header: type={:?}, total_length={}, data_type={:?}",
            frame_type,
            total_length,
            data_type
        );

        if total_length < SHORT_FRAME_LENGTH
            || (total_length > SHORT_FRAME_LENGTH && total_length < FRAME_HEAD_LENGTH)
        {
            return Err(self.reject(
                start,
                format!("frame length {} is not a valid frame size", total_length),
            ));
        }

        if total_length == SHORT_FRAME_LENGTH {
            self.complete();
            return Ok(Frame::from_parts(
                frame_type,
                total_length,
                data_type,
                0,
                None,
            ));
        }

        self.pending = Some(PendingHeader {
            frame_type,
            total_length,
            data_type,
        });
        if self.staging.readable_bytes() < 4 {
            return Err(self.stall(start));
        }
        let checksum = self.staging.read_i32()?;
        let payload_length = (total_length - FRAME_HEAD_LENGTH) as usize;
        if self.staging.readable_bytes() < payload_length {
            return Err(self.stall(start));
        }
        let payload = self.staging.read_bytes(payload_length)?;
        self.complete();
        Ok(Frame::from_parts(
            frame_type,
            total_length,
            data_type,
            checksum,
            Some(payload),
        ))
    }

    fn complete(&mut self) {
        self.step = DecodeStep::Complete;
        self.pending = None;
    }

    /// Half packet: rewind to the start of the attempt and wait for more bytes.
    fn stall(&mut self, start: usize) -> AppError {
        self.staging.set_reader_index(start);
        self.step = DecodeStep::Partial;
        trace!(
            "half packet, {} bytes buffered for {:?}",
            self.staging.readable_bytes(),
            self.pending
        );
        Incomplete
    }

    /// Bad header: rewind, then drop the single leading byte so the next attempt starts one
    /// byte later.
    fn reject(&mut self, start: usize, reason: String) -> AppError {
        self.staging.set_reader_index(start + 1);
        self.step = DecodeStep::Invalid;
        self.pending = None;
        AppError::InvalidFrame(reason)
    }
}
