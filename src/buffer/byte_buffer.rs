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

use std::fmt;

use bytes::{Buf, Bytes};

use crate::{AppError, AppResult};

/// Capacity grows in multiples of this many bytes.
pub const BUFFER_CHUNK_SIZE: usize = 256;

/// A growable byte container with independent read and write cursors.
///
/// Bytes in `0..reader_index` have been consumed, bytes in `reader_index..writer_index` are
/// readable, and `writer_index..capacity` is free space. Writes grow the backing storage in
/// [`BUFFER_CHUNK_SIZE`] steps and never lose unread data. Reads that ask for more than is
/// readable fail with [`AppError::Underflow`] and leave the cursors untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    reader_index: usize,
    writer_index: usize,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        ByteBuffer::new()
    }
}

impl ByteBuffer {
    pub fn new() -> Self {
        ByteBuffer::with_capacity(BUFFER_CHUNK_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            data: vec![0; capacity],
            reader_index: 0,
            writer_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    pub fn writer_index(&self) -> usize {
        self.writer_index
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer_index - self.reader_index
    }

    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.writer_index
    }

    /// Moves the read cursor. Positions past `writer_index` are clamped to it, which leaves
    /// nothing readable.
    pub fn set_reader_index(&mut self, position: usize) -> &mut Self {
        self.reader_index = position.min(self.writer_index);
        self
    }

    /// Resets both cursors. The old content stays in the backing storage until overwritten.
    pub fn clear(&mut self) -> &mut Self {
        self.reader_index = 0;
        self.writer_index = 0;
        self
    }

    /// Moves the unread suffix to offset 0 and rewinds both cursors accordingly.
    pub fn discard_read_bytes(&mut self) {
        if self.reader_index == 0 {
            return;
        }
        let readable = self.readable_bytes();
        self.data
            .copy_within(self.reader_index..self.writer_index, 0);
        self.reader_index = 0;
        self.writer_index = readable;
    }

    /// Slice view of the readable region.
    pub fn readable_slice(&self) -> &[u8] {
        &self.data[self.reader_index..self.writer_index]
    }

    /// Copy of the readable region. The cursors do not move.
    pub fn readable_bytes_array(&self) -> Vec<u8> {
        self.readable_slice().to_vec()
    }

    /// Copy of everything written so far, including bytes already read.
    pub fn read_all_write_bytes_array(&self) -> Vec<u8> {
        self.data[..self.writer_index].to_vec()
    }

    /// Copies the readable region into an immutable [`Bytes`] without moving the cursors.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.readable_slice())
    }

    fn ensure_readable(&self, requested: usize) -> AppResult<()> {
        let readable = self.readable_bytes();
        if readable < requested {
            return Err(AppError::Underflow {
                requested,
                readable,
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> AppResult<u8> {
        self.ensure_readable(1)?;
        let b = self.data[self.reader_index];
        self.reader_index += 1;
        Ok(b)
    }

    pub fn read_i32(&mut self) -> AppResult<i32> {
        self.ensure_readable(4)?;
        let start = self.reader_index;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[start..start + 4]);
        self.reader_index += 4;
        Ok(i32::from_be_bytes(raw))
    }

    /// Reads exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> AppResult<Bytes> {
        self.ensure_readable(len)?;
        let start = self.reader_index;
        let bytes = Bytes::copy_from_slice(&self.data[start..start + len]);
        self.reader_index += len;
        Ok(bytes)
    }

    /// Grows the backing storage so that `additional` more bytes fit after `writer_index`.
    ///
    /// The new capacity is the smallest multiple of [`BUFFER_CHUNK_SIZE`] that covers
    /// `writer_index + additional`.
    fn ensure_writable(&mut self, additional: usize) {
        if self.writable_bytes() >= additional {
            return;
        }
        let required = self.writer_index + additional;
        let new_capacity = required.div_ceil(BUFFER_CHUNK_SIZE) * BUFFER_CHUNK_SIZE;
        self.data.resize(new_capacity, 0);
    }

    pub fn write_u8(&mut self, b: u8) -> &mut Self {
        self.ensure_writable(1);
        self.data[self.writer_index] = b;
        self.writer_index += 1;
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_bytes(&mut self, src: &[u8]) -> &mut Self {
        self.ensure_writable(src.len());
        let start = self.writer_index;
        self.data[start..start + src.len()].copy_from_slice(src);
        self.writer_index += src.len();
        self
    }

    /// Moves every readable byte of `src` into this buffer, leaving `src` fully read.
    pub fn write_bytes_from(&mut self, src: &mut ByteBuffer) -> &mut Self {
        self.write_bytes(src.readable_slice());
        src.reader_index = src.writer_index;
        self
    }

    /// Moves the first `len` readable bytes of `src` into this buffer.
    pub fn write_bytes_from_len(&mut self, src: &mut ByteBuffer, len: usize) -> AppResult<()> {
        src.ensure_readable(len)?;
        let start = src.reader_index;
        self.write_bytes(&src.data[start..start + len]);
        src.reader_index += len;
        Ok(())
    }
}

impl Buf for ByteBuffer {
    fn remaining(&self) -> usize {
        self.readable_bytes()
    }

    fn chunk(&self) -> &[u8] {
        self.readable_slice()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.readable_bytes(),
            "cannot advance past writer_index: {} > {}",
            cnt,
            self.readable_bytes()
        );
        self.reader_index += cnt;
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(src: &[u8]) -> Self {
        let mut buffer = ByteBuffer::new();
        buffer.write_bytes(src);
        buffer
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("reader_index", &self.reader_index)
            .field("writer_index", &self.writer_index)
            .field("capacity", &self.data.len())
            .finish()
    }
}
