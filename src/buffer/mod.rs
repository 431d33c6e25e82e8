//! Growable byte buffer
//!
//! A byte-array-backed container with independent read and write cursors. It is the staging
//! area the frame decoder accumulates stream bytes in, and the output the frame encoder writes
//! to. Capacity grows in fixed chunks and can be compacted with `discard_read_bytes`, so a
//! long-lived connection streams without unbounded growth.

pub use byte_buffer::{ByteBuffer, BUFFER_CHUNK_SIZE};

mod byte_buffer;
