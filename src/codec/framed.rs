use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::{Frame, FrameDecoder};
use crate::{AppError, AppResult, ConnectionErrorKind};

/// Adapts [`FrameDecoder`] to `tokio_util::codec`, so a `FramedRead` or `Framed` can drive it.
///
/// Bytes are moved out of the read buffer as soon as they arrive; frames completed by one
/// read are queued and handed out one per `decode` call.
#[derive(Debug, Default)]
pub struct PackageCodec {
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
}

impl PackageCodec {
    pub fn new() -> Self {
        PackageCodec::default()
    }

    pub fn frame_decoder(&self) -> &FrameDecoder {
        &self.decoder
    }
}

impl Decoder for PackageCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> AppResult<Option<Frame>> {
        if !src.is_empty() {
            let chunk = src.split();
            self.ready.extend(self.decoder.decode(&chunk));
        }
        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> AppResult<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.decoder.buffered_bytes() > 0 {
            // peer closed the connection while sending a frame
            let buffered = self.decoder.buffered_bytes();
            self.decoder.reset();
            tracing::debug!("stream ended with {} undecoded bytes", buffered);
            return Err(AppError::connection_with(
                ConnectionErrorKind::ClosedByPeer,
                "connection closed in the middle of a frame",
            ));
        }
        Ok(None)
    }
}

impl Encoder<Frame> for PackageCodec {
    type Error = AppError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> AppResult<()> {
        let encoded = item.encode()?;
        dst.extend_from_slice(encoded.readable_slice());
        Ok(())
    }
}
