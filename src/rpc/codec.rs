//! Newline-delimited framing for the peer's stdio streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! peer that never terminates a line cannot make the reader buffer without
//! bound. Oversized and non-UTF-8 lines are reported as
//! [`Frame::Discarded`] instead of errors: a decoder error would end a
//! `FramedRead` stream, and the peer is allowed to interleave junk.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum inbound line length in bytes.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Why a line was dropped by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Longer than [`MAX_LINE_BYTES`]; the rest of the line is skipped.
    TooLong,
    /// Not valid UTF-8.
    InvalidUtf8,
}

/// One decoded unit of the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line without its terminator (`\n` or `\r\n`).
    Line(String),
    /// A line that could not be framed as text.
    Discarded(DiscardReason),
}

/// Line codec used on both directions of the peer connection.
///
/// The decoder yields [`Frame`]s and only fails on real I/O errors
/// ([`AppError::Io`]). The encoder writes `item\n`; the length cap is not
/// applied outbound.
#[derive(Debug)]
pub struct RpcCodec(LinesCodec);

impl RpcCodec {
    /// Create a codec with the [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_decoded(self.0.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        map_decoded(self.0.decode_eof(src))
    }
}

impl Encoder<String> for RpcCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0
            .encode(item, dst)
            .map_err(|err| AppError::Io(err.to_string()))
    }
}

fn map_decoded(
    decoded: std::result::Result<Option<String>, LinesCodecError>,
) -> Result<Option<Frame>> {
    match decoded {
        Ok(line) => Ok(line.map(Frame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => {
            Ok(Some(Frame::Discarded(DiscardReason::TooLong)))
        }
        // LinesCodec has already consumed the offending line at this point.
        Err(LinesCodecError::Io(err)) if err.kind() == io::ErrorKind::InvalidData => {
            Ok(Some(Frame::Discarded(DiscardReason::InvalidUtf8)))
        }
        Err(LinesCodecError::Io(err)) => Err(AppError::Io(err.to_string())),
    }
}
