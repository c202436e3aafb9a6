//! Line framing for every tether socket.
//!
//! Agents, bridge clients and the agent runtime all speak one message per
//! `\n`. A `\r` before the newline is dropped. A peer that never sends a
//! newline is cut off at [`MAX_LINE_BYTES`] instead of growing the read
//! buffer.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Longest inbound line, in bytes, before the connection is treated as broken.
pub const MAX_LINE_BYTES: usize = 65_536;

/// `FramedRead`/`FramedWrite` codec for tether messages.
///
/// Oversized lines surface as [`AppError::Protocol`]; socket failures as
/// [`AppError::Transport`]. Outbound lines are not length-checked.
#[derive(Debug)]
pub struct WireCodec(LinesCodec);

impl WireCodec {
    /// Codec capped at [`MAX_LINE_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        self.0.decode(src).map_err(into_app_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        self.0.decode_eof(src).map_err(into_app_error)
    }
}

impl Encoder<String> for WireCodec {
    type Error = AppError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(line, dst).map_err(into_app_error)
    }
}

fn into_app_error(err: LinesCodecError) -> AppError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => AppError::Protocol(format!(
            "line too long: exceeded {MAX_LINE_BYTES} bytes"
        )),
        LinesCodecError::Io(err) => AppError::Transport(err.to_string()),
    }
}
