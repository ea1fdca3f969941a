//! Tokio codec for the agent line stream

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{AgentFrame, AgentRequest, LINE_DELIMITER};

/// Codec that reassembles agent replies into lines and writes requests
///
/// The decoder keeps any trailing partial line in the read buffer until its
/// delimiter arrives. Blank lines are skipped. A partial line still pending
/// when the stream ends is discarded, never emitted.
#[derive(Debug, Default)]
pub struct AgentLineCodec {
    /// Offset already scanned for a delimiter, so repeated partial reads
    /// do not rescan the same bytes
    next_index: usize,
}

impl AgentLineCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self { next_index: 0 }
    }
}

impl Decoder for AgentLineCodec {
    type Item = AgentFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..]
                .iter()
                .position(|b| *b == LINE_DELIMITER)
            else {
                // Need more data
                self.next_index = src.len();
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            self.next_index = 0;

            let line = src.split_to(line_end + 1);
            let text = String::from_utf8_lossy(&line[..line_end]);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Ok(Some(AgentFrame::from_line(trimmed)));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if !src.is_empty() {
            tracing::debug!(
                "Agent stream ended with {} bytes of unterminated line, discarding",
                src.len()
            );
            src.advance(src.len());
        }
        self.next_index = 0;
        Ok(None)
    }
}

impl Encoder<AgentRequest> for AgentLineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, request: AgentRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = request.to_line()?;
        dst.reserve(line.len());
        dst.put_slice(line.as_bytes());
        Ok(())
    }
}
