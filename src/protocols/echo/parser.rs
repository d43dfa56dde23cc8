//! Echo probe framing.

use bytes::{Buf, BytesMut};

/// Byte that terminates a probe frame. Never part of a payload or a reply.
pub const SENTINEL: u8 = 0xFF;

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete frame; the sentinel has been consumed and dropped.
    Complete(BytesMut),
    /// No sentinel yet.
    Incomplete,
    /// Buffered bytes exceed the frame limit without a sentinel.
    TooLarge,
}

/// Incremental sentinel search over a growing read buffer.
///
/// Bytes already searched without finding a sentinel are not searched again,
/// so an unterminated frame costs linear time however it is split across reads.
#[derive(Debug)]
pub struct FrameParser {
    max_frame: usize,
    searched: usize,
}

impl FrameParser {
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame,
            searched: 0,
        }
    }

    /// Split the next complete probe off the front of `buffer`.
    ///
    /// `buffer` must only grow at the back between calls that return
    /// `Incomplete`.
    pub fn parse(&mut self, buffer: &mut BytesMut) -> ParseResult {
        let start = self.searched.min(buffer.len());
        match buffer[start..].iter().position(|&b| b == SENTINEL) {
            Some(offset) => {
                let pos = start + offset;
                if pos > self.max_frame {
                    return ParseResult::TooLarge;
                }
                let payload = buffer.split_to(pos);
                buffer.advance(1);
                self.searched = 0;
                ParseResult::Complete(payload)
            }
            None => {
                self.searched = buffer.len();
                if buffer.len() > self.max_frame {
                    ParseResult::TooLarge
                } else {
                    ParseResult::Incomplete
                }
            }
        }
    }
}

/// Encode a probe request: payload followed by the sentinel.
pub fn request(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(SENTINEL);
    out
}
