//! Per-transport message boundary detection (spec.md §4.1 "Framing").

use bytes::{Bytes, BytesMut};

use crate::error::Error;
use crate::parser::message::find_header_end;

/// Default maximum message size, overridable by the transport's
/// configuration (spec.md §6 "Message size").
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// One UDP datagram is at most one SIP message (spec.md §4.1). Oversize
/// datagrams are the caller's responsibility to answer with 413.
pub fn frame_datagram(datagram: &[u8], max_size: usize) -> Result<&[u8], Error> {
    if datagram.len() > max_size {
        return Err(Error::MessageTooLarge {
            max: max_size,
            actual: datagram.len(),
        });
    }
    Ok(datagram)
}

/// Accumulates bytes from a TCP/TLS stream across arbitrary fragmentation
/// boundaries and yields complete messages as soon as the header block and
/// `Content-Length` bytes of body are available (spec.md §4.1 "Stream").
#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: BytesMut,
    max_size: usize,
}

impl StreamFramer {
    pub fn new(max_size: usize) -> Self {
        StreamFramer {
            buf: BytesMut::new(),
            max_size,
        }
    }

    /// Feed newly-received bytes into the accumulator.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pull as many complete messages as are currently buffered. Partial
    /// buffers are retained until the next `feed` (spec.md §4.1).
    pub fn drain_messages(&mut self) -> Result<Vec<Bytes>, Error> {
        let mut out = Vec::new();
        loop {
            let Some(header_end) = find_header_end(&self.buf) else {
                if self.buf.len() > self.max_size {
                    return Err(Error::MessageTooLarge {
                        max: self.max_size,
                        actual: self.buf.len(),
                    });
                }
                break;
            };
            let content_length = content_length_of(&self.buf[..header_end]);
            let total_len = header_end + content_length;
            if total_len > self.max_size {
                return Err(Error::MessageTooLarge {
                    max: self.max_size,
                    actual: total_len,
                });
            }
            if self.buf.len() < total_len {
                break;
            }
            let message = self.buf.split_to(total_len).freeze();
            out.push(message);
        }
        Ok(out)
    }
}

fn content_length_of(header_bytes: &[u8]) -> usize {
    let text = String::from_utf8_lossy(header_bytes);
    for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") || name == "l" {
                return value.trim().parse().unwrap_or(0);
            }
        }
    }
    0
}

/// Reassembles fragmented WebSocket TEXT/BINARY frames into one complete
/// SIP message payload (spec.md §4.1 "WebSocket"). The channel is
/// responsible for telling us when a fragment sequence is complete (the
/// `fin` bit); this type only concatenates.
#[derive(Debug, Default)]
pub struct WsFrameReassembler {
    pending: BytesMut,
}

impl WsFrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. When `fin` is true the accumulated payload is
    /// returned as one complete WS message and the reassembler resets.
    pub fn push_fragment(&mut self, data: &[u8], fin: bool) -> Option<Bytes> {
        self.pending.extend_from_slice(data);
        if fin {
            Some(self.pending.split().freeze())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(body: &str) -> Vec<u8> {
        format!(
            "OPTIONS sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/TCP h;branch=z9hG4bK1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .into_bytes()
    }

    #[test]
    fn drains_multiple_messages_across_fragments() {
        let mut framer = StreamFramer::new(DEFAULT_MAX_MESSAGE_SIZE);
        let whole = [msg("one"), msg("two"), msg("three")].concat();
        // Simulate arbitrary fragmentation.
        for chunk in whole.chunks(7) {
            framer.feed(chunk);
        }
        let messages = framer.drain_messages().unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn retains_partial_buffer_until_complete() {
        let mut framer = StreamFramer::new(DEFAULT_MAX_MESSAGE_SIZE);
        let whole = msg("hello");
        framer.feed(&whole[..whole.len() - 2]);
        assert!(framer.drain_messages().unwrap().is_empty());
        framer.feed(&whole[whole.len() - 2..]);
        assert_eq!(framer.drain_messages().unwrap().len(), 1);
    }

    #[test]
    fn ws_reassembler_joins_fragments() {
        let mut r = WsFrameReassembler::new();
        assert!(r.push_fragment(b"hel", false).is_none());
        assert!(r.push_fragment(b"lo", false).is_none());
        let whole = r.push_fragment(b"!", true).unwrap();
        assert_eq!(&whole[..], b"hello!");
    }
}
