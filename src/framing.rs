//! Length-prefixed framing for history artifacts
//!
//! Backward-log records and forward-stack snapshots share one layout: a
//! header line carrying the path key and the exact byte length of the body,
//! the body itself, and a trailer.
//!
//! ```text
//! --- VERSION notes.txt 23 ---
//! <23 bytes of patch text>
//!
//! --- FORWARD VERSION notes.txt 5 ---
//! hello
//! --- END FORWARD VERSION ---
//! ```
//!
//! The parser never looks for markers inside a body; it skips exactly the
//! declared length. A body may therefore contain marker lines, trailing
//! newlines or anything else. If a header or trailer does not check out the
//! artifact is considered to end at the previous frame.

use tracing::warn;

/// Frame layout for one artifact kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameKind {
    /// Header prefix, before the key
    pub tag: &'static str,
    /// Bytes expected right after the body
    pub trailer: &'static str,
}

/// Backward-log record frames
pub const VERSION_FRAME: FrameKind = FrameKind {
    tag: "--- VERSION ",
    trailer: "\n",
};

/// Forward-stack snapshot frames
pub const FORWARD_FRAME: FrameKind = FrameKind {
    tag: "--- FORWARD VERSION ",
    trailer: "\n--- END FORWARD VERSION ---\n",
};

const HEADER_END: &str = " ---";

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Byte offset of the header within the artifact
    pub offset: u64,
    /// Byte offset just past the trailer
    pub end: u64,
    /// Key named in the header
    pub key: String,
    /// Frame body
    pub body: String,
}

impl FrameKind {
    /// Encode one frame
    pub fn encode(&self, key: &str, body: &str) -> String {
        let mut out = String::with_capacity(self.tag.len() + key.len() + body.len() + 48);
        out.push_str(self.tag);
        out.push_str(key);
        out.push(' ');
        out.push_str(&body.len().to_string());
        out.push_str(HEADER_END);
        out.push('\n');
        out.push_str(body);
        out.push_str(self.trailer);
        out
    }

    /// Decode every well-formed frame, in file order
    ///
    /// Parsing stops at the first malformed frame.
    pub fn decode_all(&self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut pos = 0usize;

        while pos < data.len() {
            match self.decode_at(data, pos) {
                Some((frame, next)) => {
                    frames.push(frame);
                    pos = next;
                }
                None => {
                    warn!(
                        "Malformed frame at byte {} ({} frames kept, {} bytes ignored)",
                        pos,
                        frames.len(),
                        data.len() - pos
                    );
                    break;
                }
            }
        }

        frames
    }

    /// Decode the frame starting at `pos`, returning it and the next offset
    fn decode_at(&self, data: &[u8], pos: usize) -> Option<(Frame, usize)> {
        let rest = &data[pos..];
        let newline = rest.iter().position(|b| *b == b'\n')?;
        let header = std::str::from_utf8(&rest[..newline]).ok()?;

        let inner = header.strip_prefix(self.tag)?.strip_suffix(HEADER_END)?;
        let (key, len) = inner.rsplit_once(' ')?;
        let len: usize = len.parse().ok()?;

        let body_start = newline + 1;
        let body_end = body_start.checked_add(len)?;
        let trailer_end = body_end.checked_add(self.trailer.len())?;
        if trailer_end > rest.len() || &rest[body_end..trailer_end] != self.trailer.as_bytes() {
            return None;
        }

        let body = std::str::from_utf8(&rest[body_start..body_end]).ok()?;
        Some((
            Frame {
                offset: pos as u64,
                end: (pos + trailer_end) as u64,
                key: key.to_string(),
                body: body.to_string(),
            },
            pos + trailer_end,
        ))
    }
}
