//! Framing of the INDI XML stream.
//!
//! An INDI server writes a sequence of XML elements with no enclosing
//! document. [`XmlFramer`] buffers raw bytes, tracks element depth, and hands
//! out each element that completes at the configured message level as one
//! self-contained XML string. Comments, processing instructions, doctype
//! declarations and CDATA sections are stepped over without affecting depth.

use bytes::{Buf, BytesMut};
use tracing::warn;

use crate::error::{IndiError, Result};

/// Default cap on a single message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Incremental splitter of a raw XML byte stream into messages.
#[derive(Debug)]
pub struct XmlFramer {
    buf: BytesMut,
    /// Scan position in `buf`; everything before it has been classified.
    pos: usize,
    depth: usize,
    /// Offset of the element currently being captured.
    start: Option<usize>,
    message_level: usize,
    max_message_size: usize,
}

enum Markup {
    Open,
    Close,
    SelfClosing,
    Skip,
}

enum Scan {
    Found(Markup, usize),
    Incomplete,
}

impl XmlFramer {
    /// `message_level` is the element depth at which messages live: 0 for a
    /// bare stream, 1 when the server wraps everything in one root element.
    pub fn new(message_level: usize, max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8192),
            pos: 0,
            depth: 0,
            start: None,
            message_level,
            max_message_size,
        }
    }

    /// Append bytes read from the wire.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop all buffered state, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.depth = 0;
        self.start = None;
    }

    /// The next complete message, if one is buffered.
    ///
    /// On error the offending bytes are discarded and framing restarts at the
    /// next element, so the caller can keep going.
    pub fn next_message(&mut self) -> Result<Option<String>> {
        loop {
            let Some(offset) = self.buf[self.pos..].iter().position(|&b| b == b'<') else {
                self.pos = self.buf.len();
                self.discard_idle_text();
                return self.check_size().map(|()| None);
            };
            let at = self.pos + offset;

            let (markup, end) = match scan_markup(&self.buf[at..]) {
                Scan::Found(markup, len) => (markup, at + len),
                Scan::Incomplete => {
                    self.pos = at;
                    self.discard_idle_text();
                    return self.check_size().map(|()| None);
                }
            };
            self.pos = end;

            match markup {
                Markup::Skip => {}
                Markup::Open => {
                    if self.depth == self.message_level {
                        self.start = Some(at);
                    }
                    self.depth += 1;
                }
                Markup::SelfClosing => {
                    if self.depth == self.message_level {
                        return Ok(Some(self.take(at, end)));
                    }
                }
                Markup::Close => {
                    if self.depth == 0 {
                        self.reset_after_error();
                        return Err(IndiError::Xml("unbalanced closing tag".into()));
                    }
                    self.depth -= 1;
                    if self.depth == self.message_level {
                        if let Some(start) = self.start.take() {
                            return Ok(Some(self.take(start, end)));
                        }
                    }
                }
            }
        }
    }

    fn take(&mut self, start: usize, end: usize) -> String {
        let message = String::from_utf8_lossy(&self.buf[start..end]).into_owned();
        self.buf.advance(end);
        self.pos = 0;
        self.start = None;
        message
    }

    /// Text outside any message carries nothing; drop it.
    fn discard_idle_text(&mut self) {
        if self.start.is_none() {
            self.buf.advance(self.pos);
            self.pos = 0;
        }
    }

    fn check_size(&mut self) -> Result<()> {
        let pending = self.buf.len() - self.start.unwrap_or(0);
        if pending > self.max_message_size {
            warn!(pending, limit = self.max_message_size, "oversized xml message dropped");
            self.reset_after_error();
            return Err(IndiError::MessageTooLarge {
                limit: self.max_message_size,
            });
        }
        Ok(())
    }

    /// Drop what was scanned. An enclosing root element stays open, so the
    /// next sibling is still framed at the message level.
    fn reset_after_error(&mut self) {
        self.buf.advance(self.pos);
        self.pos = 0;
        self.depth = self.depth.min(self.message_level);
        self.start = None;
    }
}

/// Markup that is stepped over as a whole: opener and terminator.
const SKIPPED: [(&[u8], &[u8]); 3] = [(b"<!--", b"-->"), (b"<![CDATA[", b"]]>"), (b"<?", b"?>")];

/// Classify the markup starting at `bytes[0] == b'<'` and measure it.
fn scan_markup(bytes: &[u8]) -> Scan {
    for (open, close) in SKIPPED {
        if bytes.len() < open.len() && open.starts_with(bytes) {
            return Scan::Incomplete;
        }
        if bytes.starts_with(open) {
            return match find(&bytes[open.len()..], close) {
                Some(i) => Scan::Found(Markup::Skip, open.len() + i + close.len()),
                None => Scan::Incomplete,
            };
        }
    }

    let Some(len) = tag_len(bytes) else {
        return Scan::Incomplete;
    };
    let tag = &bytes[..len];
    let markup = if tag.starts_with(b"<!") {
        Markup::Skip
    } else if tag.starts_with(b"</") {
        Markup::Close
    } else if tag.ends_with(b"/>") {
        Markup::SelfClosing
    } else {
        Markup::Open
    };
    Scan::Found(markup, len)
}

/// Length of a tag up to and including its `>`, skipping quoted attribute values.
fn tag_len(bytes: &[u8]) -> Option<usize> {
    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i + 1),
            (None, _) => {}
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
