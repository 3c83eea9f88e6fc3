//! Inbound push message framing.
//!
//! The module delivers messages received on subscribed topics as unsolicited lines:
//!
//! ```text
//! +TCMQTTRCVPUB:"$thing/down/property/<product>/<device>",<len>,"{...}"\r\n
//! ```
//!
//! Bytes are appended to an [`InboundFramer`] as they arrive. Frames may span
//! several reads and are only decoded once their terminator has been received.

use crate::{
    matcher::find,
    message::{ControlMessage, unescape},
};
use alloc::{borrow::Cow, string::String, vec::Vec};
use core::fmt::{Display, Formatter};
use log::{debug, trace, warn};

/// Marker starting every push message.
pub const PUSH_MARKER: &[u8] = b"+TCMQTTRCVPUB:";

/// Closing quote and line terminator ending every push message.
const FRAME_TERMINATOR: &[u8] = b"\"\r\n";

/// Default capacity of the receive accumulator.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Reason a complete frame could not be decoded.
///
/// The frame is dropped and the framer advances past it.
#[derive(Debug)]
pub enum MalformedPayload {
    /// The frame is not valid UTF-8.
    InvalidUtf8,
    /// The frame does not contain a JSON object.
    MissingObject,
    /// The JSON object's braces are not balanced.
    Unbalanced,
    /// The JSON object could not be decoded into a control message.
    Json(serde_json::Error),
}

impl Display for MalformedPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidUtf8 => write!(f, "frame is not valid UTF-8"),
            Self::MissingObject => write!(f, "frame contains no JSON object"),
            Self::Unbalanced => write!(f, "unbalanced JSON object"),
            Self::Json(err) => write!(f, "invalid control message: {err}"),
        }
    }
}

impl core::error::Error for MalformedPayload {}

/// Reassembles push messages from an unreliable byte stream.
#[derive(Debug)]
pub struct InboundFramer {
    buf: Vec<u8>,
    capacity: usize,
}

impl Default for InboundFramer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InboundFramer {
    /// Constructs a framer holding at most `capacity` bytes of an incomplete frame.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns whether no bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Extracts the next complete frame, if any.
    ///
    /// Returns [`None`] if no complete frame is buffered. Bytes that cannot
    /// belong to a frame are discarded, while a partial frame is kept for the
    /// next call. A decode failure still consumes the frame.
    pub fn next_frame(&mut self) -> Option<Result<ControlMessage, MalformedPayload>> {
        loop {
            let Some(start) = find(&self.buf, PUSH_MARKER) else {
                self.retain_marker_prefix();

                return None;
            };

            self.buf.drain(..start);

            let body = &self.buf[PUSH_MARKER.len()..];
            let end = find(body, FRAME_TERMINATOR);
            let next = find(body, PUSH_MARKER);

            match (end, next) {
                (end, Some(next)) if end.is_none_or(|end| next < end) => {
                    warn!("Dropped push message interrupted by another one");
                    self.buf.drain(..PUSH_MARKER.len() + next);
                }
                (Some(end), _) => {
                    let len = PUSH_MARKER.len() + end + FRAME_TERMINATOR.len();
                    let frame: Vec<u8> = self.buf.drain(..len).collect();

                    trace!("Received push message: {}", String::from_utf8_lossy(&frame));

                    return Some(decode_frame(&frame));
                }
                _ => {
                    if self.buf.len() > self.capacity {
                        warn!(
                            "Dropped incomplete push message exceeding {} bytes",
                            self.capacity
                        );
                        self.buf.clear();
                    }

                    return None;
                }
            }
        }
    }

    /// Keeps only the longest suffix that could still grow into a marker.
    fn retain_marker_prefix(&mut self) {
        let keep = (1..PUSH_MARKER.len())
            .rev()
            .find(|&len| self.buf.ends_with(&PUSH_MARKER[..len]))
            .unwrap_or(0);

        if self.buf.len() > keep {
            debug!("Discarded {} unsolicited bytes", self.buf.len() - keep);
            self.buf.drain(..self.buf.len() - keep);
        }
    }
}

/// Decodes the JSON object embedded in a complete frame.
fn decode_frame(frame: &[u8]) -> Result<ControlMessage, MalformedPayload> {
    let text = core::str::from_utf8(frame).map_err(|_| MalformedPayload::InvalidUtf8)?;
    let start = text.find('{').ok_or(MalformedPayload::MissingObject)?;
    let mut object = Cow::from(&text[start..]);

    // Payload may arrive escaped the same way reports are sent
    if object.starts_with("{\\\"") {
        object = Cow::from(unescape(&object));
    }

    let end = object_end(&object).ok_or(MalformedPayload::Unbalanced)?;

    serde_json::from_str(&object[..=end]).map_err(MalformedPayload::Json)
}

/// Returns the index of the brace closing the object that starts at index 0.
///
/// Braces inside string literals are ignored.
fn object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }

            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;

                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }

    None
}
