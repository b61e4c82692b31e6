//! Incremental `text/event-stream` decoder.
//!
//! Follows the event stream interpretation rules of the
//! [HTML Living Standard](https://html.spec.whatwg.org/multipage/server-sent-events.html):
//! lines end in CRLF, LF or CR; a blank line dispatches the pending event;
//! lines starting with `:` are comments; a single space after the field
//! colon is stripped.

use core::{str::Utf8Error, time::Duration};

use bytes::{Buf, BytesMut};

const LF: u8 = b'\n';
const CR: u8 = b'\r';
const BOM: &[u8] = "\u{FEFF}".as_bytes();
const DEFAULT_EVENT: &str = "message";

/// One dispatched SSE event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// The event type field (`"message"` when unspecified).
    pub event: String,
    /// The data payload, multi-line data joined with `\n`.
    pub data: String,
    /// The last event ID.
    pub id: String,
    /// Reconnection time advertised by the server.
    pub retry: Option<Duration>,
}

/// Buffers raw body chunks and yields complete [`SseFrame`]s.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    started: bool,
    event: String,
    data: Option<String>,
    id: String,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the response body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Decode the next complete frame, if the buffer holds one.
    ///
    /// # Errors
    ///
    /// Returns an error if a line is not valid UTF-8.
    pub fn next_frame(&mut self) -> Result<Option<SseFrame>, Utf8Error> {
        if !self.started {
            if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer) {
                return Ok(None);
            }
            if self.buffer.starts_with(BOM) {
                self.buffer.advance(BOM.len());
            }
            self.started = true;
        }

        while let Some((line_end, rem_start)) = find_eol(&self.buffer) {
            let line = self.buffer.split_to(line_end).freeze();
            self.buffer.advance(rem_start - line_end);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    return Ok(Some(frame));
                }
                continue;
            }
            let line = core::str::from_utf8(&line)?;
            self.apply_line(line);
        }
        Ok(None)
    }

    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = value.to_string(),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" if !value.contains('\0') => self.id = value.to_string(),
            "retry" => {
                if let Ok(millis) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(millis));
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = core::mem::take(&mut self.event);
        let retry = self.retry.take();
        let data = self.data.take()?;

        Some(SseFrame {
            event: if event.is_empty() {
                DEFAULT_EVENT.to_string()
            } else {
                event
            },
            data,
            // The last event ID persists across events.
            id: self.id.clone(),
            retry,
        })
    }
}

/// Returns `(line_end, remainder_start)`, or `None` when more data is needed
/// (including a trailing lone CR that may be the first half of CRLF).
fn find_eol(bytes: &[u8]) -> Option<(usize, usize)> {
    let pos = memchr::memchr2(CR, LF, bytes)?;
    if bytes[pos] == LF {
        return Some((pos, pos + 1));
    }
    match bytes.get(pos + 1) {
        None => None,
        Some(&LF) => Some((pos, pos + 2)),
        Some(_) => Some((pos, pos + 1)),
    }
}
