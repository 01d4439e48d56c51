//! Content-Length framed DAP message codec.
//!
//! Wire format: `Content-Length: N\r\n\r\n` followed by exactly N bytes of
//! UTF-8 JSON.  Several messages may sit in one read, and a message may
//! arrive split across reads, so [`decode_message`] works against a
//! caller-owned byte buffer and reports how much of it one complete
//! message consumed.  The caller drains the consumed prefix and retries
//! until [`DecodeOutcome::MissingHeader`] or
//! [`DecodeOutcome::TruncatedBody`] says more bytes are needed.

use serde_json::Value;

use crate::errors::DebugError;

const CONTENT_LENGTH_HEADER: &str = "Content-Length:";
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Result of one decode attempt against the front of a byte buffer.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// No complete `\r\n\r\n`-terminated header block yet.
    MissingHeader,
    /// Header parsed, but fewer than `Content-Length` body bytes buffered.
    TruncatedBody,
    /// One complete message; remove `consumed` bytes from the buffer front.
    Message { body: Value, consumed: usize },
}

/// Frames a message for the wire.
pub fn encode_message(value: &Value) -> Vec<u8> {
    let json = value.to_string();
    let mut out = Vec::with_capacity(json.len() + 32);
    out.extend_from_slice(CONTENT_LENGTH_HEADER.as_bytes());
    out.push(b' ');
    out.extend_from_slice(json.len().to_string().as_bytes());
    out.extend_from_slice(HEADER_TERMINATOR);
    out.extend_from_slice(json.as_bytes());
    out
}

/// Attempts to decode a single message from the front of `buf`.
///
/// Unknown header fields are skipped.  A header block without a
/// `Content-Length` field, an unparseable length, or a body that is not
/// valid JSON all surface as [`DebugError::InvalidResponse`] — the stream
/// is unrecoverable at that point.
pub fn decode_message(buf: &[u8]) -> Result<DecodeOutcome, DebugError> {
    let Some(header_len) = find_terminator(buf) else {
        return Ok(DecodeOutcome::MissingHeader);
    };

    let header = std::str::from_utf8(&buf[..header_len]).map_err(|_| {
        DebugError::InvalidResponse {
            context: "message header is not UTF-8".to_string(),
        }
    })?;

    let mut content_length: Option<usize> = None;
    for line in header.split("\r\n") {
        if let Some(rest) = line.strip_prefix(CONTENT_LENGTH_HEADER) {
            content_length = Some(rest.trim().parse::<usize>().map_err(|_| {
                DebugError::InvalidResponse {
                    context: format!("bad Content-Length in header line {line:?}"),
                }
            })?);
        }
    }

    let Some(length) = content_length else {
        return Err(DebugError::InvalidResponse {
            context: "header block without Content-Length".to_string(),
        });
    };

    let body_start = header_len + HEADER_TERMINATOR.len();
    let body_end = body_start + length;
    if buf.len() < body_end {
        return Ok(DecodeOutcome::TruncatedBody);
    }

    let body = serde_json::from_slice::<Value>(&buf[body_start..body_end]).map_err(|e| {
        DebugError::InvalidResponse {
            context: format!("message body is not valid JSON: {e}"),
        }
    })?;

    Ok(DecodeOutcome::Message {
        body,
        consumed: body_end,
    })
}

/// Byte offset of the first `\r\n\r\n`, i.e. the header block's length.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
