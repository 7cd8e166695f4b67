//! ikp3db wire framing
//!
//! Frame layout: `length=<N><MAGIC><payload>` where `N` is the decimal byte
//! length of the JSON payload only. Malformed input never fails the stream:
//! incomplete data waits for more bytes, and a header that can no longer
//! become valid is skipped up to the next `length=` marker.

use crate::io::framing::{FrameFormat, FramingError, MAX_MESSAGE_SIZE};
use tracing::warn;

/// Token separating the length field from the payload
pub const MAGIC_CODE: &str = "LLADpcdtbdpac";

const LENGTH_PREFIX: &str = "length=";

/// [`FrameFormat`] for the debuggee wire protocol
pub struct WireFormat;

/// Result of inspecting the header at the front of the buffer
enum Header {
    /// Not enough bytes yet
    Incomplete,
    /// Header can never become valid
    Corrupt(&'static str),
    /// Parsed header: payload length and payload start offset
    Complete { length: usize, payload_start: usize },
}

impl WireFormat {
    fn parse_header(buffer: &str) -> Header {
        debug_assert!(buffer.starts_with(LENGTH_PREFIX));
        let field = &buffer[LENGTH_PREFIX.len()..];

        let Some(magic_at) = field.find(MAGIC_CODE) else {
            let digits_end = field
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(field.len());
            // Digits, optionally followed by the start of the magic token
            return if MAGIC_CODE.starts_with(&field[digits_end..]) {
                Header::Incomplete
            } else {
                Header::Corrupt("length field is not followed by the magic token")
            };
        };

        let digits = &field[..magic_at];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Header::Corrupt("length field is not a decimal number");
        }
        let Ok(length) = digits.parse::<usize>() else {
            return Header::Corrupt("length field overflows");
        };
        if length > MAX_MESSAGE_SIZE {
            return Header::Corrupt("announced length exceeds the message size limit");
        }

        Header::Complete {
            length,
            payload_start: LENGTH_PREFIX.len() + magic_at + MAGIC_CODE.len(),
        }
    }

    /// Drop the current header and anything up to the next frame marker
    fn resync(buffer: &mut String, reason: &str) {
        let skip = buffer[1..]
            .find(LENGTH_PREFIX)
            .map(|at| at + 1)
            .unwrap_or(buffer.len());
        warn!(
            "WireFormat: discarding {} bytes of corrupt input: {}",
            skip, reason
        );
        buffer.drain(..skip);
    }

    fn resync_prefix(buffer: &mut String, upto: usize) {
        warn!(
            "WireFormat: discarding {} bytes preceding the next frame",
            upto
        );
        buffer.drain(..upto);
    }
}

impl FrameFormat for WireFormat {
    fn encode(payload: &str) -> String {
        format!("{}{}{}{}", LENGTH_PREFIX, payload.len(), MAGIC_CODE, payload)
    }

    fn decode(buffer: &mut String) -> Result<Option<String>, FramingError> {
        loop {
            match buffer.find(LENGTH_PREFIX) {
                None => {
                    // Keep a possible partial "length=" at the tail, drop the rest
                    let keep_from = (1..=LENGTH_PREFIX.len().min(buffer.len()))
                        .rev()
                        .map(|n| buffer.len() - n)
                        .find(|&at| {
                            buffer.is_char_boundary(at)
                                && LENGTH_PREFIX.starts_with(&buffer[at..])
                        })
                        .unwrap_or(buffer.len());
                    if keep_from > 0 {
                        Self::resync_prefix(buffer, keep_from);
                    }
                    return Ok(None);
                }
                Some(start) if start > 0 => Self::resync_prefix(buffer, start),
                Some(_) => {}
            }

            match Self::parse_header(buffer) {
                Header::Incomplete => return Ok(None),
                Header::Corrupt(reason) => Self::resync(buffer, reason),
                Header::Complete {
                    length,
                    payload_start,
                } => {
                    let payload_end = payload_start + length;
                    if buffer.len() < payload_end {
                        return Ok(None);
                    }
                    if !buffer.is_char_boundary(payload_end) {
                        Self::resync(buffer, "announced length splits a character");
                        continue;
                    }
                    let payload = buffer[payload_start..payload_end].to_string();
                    buffer.drain(..payload_end);
                    return Ok(Some(payload));
                }
            }
        }
    }
}
