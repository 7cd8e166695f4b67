//! Debug Adapter Protocol message framing
//!
//! Same header scheme as the Language Server Protocol:
//! `Content-Length: <length>\r\n\r\n<content>`

use crate::io::framing::{FrameFormat, FramingError, MAX_MESSAGE_SIZE};

const HEADER_SEPARATOR: &str = "\r\n\r\n";

/// [`FrameFormat`] for the front-end protocol
pub struct ContentLengthFormat;

impl ContentLengthFormat {
    /// Parse Content-Length from the header block
    fn parse_content_length(header: &str) -> Result<usize, FramingError> {
        for line in header.lines() {
            if let Some(length_str) = line.strip_prefix("Content-Length:") {
                let length_str = length_str.trim();
                let length = length_str
                    .parse::<usize>()
                    .map_err(|_| FramingError::InvalidContentLength(length_str.to_string()))?;

                if length > MAX_MESSAGE_SIZE {
                    return Err(FramingError::MessageTooLarge {
                        size: length,
                        max: MAX_MESSAGE_SIZE,
                    });
                }

                return Ok(length);
            }
        }

        Err(FramingError::InvalidFormat(
            "Missing Content-Length header".to_string(),
        ))
    }
}

impl FrameFormat for ContentLengthFormat {
    fn encode(payload: &str) -> String {
        format!("Content-Length: {}{}{}", payload.len(), HEADER_SEPARATOR, payload)
    }

    fn decode(buffer: &mut String) -> Result<Option<String>, FramingError> {
        let Some(header_end) = buffer.find(HEADER_SEPARATOR) else {
            return Ok(None);
        };
        let content_start = header_end + HEADER_SEPARATOR.len();

        let content_length = match Self::parse_content_length(&buffer[..header_end]) {
            Ok(length) => length,
            Err(e) => {
                // Drop the bad header so the next frame can still be read
                buffer.drain(..content_start);
                return Err(e);
            }
        };

        let content_end = content_start + content_length;
        if buffer.len() < content_end {
            return Ok(None);
        }
        if !buffer.is_char_boundary(content_end) {
            buffer.drain(..content_start);
            return Err(FramingError::InvalidContentLength(format!(
                "{content_length} splits a character"
            )));
        }

        let message = buffer[content_start..content_end].to_string();
        buffer.drain(..content_end);
        Ok(Some(message))
    }
}
