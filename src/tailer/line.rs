// SPDX-License-Identifier: Apache-2.0

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// Output unit as produced by a source reader, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawLine {
    /// One line of a followed file, without its terminator.
    Text(String),
    /// A chunk of a runtime log stream, forwarded byte for byte.
    Bytes(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinePayload {
    Raw(Bytes),
    Text(String),
    Decoded { stream: String, log: String },
}

/// A line on its way to the delivery connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    token: Arc<str>,
    label: Arc<str>,
    payload: LinePayload,
}

impl LogLine {
    pub fn new(token: Arc<str>, label: Arc<str>, payload: LinePayload) -> Self {
        Self {
            token,
            label,
            payload,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn payload(&self) -> &LinePayload {
        &self.payload
    }

    /// Wire form: the token followed by the payload.
    ///
    /// Raw payloads are appended untouched. Text and decoded payloads are
    /// prefixed with the label (and stream name) and end with exactly one newline.
    pub fn render(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.token.len() + self.label.len() + 64);
        buf.put_slice(self.token.as_bytes());

        match &self.payload {
            LinePayload::Raw(bytes) => buf.put_slice(bytes),
            LinePayload::Text(text) => {
                buf.put_u8(b' ');
                buf.put_slice(self.label.as_bytes());
                buf.put_u8(b' ');
                buf.put_slice(text.as_bytes());
                buf.put_u8(b'\n');
            }
            LinePayload::Decoded { stream, log } => {
                let log = log.strip_suffix('\n').unwrap_or(log);
                buf.put_u8(b' ');
                buf.put_slice(self.label.as_bytes());
                buf.put_slice(b" (");
                buf.put_slice(stream.as_bytes());
                buf.put_slice(b") ");
                buf.put_slice(log.as_bytes());
                buf.put_u8(b'\n');
            }
        }

        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(payload: LinePayload) -> LogLine {
        LogLine::new("DEF".into(), "def456".into(), payload)
    }

    #[test]
    fn raw_payload_is_prepended_byte_for_byte() {
        let bytes = Bytes::from_static(b"\x00\x01 partial\r\n");
        let rendered = line(LinePayload::Raw(bytes.clone())).render();

        assert_eq!(&rendered[..3], b"DEF");
        assert_eq!(&rendered[3..], &bytes[..]);
    }

    #[test]
    fn decoded_payload() {
        let rendered = line(LinePayload::Decoded {
            stream: "stdout".to_string(),
            log: "hello\n".to_string(),
        })
        .render();

        assert_eq!(&b"DEF def456 (stdout) hello\n"[..], &rendered[..]);
    }

    #[test]
    fn decoded_payload_only_trims_one_newline() {
        let rendered = line(LinePayload::Decoded {
            stream: "stderr".to_string(),
            log: "boom\n\n".to_string(),
        })
        .render();

        assert_eq!(&b"DEF def456 (stderr) boom\n\n"[..], &rendered[..]);
    }

    #[test]
    fn text_payload() {
        let rendered = line(LinePayload::Text("plain".to_string())).render();
        assert_eq!(&b"DEF def456 plain\n"[..], &rendered[..]);
    }
}
