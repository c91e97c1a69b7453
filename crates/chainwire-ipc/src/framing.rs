//! Splitting a byte stream into JSON envelopes.
//!
//! IPC nodes write envelopes back to back with no length prefix; a frame
//! ends where a complete JSON value ends.

use serde::de::IgnoredAny;

/// Read buffer that yields complete JSON values as they become available.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for the rest of a value.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drain every complete JSON value. An incomplete trailing value stays
    /// buffered; malformed input is an error and the buffer is discarded.
    pub fn drain_frames(&mut self) -> Result<Vec<String>, String> {
        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut failure = None;
        {
            let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<IgnoredAny>();
            loop {
                let start = consumed;
                match values.next() {
                    Some(Ok(_)) => {
                        let end = values.byte_offset();
                        match std::str::from_utf8(&self.buf[start..end]) {
                            Ok(text) => frames.push(text.trim().to_string()),
                            Err(e) => {
                                failure = Some(format!("frame is not UTF-8: {e}"));
                                break;
                            }
                        }
                        consumed = end;
                    }
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => {
                        failure = Some(e.to_string());
                        break;
                    }
                    None => {
                        consumed = self.buf.len();
                        break;
                    }
                }
            }
        }

        if let Some(reason) = failure {
            self.buf.clear();
            return Err(reason);
        }
        self.buf.drain(..consumed);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_back_to_back_values() {
        let mut fb = FrameBuffer::new();
        fb.extend(br#"{"id":1,"result":"a"}{"id":2,"result":"b"}"#);
        let frames = fb.drain_frames().unwrap();
        assert_eq!(frames, vec![r#"{"id":1,"result":"a"}"#, r#"{"id":2,"result":"b"}"#]);
        assert_eq!(fb.buffered(), 0);
    }

    #[test]
    fn keeps_partial_value_until_complete() {
        let mut fb = FrameBuffer::new();
        fb.extend(b"{\"id\":1,\"res");
        assert!(fb.drain_frames().unwrap().is_empty());
        assert!(fb.buffered() > 0);

        fb.extend(b"ult\":\"0x1\"}\n");
        assert_eq!(fb.drain_frames().unwrap(), vec![r#"{"id":1,"result":"0x1"}"#]);
        assert_eq!(fb.buffered(), 0);
    }

    #[test]
    fn newline_delimited_values() {
        let mut fb = FrameBuffer::new();
        fb.extend(b"{\"id\":1,\"result\":1}\n{\"id\":2,\"result\":2}\n");
        assert_eq!(fb.drain_frames().unwrap().len(), 2);
    }

    #[test]
    fn malformed_input_is_rejected() {
        let mut fb = FrameBuffer::new();
        fb.extend(b"{\"id\":1,]");
        assert!(fb.drain_frames().is_err());
        assert_eq!(fb.buffered(), 0);
    }
}
