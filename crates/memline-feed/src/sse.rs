//! Incremental server-sent-events decoder.
//!
//! Transport chunks can split a frame (or a UTF-8 sequence) anywhere, so the
//! decoder buffers raw bytes and only decodes complete lines. Lines end in
//! `\n`, `\r\n` or a lone `\r`. A blank line dispatches the accumulated
//! `data:` lines as one payload, joined with `\n`. Comment lines (`:`) and the
//! `event`, `id` and `retry` fields are ignored; the gateway carries the delta
//! type inside the JSON payload.

use tracing::warn;

/// Upper bound on buffered bytes for one frame (unterminated line plus
/// accumulated `data:` lines). A frame that outgrows it is discarded.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    data_bytes: usize,
    /// The last chunk ended in `\r`; a leading `\n` in the next one belongs to it.
    skip_lf: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns every payload it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut chunk = chunk;
        if self.skip_lf && !chunk.is_empty() {
            self.skip_lf = false;
            if chunk[0] == b'\n' {
                chunk = &chunk[1..];
            }
        }
        self.pending.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let cr = self.pending[pos] == b'\r';
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if cr {
                match self.pending.first() {
                    Some(b'\n') => {
                        self.pending.remove(0);
                    }
                    Some(_) => {}
                    None => self.skip_lf = true,
                }
            }
            let line = String::from_utf8_lossy(&raw[..pos]);
            if let Some(payload) = self.process_line(&line) {
                out.push(payload);
            }
        }

        if self.pending.len() + self.data_bytes > MAX_FRAME_BYTES {
            warn!(
                buffered = self.pending.len() + self.data_bytes,
                "oversized push frame discarded"
            );
            self.reset();
        }
        out
    }

    /// Drop any half-received frame, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.data.clear();
        self.data_bytes = 0;
        self.skip_lf = false;
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let payload = self.data.join("\n");
            self.data.clear();
            self.data_bytes = 0;
            return Some(payload);
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_bytes += value.len() + 1;
            self.data.push(value.to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame() {
        let mut dec = SseDecoder::new();
        let out = dec.push(b"data: {\"type\":\"ping\"}\n\n");
        assert_eq!(out, vec![r#"{"type":"ping"}"#.to_string()]);
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: {\"type\":").is_empty());
        assert!(dec.push(b"\"connection\"}\n").is_empty());
        let out = dec.push(b"\n");
        assert_eq!(out, vec![r#"{"type":"connection"}"#.to_string()]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let text = "data: {\"transcript\":\"café\"}\n\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut dec = SseDecoder::new();
        assert!(dec.push(&text[..split]).is_empty());
        let out = dec.push(&text[split..]);
        assert_eq!(out, vec![r#"{"transcript":"café"}"#.to_string()]);
    }

    #[test]
    fn multiple_data_lines_are_joined() {
        let mut dec = SseDecoder::new();
        let out = dec.push(b"data: a\ndata:b\n\n");
        assert_eq!(out, vec!["a\nb".to_string()]);
    }

    #[test]
    fn crlf_comments_and_other_fields() {
        let mut dec = SseDecoder::new();
        let out = dec.push(b": keep-alive\r\nevent: delta\r\nid: 7\r\ndata: x\r\n\r\ndata: y\r\n\r\n");
        assert_eq!(out, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn blank_lines_without_data_dispatch_nothing() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"\n\n\n").is_empty());
    }

    #[test]
    fn lone_carriage_returns_end_lines() {
        let mut dec = SseDecoder::new();
        let out = dec.push(b"data: x\r\rdata: y\r\r");
        assert_eq!(out, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn crlf_split_across_chunks_is_one_line_end() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: a\r").is_empty());
        // The `\n` completes the previous CRLF rather than dispatching.
        assert!(dec.push(b"\ndata: b\r").is_empty());
        let out = dec.push(b"\n\r\n");
        assert_eq!(out, vec!["a\nb".to_string()]);
    }

    #[test]
    fn oversized_frame_is_discarded() {
        let mut dec = SseDecoder::new();
        let big = vec![b'x'; MAX_FRAME_BYTES];
        assert!(dec.push(b"data: ").is_empty());
        assert!(dec.push(&big).is_empty());
        // The tail of the dropped frame is only a stray line.
        assert!(dec.push(b"\n\n").is_empty());
        let out = dec.push(b"data: ok\n\n");
        assert_eq!(out, vec!["ok".to_string()]);
    }

    #[test]
    fn many_data_lines_without_dispatch_are_bounded() {
        let mut dec = SseDecoder::new();
        let line = format!("data: {}\n", "y".repeat(1023));
        for _ in 0..(MAX_FRAME_BYTES / 1024 + 1) {
            assert!(dec.push(line.as_bytes()).is_empty());
        }
        assert!(dec.push(b"\n").is_empty());
        let out = dec.push(b"data: ok\n\n");
        assert_eq!(out, vec!["ok".to_string()]);
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut dec = SseDecoder::new();
        dec.push(b"data: half");
        dec.push(b"\ndata: more\n");
        dec.reset();
        let out = dec.push(b"data: fresh\n\n");
        assert_eq!(out, vec!["fresh".to_string()]);
    }
}
