// SPDX-License-Identifier: MIT

//! Server-Sent-Events frame decoding
//!
//! Frames are separated by a blank line; the `data:` lines of a frame are
//! joined with `\n`. A frame whose data is `[DONE]` ends the stream.

use serde_json::Value;

/// End-of-stream sentinel
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded item from an event stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(Value),
    Done,
}

/// Incremental SSE decoder; feed it arbitrary chunks
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    /// Trailing bytes of a UTF-8 sequence cut by a chunk boundary
    partial: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamItem> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut items = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..pos + 2).collect();
            if let Some(item) = decode_frame(&frame) {
                items.push(item);
            }
        }
        items
    }

    /// Feed raw network bytes
    ///
    /// A multi-byte character split across chunks is held back until the
    /// rest of it arrives. Invalid sequences become U+FFFD.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        self.partial.extend_from_slice(chunk);
        let complete = complete_prefix_len(&self.partial);
        let bytes: Vec<u8> = self.partial.drain(..complete).collect();
        self.feed(&String::from_utf8_lossy(&bytes))
    }

    /// Decode whatever is left once the connection closed
    pub fn finish(&mut self) -> Option<StreamItem> {
        if !self.partial.is_empty() {
            let tail = std::mem::take(&mut self.partial);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = std::mem::take(&mut self.buffer);
        decode_frame(&rest)
    }
}

/// Length of the prefix of `bytes` that ends on a character boundary
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let mut offset = 0;
    loop {
        match std::str::from_utf8(&bytes[offset..]) {
            Ok(_) => return bytes.len(),
            Err(e) => match e.error_len() {
                Some(invalid) => offset += e.valid_up_to() + invalid,
                None => return offset + e.valid_up_to(),
            },
        }
    }
}

fn decode_frame(frame: &str) -> Option<StreamItem> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    let payload = payload.trim();

    if payload == DONE_SENTINEL {
        return Some(StreamItem::Done);
    }
    match serde_json::from_str(payload) {
        Ok(value) => Some(StreamItem::Event(value)),
        Err(e) => {
            log::debug!("Skipping non-JSON SSE frame: {}", e);
            None
        }
    }
}

/// Decode a newline-delimited capture (one JSON object per line, or SSE
/// `data:` lines) as used by `replay`
pub fn decode_capture(text: &str) -> Vec<StreamItem> {
    let mut items = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
            continue;
        }
        let payload = line
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(line);
        if payload == DONE_SENTINEL {
            items.push(StreamItem::Done);
            break;
        }
        match serde_json::from_str(payload) {
            Ok(value) => items.push(StreamItem::Event(value)),
            Err(e) => log::warn!("Skipping unreadable capture line: {}", e),
        }
    }
    items
}
