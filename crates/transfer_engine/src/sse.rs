//! Incremental `text/event-stream` decoding and the message shapes carried on
//! the progress channel.
use serde_json::Value;
use transfer_logging::{xfer_debug, xfer_trace};

use crate::JobProgressEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseItem {
    Frame(SseFrame),
    /// A `:` line. Servers use these as keepalives.
    Comment,
}

/// Splits a byte stream into SSE items. Input may be cut anywhere, including
/// inside a line or a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseItem> {
        self.pending.extend_from_slice(bytes);
        let mut items = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(item) = self.process_line(&line) {
                items.push(item);
            }
        }
        items
    }

    fn process_line(&mut self, line: &str) -> Option<SseItem> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return Some(SseItem::Comment);
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => xfer_trace!("ignoring sse field {field}"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseItem> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseItem::Frame(SseFrame { event, data }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    PackProgress(JobProgressEvent),
    /// Proof the connection is alive; carries nothing.
    Liveness,
    Ignored,
}

const PACK_PROGRESS: &str = "packDownloadProgress";

/// Interprets one frame. The payload may be nested under `data` or sit at
/// the top level next to `type`; frames that are not JSON are keepalives.
pub fn decode_frame(frame: &SseFrame) -> ChannelMessage {
    let Ok(value) = serde_json::from_str::<Value>(&frame.data) else {
        xfer_trace!("non-json frame treated as keepalive");
        return ChannelMessage::Liveness;
    };
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| frame.event.clone());
    match kind.as_deref() {
        Some(PACK_PROGRESS) => {
            let payload = match value.get("data") {
                Some(nested) if nested.is_object() => nested.clone(),
                _ => value,
            };
            match serde_json::from_value::<JobProgressEvent>(payload) {
                Ok(event) => ChannelMessage::PackProgress(event),
                Err(err) => {
                    xfer_debug!("dropping malformed progress event: {err}");
                    ChannelMessage::Ignored
                }
            }
        }
        Some("ping" | "keepalive" | "heartbeat" | "connected") => ChannelMessage::Liveness,
        _ => ChannelMessage::Ignored,
    }
}

pub(crate) fn decode_item(item: SseItem) -> ChannelMessage {
    match item {
        SseItem::Frame(frame) => decode_frame(&frame),
        SseItem::Comment => ChannelMessage::Liveness,
    }
}
