//! Research step events and the newline-delimited JSON decoder for the
//! research stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::now_ms;

/// Step name that carries the final answer.
pub const STEP_COMPLETED: &str = "completed";
/// Step name that aborts the run.
pub const STEP_ERROR: &str = "error";

/// One progress step of a research job, from the live stream or replayed
/// from a status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub step: String,
    pub data: Value,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
}

impl StreamEvent {
    pub fn new(step: impl Into<String>, data: Value) -> Self {
        Self {
            step: step.into(),
            data,
            timestamp: now_ms(),
        }
    }

    /// Build from a decoded JSON object. Objects without a string `step`
    /// are not events.
    ///
    /// `data` is the object's `data` member when present, otherwise the
    /// object itself.
    pub fn from_value(value: Value) -> Option<Self> {
        let step = value.get("step")?.as_str()?.to_string();
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_u64)
            .unwrap_or_else(now_ms);
        let data = match value.get("data") {
            Some(d) if !d.is_null() => d.clone(),
            _ => value,
        };
        Some(Self {
            step,
            data,
            timestamp,
        })
    }

    pub fn is_completed(&self) -> bool {
        self.step == STEP_COMPLETED
    }

    pub fn is_error(&self) -> bool {
        self.step == STEP_ERROR
    }

    /// Server-assigned job id, if this event announces one.
    pub fn job_id(&self) -> Option<&str> {
        self.data
            .get("job_id")
            .or_else(|| self.data.get("jobId"))
            .and_then(Value::as_str)
    }

    pub fn error_message(&self) -> String {
        self.data
            .get("error")
            .or_else(|| self.data.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("research failed")
            .to_string()
    }
}

/// Final payload of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletedResult {
    /// Server-assigned job id used for duplicate suppression.
    pub id: Option<String>,
    pub answer: String,
    pub sources: Vec<Value>,
    pub images: Vec<Value>,
}

impl CompletedResult {
    /// Extract `{result|answer, sources, images}` from a completed event's
    /// data or a job status `result`. A bare string is taken as the answer.
    pub fn from_value(value: &Value, id: Option<String>) -> Self {
        if let Some(s) = value.as_str() {
            return Self {
                id,
                answer: s.to_string(),
                ..Self::default()
            };
        }
        let answer = value
            .get("result")
            .or_else(|| value.get("answer"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Object(_) => v
                    .get("answer")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| v.to_string()),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let list = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        let id = id.or_else(|| {
            value
                .get("job_id")
                .or_else(|| value.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        Self {
            id,
            answer,
            sources: list("sources"),
            images: list("images"),
        }
    }
}

/// Splits a byte stream into lines.
///
/// Bytes are buffered until a newline arrives, so a multi-byte character
/// or a JSON object split across chunks is reassembled before decoding.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every complete, non-empty line it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// Decode one stream line.
///
/// `Ok(None)` for lines that are valid JSON but not step events (and for
/// SSE keep-alives); `Err` for malformed JSON, which callers log and skip.
pub fn parse_event_line(line: &str) -> Result<Option<StreamEvent>, serde_json::Error> {
    let json = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if json.is_empty() || json == "[DONE]" {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(json)?;
    Ok(StreamEvent::from_value(value))
}
