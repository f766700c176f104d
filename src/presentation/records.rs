//! Normalized log and slide records.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::now_ms;

/// Which part of the presentation pipeline produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Research,
    Generation,
    #[default]
    Unknown,
}

impl Phase {
    /// Map a free-form phase label sent by the orchestrator.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "planning" | "plan" => Phase::Planning,
            "research" | "researching" => Phase::Research,
            "generation" | "generating" | "slides" => Phase::Generation,
            _ => Phase::Unknown,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Planning => "planning",
            Phase::Research => "research",
            Phase::Generation => "generation",
            Phase::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A link surfaced by a search or browsing agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// One unit of narration or progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    /// Category tag used for UI routing; also the merge key for workers.
    pub author: String,
    pub timestamp: u64,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Terminal summary; present once a worker has finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub is_markdown: bool,
}

impl LogEntry {
    pub fn new(id: String, author: impl Into<String>, timestamp: u64, phase: Phase) -> Self {
        Self {
            id,
            author: author.into(),
            timestamp,
            phase,
            text: None,
            thinking: None,
            links: Vec::new(),
            html: None,
            tool_name: None,
            summary: None,
            is_markdown: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.summary.is_some()
    }
}

/// One slide under generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideEntry {
    /// 1-based.
    pub slide_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    pub is_complete: bool,
    pub timestamp: u64,
    pub last_updated: u64,
}

impl SlideEntry {
    pub fn new(slide_number: u32, thinking: Option<String>, html_content: Option<String>, now: u64) -> Self {
        let is_complete = has_text(&thinking) && has_text(&html_content);
        Self {
            slide_number,
            thinking,
            html_content,
            is_complete,
            timestamp: now,
            last_updated: now,
        }
    }

    /// Fill in fields the update carries, keeping the rest.
    pub fn merged_with(&self, thinking: Option<String>, html_content: Option<String>, now: u64) -> Self {
        let thinking = thinking.filter(|t| !t.is_empty()).or_else(|| self.thinking.clone());
        let html_content = html_content
            .filter(|h| !h.is_empty())
            .or_else(|| self.html_content.clone());
        let is_complete = has_text(&thinking) && has_text(&html_content);
        Self {
            slide_number: self.slide_number,
            thinking,
            html_content,
            is_complete,
            timestamp: self.timestamp,
            last_updated: now,
        }
    }
}

fn has_text(s: &Option<String>) -> bool {
    s.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Source of record ids and fallback timestamps.
///
/// Ids combine author, timestamp and a process-wide sequence so two records
/// for the same author in the same millisecond still differ. Fallback
/// timestamps never repeat, which keeps `(author, timestamp)` usable as a
/// duplicate key for messages that arrive without one.
#[derive(Debug, Default)]
pub struct IdGen {
    seq: AtomicU64,
    last_ts: AtomicU64,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_id(&self, author: &str, timestamp: u64) -> String {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{author}-{timestamp}-{n}")
    }

    /// Strictly increasing wall-clock milliseconds.
    pub fn timestamp(&self) -> u64 {
        let now = now_ms();
        let mut prev = self.last_ts.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_ts
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Same id, or same `(author, timestamp)`.
pub fn is_log_duplicate(entry: &LogEntry, existing: &[LogEntry]) -> bool {
    existing
        .iter()
        .any(|e| e.id == entry.id || (e.author == entry.author && e.timestamp == entry.timestamp))
}

/// A slide with the same number already exists.
pub fn is_slide_duplicate<'a>(slide: &SlideEntry, mut existing: impl Iterator<Item = &'a SlideEntry>) -> bool {
    existing.any(|s| s.slide_number == slide.slide_number)
}
