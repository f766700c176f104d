//! # research-stream
//!
//! Client-side orchestration for long-running deep-research jobs: a
//! streamed start with fallback to adaptive polling, recovery of an
//! interrupted job from a stored breadcrumb, normalization of the
//! presentation agent's event stream into log and slide records, and an
//! undo/redo engine for editing the generated slide HTML.
//!
//! | Module | Role |
//! |---|---|
//! | [`research`] | job orchestrator and run state machine |
//! | [`queue_status`] | backend wire types, [`queue_status::ResearchApi`] seam and HTTP client |
//! | [`connection`] | interruption detection over the breadcrumb store |
//! | [`presentation`] | agent-event parser and record store |
//! | [`document`] | slide document model and change tracking |
//! | [`store`] | session breadcrumb storage (memory or SQLite) |

pub mod cli;
pub mod config;
pub mod connection;
pub mod document;
pub mod error;
pub mod events;
pub mod presentation;
pub mod queue_status;
pub mod research;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

pub use config::{ClientConfig, PollingConfig};
pub use error::{ResearchError, Result};
pub use queue_status::{HttpResearchApi, QueueStatusService, ResearchApi, ResearchConfig};
pub use research::{ConnectionStatus, ResearchStream, ResearchUpdate, RunOutcome, RunPhase};
pub use store::{MemoryStore, SessionStore, SharedStore, SqliteStore};

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
