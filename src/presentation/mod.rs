//! # Presentation agent output
//!
//! Normalizes the heterogeneous event stream of the presentation agent
//! (tool calls, per-slide generation chunks, orchestration narration,
//! browser workers) into [`LogEntry`] and [`SlideEntry`] records.
//!
//! ```rust,ignore
//! let parser = PresentationParser::new();
//! let mut state = PresentationState::default();
//! let out = parser.parse_agent_output(&message, &state)?;
//! state.apply(out);
//! ```

pub mod parser;
pub mod records;
pub mod state;
pub mod text;

pub use parser::{phase_for_author, Action, AgentEvent, ParseError, ParsedOutput, PresentationParser};
pub use records::{is_log_duplicate, is_slide_duplicate, Link, LogEntry, Phase, SlideEntry};
pub use state::PresentationState;
pub use text::{extract_json_from_text, is_markdown, markdown_features};
