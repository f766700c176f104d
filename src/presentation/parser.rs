//! Agent output classification and normalization.
//!
//! Raw messages from the presentation pipeline are loosely shaped JSON.
//! [`AgentEvent::classify`] turns them into a closed set of variants;
//! anything it does not recognise is a [`ParseError::UnknownEvent`] so new
//! backend shapes show up in logs instead of silently becoming generic
//! records. [`PresentationParser::parse_agent_output`] then decides how the
//! result merges into the current [`PresentationState`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::records::{IdGen, Link, LogEntry, Phase, SlideEntry};
use super::state::PresentationState;
use super::text::{extract_json_from_text, is_markdown};

pub const TOPIC_CHECKER: &str = "topic_checker_agent";
pub const PLANNER: &str = "planner_agent";
pub const OUTLINE: &str = "outline_agent";
pub const WEB_SEARCH: &str = "web_search_agent";
pub const RESEARCH: &str = "research_agent";
pub const BROWSER_AGENT: &str = "browser_agent";
pub const BROWSER_WORKER_PREFIX: &str = "browser_worker";
pub const ENHANCED_SLIDE_GENERATOR: &str = "enhanced_slide_generator";
pub const SLIDE_GENERATOR: &str = "slide_generator";
pub const HTML_GENERATOR: &str = "html_generator";
pub const ORCHESTRATOR: &str = "orchestrator";

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unrecognised agent event (type={kind:?}, author={author:?})")]
    UnknownEvent {
        kind: Option<String>,
        author: Option<String>,
    },
    #[error("agent event is not a JSON object")]
    NotAnObject,
    #[error("agent event has a mistyped field: {0}")]
    Malformed(String),
    #[error("slide event from {author} carries no slide number")]
    MissingSlideNumber { author: String },
}

/// Pipeline phase implied by an author tag.
pub fn phase_for_author(author: &str) -> Phase {
    match author {
        TOPIC_CHECKER | PLANNER | OUTLINE => Phase::Planning,
        WEB_SEARCH | RESEARCH | BROWSER_AGENT => Phase::Research,
        a if is_browser_worker(a) => Phase::Research,
        ENHANCED_SLIDE_GENERATOR | SLIDE_GENERATOR | HTML_GENERATOR => Phase::Generation,
        _ => Phase::Unknown,
    }
}

pub fn is_browser_worker(author: &str) -> bool {
    author.starts_with(BROWSER_WORKER_PREFIX)
}

fn is_slide_author(author: &str) -> bool {
    matches!(author, ENHANCED_SLIDE_GENERATOR | SLIDE_GENERATOR | HTML_GENERATOR)
}

fn is_known_author(author: &str) -> bool {
    author == ORCHESTRATOR || phase_for_author(author) != Phase::Unknown
}

/// Loose view over every field the backend has been seen to send.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawAgentMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    author: Option<String>,
    agent_name: Option<String>,
    text: Option<Value>,
    content: Option<Value>,
    message: Option<Value>,
    tool_name: Option<String>,
    name: Option<String>,
    result: Option<Value>,
    response: Option<Value>,
    html_content: Option<Value>,
    thinking: Option<Value>,
    slide_index: Option<u32>,
    slide_number: Option<u32>,
    link: Option<Value>,
    links: Option<Vec<Value>>,
    url: Option<String>,
    title: Option<String>,
    summary: Option<Value>,
    query: Option<String>,
    phase: Option<String>,
    error: Option<Value>,
}

fn value_text(v: &Option<Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(Value::String(_)) => None,
        Some(other) => Some(other.to_string()),
    }
}

fn link_from_value(v: &Value) -> Option<Link> {
    match v {
        Value::String(s) if !s.is_empty() => Some(Link {
            url: s.clone(),
            title: None,
        }),
        Value::Object(_) => {
            let url = v.get("url").or_else(|| v.get("link")).and_then(Value::as_str)?;
            Some(Link {
                url: url.to_string(),
                title: v.get("title").and_then(Value::as_str).map(str::to_string),
            })
        }
        _ => None,
    }
}

impl RawAgentMessage {
    fn author(&self) -> Option<&str> {
        self.agent_name
            .as_deref()
            .or(self.author.as_deref())
            .filter(|a| !a.is_empty())
    }

    fn text(&self) -> Option<String> {
        value_text(&self.text)
            .or_else(|| value_text(&self.content))
            .or_else(|| value_text(&self.message))
    }

    fn tool(&self) -> Option<String> {
        self.tool_name.clone().or_else(|| self.name.clone())
    }

    /// Tool payload with embedded JSON unwrapped.
    fn payload(&self) -> Value {
        let raw = self
            .result
            .as_ref()
            .or(self.response.as_ref())
            .or(self.html_content.as_ref())
            .or(self.text.as_ref())
            .cloned()
            .unwrap_or(Value::Null);
        match raw {
            Value::String(s) => extract_json_from_text(&s),
            other => other,
        }
    }
}

/// Closed set of agent output kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ToolCall {
        agent: String,
        tool_name: Option<String>,
        text: Option<String>,
    },
    ToolResponse {
        agent: String,
        tool_name: Option<String>,
        payload: Value,
    },
    /// One chunk of slide generation. `slide_number` is 1-based.
    SlideChunk {
        agent: String,
        slide_number: u32,
        thinking: Option<String>,
        html: Option<String>,
    },
    BrowserWorker {
        worker: String,
        text: Option<String>,
        link: Option<Link>,
        summary: Option<String>,
    },
    SearchResults {
        agent: String,
        query: Option<String>,
        links: Vec<Link>,
    },
    Narration {
        author: String,
        text: String,
        phase: Phase,
    },
    Thinking {
        author: String,
        text: String,
    },
    Error {
        author: String,
        message: String,
    },
}

impl AgentEvent {
    /// Classify a raw message by its `type` discriminant, then by author.
    pub fn classify(message: &Value) -> Result<Self, ParseError> {
        if !message.is_object() {
            return Err(ParseError::NotAnObject);
        }
        let raw: RawAgentMessage =
            serde_json::from_value(message.clone()).map_err(|e| ParseError::Malformed(e.to_string()))?;
        let unknown = || ParseError::UnknownEvent {
            kind: raw.kind.clone(),
            author: raw.author().map(str::to_string),
        };
        let author = raw.author().map(str::to_string);

        if let Some(a) = author.as_deref().filter(|a| is_browser_worker(a)) {
            return Ok(Self::browser_worker(a, &raw));
        }

        match raw.kind.as_deref() {
            Some("tool_call") => {
                let agent = author.ok_or_else(unknown)?;
                Ok(AgentEvent::ToolCall {
                    agent,
                    tool_name: raw.tool(),
                    text: raw.text(),
                })
            }
            Some("tool_response") => {
                let agent = author.ok_or_else(unknown)?;
                Self::tool_response(agent, &raw)
            }
            Some("slide") | Some("slide_chunk") | Some("slide_update") => {
                let agent = author.unwrap_or_else(|| SLIDE_GENERATOR.to_string());
                Self::slide_chunk(agent, &raw, &raw.payload())
            }
            Some("search_results") => Ok(AgentEvent::SearchResults {
                agent: author.unwrap_or_else(|| WEB_SEARCH.to_string()),
                query: raw.query.clone(),
                links: raw.links.iter().flatten().filter_map(link_from_value).collect(),
            }),
            Some("thinking") => Ok(AgentEvent::Thinking {
                author: author.unwrap_or_else(|| ORCHESTRATOR.to_string()),
                text: value_text(&raw.thinking).or_else(|| raw.text()).unwrap_or_default(),
            }),
            Some("error") => Ok(AgentEvent::Error {
                author: author.unwrap_or_else(|| ORCHESTRATOR.to_string()),
                message: value_text(&raw.error)
                    .or_else(|| raw.text())
                    .unwrap_or_else(|| "agent error".into()),
            }),
            Some("narration") | Some("orchestration") | Some("text") | Some("message") => {
                let author = author.unwrap_or_else(|| ORCHESTRATOR.to_string());
                Self::narration(author, &raw).ok_or_else(unknown)
            }
            Some(_) => Err(unknown()),
            None => match author {
                Some(a) if is_slide_author(&a) && (raw.slide_number.is_some() || raw.slide_index.is_some()) => {
                    Self::slide_chunk(a, &raw, &raw.payload())
                }
                Some(a) if is_known_author(&a) => Self::narration(a, &raw).ok_or_else(unknown),
                _ => Err(unknown()),
            },
        }
    }

    fn browser_worker(worker: &str, raw: &RawAgentMessage) -> Self {
        let link = raw
            .link
            .as_ref()
            .and_then(link_from_value)
            .or_else(|| {
                raw.url.as_ref().map(|url| Link {
                    url: url.clone(),
                    title: raw.title.clone(),
                })
            });
        AgentEvent::BrowserWorker {
            worker: worker.to_string(),
            text: raw.text(),
            link,
            summary: value_text(&raw.summary),
        }
    }

    fn tool_response(agent: String, raw: &RawAgentMessage) -> Result<Self, ParseError> {
        let payload = raw.payload();
        if is_slide_author(&agent) {
            return Self::slide_chunk(agent, raw, &payload);
        }
        if agent == WEB_SEARCH {
            let results = payload
                .get("results")
                .or_else(|| payload.get("links"))
                .and_then(Value::as_array);
            if let Some(results) = results {
                return Ok(AgentEvent::SearchResults {
                    query: payload
                        .get("query")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| raw.query.clone()),
                    links: results.iter().filter_map(link_from_value).collect(),
                    agent,
                });
            }
        }
        Ok(AgentEvent::ToolResponse {
            agent,
            tool_name: raw.tool(),
            payload,
        })
    }

    fn slide_chunk(agent: String, raw: &RawAgentMessage, payload: &Value) -> Result<Self, ParseError> {
        let field = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| payload.get(*k).and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let index = slide_field(raw.slide_index, payload, "slide_index")?;
        let number = slide_field(raw.slide_number, payload, "slide_number")?;
        let slide_number = match (number, index) {
            (Some(n), _) if n > 0 => n,
            (_, Some(i)) => i
                .checked_add(1)
                .ok_or_else(|| ParseError::Malformed(format!("slide_index {i} is out of range")))?,
            _ => return Err(ParseError::MissingSlideNumber { author: agent }),
        };
        let html = field(&["generated_html", "html_content", "html"]).or_else(|| {
            // A bare HTML string as the payload.
            payload.as_str().filter(|s| s.trim_start().starts_with('<')).map(str::to_string)
        });
        let thinking = field(&["thinking", "reasoning"]).or_else(|| value_text(&raw.thinking));
        Ok(AgentEvent::SlideChunk {
            agent,
            slide_number,
            thinking,
            html,
        })
    }

    fn narration(author: String, raw: &RawAgentMessage) -> Option<Self> {
        let text = raw.text()?;
        let phase = raw
            .phase
            .as_deref()
            .map(Phase::from_label)
            .filter(|p| *p != Phase::Unknown)
            .unwrap_or_else(|| phase_for_author(&author));
        Some(AgentEvent::Narration { author, text, phase })
    }
}

/// A slide position from the message itself or from its payload. Values
/// that do not fit in `u32` are malformed rather than truncated.
fn slide_field(direct: Option<u32>, payload: &Value, key: &str) -> Result<Option<u32>, ParseError> {
    if direct.is_some() {
        return Ok(direct);
    }
    match payload.get(key).and_then(Value::as_u64) {
        Some(n) => u32::try_from(n)
            .map(Some)
            .map_err(|_| ParseError::Malformed(format!("{key} {n} is out of range"))),
        None => Ok(None),
    }
}

/// How the caller should merge a parsed output into state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    /// Insert at the slide's number, shifting later slides up by one.
    Insert,
}

/// Normalized output of one agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedOutput {
    Log { action: Action, entry: LogEntry },
    LogWithMetadata {
        action: Action,
        entry: LogEntry,
        metadata: Value,
    },
    Slide { action: Action, slide: SlideEntry },
    BrowserWorker { action: Action, entry: LogEntry },
}

/// Stateless apart from its id source; safe to share.
#[derive(Debug, Default)]
pub struct PresentationParser {
    ids: IdGen,
}

impl PresentationParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one agent message against the current state.
    pub fn parse_agent_output(
        &self,
        message: &Value,
        state: &PresentationState,
    ) -> Result<ParsedOutput, ParseError> {
        let event = match AgentEvent::classify(message) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, "dropping agent output");
                return Err(e);
            }
        };
        let timestamp = message
            .get("timestamp")
            .and_then(|t| t.as_u64().or_else(|| t.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or_else(|| self.ids.timestamp());
        debug!(?event, "classified agent output");
        Ok(self.normalize(event, timestamp, state))
    }

    fn entry(&self, author: &str, timestamp: u64, phase: Phase) -> LogEntry {
        LogEntry::new(self.ids.log_id(author, timestamp), author, timestamp, phase)
    }

    fn normalize(&self, event: AgentEvent, timestamp: u64, state: &PresentationState) -> ParsedOutput {
        match event {
            AgentEvent::ToolCall { agent, tool_name, text } => {
                let mut entry = self.entry(&agent, timestamp, phase_for_author(&agent));
                entry.is_markdown = text.as_deref().is_some_and(is_markdown);
                entry.text = text;
                entry.tool_name = tool_name;
                ParsedOutput::Log {
                    action: Action::Create,
                    entry,
                }
            }
            AgentEvent::ToolResponse {
                agent,
                tool_name,
                payload,
            } => {
                let mut entry = self.entry(&agent, timestamp, phase_for_author(&agent));
                entry.tool_name = tool_name;
                match &payload {
                    Value::String(s) => {
                        entry.is_markdown = is_markdown(s);
                        entry.text = Some(s.clone());
                    }
                    other => {
                        entry.text = other
                            .get("summary")
                            .or_else(|| other.get("text"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        entry.html = other
                            .get("html")
                            .or_else(|| other.get("html_content"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                    }
                }
                ParsedOutput::LogWithMetadata {
                    action: Action::Create,
                    entry,
                    metadata: payload,
                }
            }
            AgentEvent::SearchResults { agent, query, links } => {
                let mut entry = self.entry(&agent, timestamp, Phase::Research);
                entry.text = query.clone();
                entry.links = links;
                ParsedOutput::LogWithMetadata {
                    action: Action::Create,
                    entry,
                    metadata: serde_json::json!({ "query": query }),
                }
            }
            AgentEvent::SlideChunk {
                slide_number,
                thinking,
                html,
                ..
            } => self.merge_slide(slide_number, thinking, html, timestamp, state),
            AgentEvent::BrowserWorker {
                worker,
                text,
                link,
                summary,
            } => self.merge_worker(worker, text, link, summary, timestamp, state),
            AgentEvent::Narration { author, text, phase } => {
                let mut entry = self.entry(&author, timestamp, phase);
                entry.is_markdown = is_markdown(&text);
                entry.text = Some(text);
                ParsedOutput::Log {
                    action: Action::Create,
                    entry,
                }
            }
            AgentEvent::Thinking { author, text } => {
                let phase = phase_for_author(&author);
                let mut entry = self.entry(&author, timestamp, phase);
                entry.thinking = Some(text);
                ParsedOutput::Log {
                    action: Action::Create,
                    entry,
                }
            }
            AgentEvent::Error { author, message } => {
                let phase = phase_for_author(&author);
                let mut entry = self.entry(&author, timestamp, phase);
                entry.text = Some(message.clone());
                ParsedOutput::LogWithMetadata {
                    action: Action::Create,
                    entry,
                    metadata: serde_json::json!({ "error": message }),
                }
            }
        }
    }

    /// One live record per worker: append new links, and set the summary
    /// only when the update carries one.
    fn merge_worker(
        &self,
        worker: String,
        text: Option<String>,
        link: Option<Link>,
        summary: Option<String>,
        timestamp: u64,
        state: &PresentationState,
    ) -> ParsedOutput {
        match state.worker_log(&worker) {
            Some(existing) => {
                let mut entry = existing.clone();
                if let Some(link) = link {
                    if !entry.links.contains(&link) {
                        entry.links.push(link);
                    }
                }
                if let Some(text) = text {
                    entry.is_markdown = is_markdown(&text);
                    entry.text = Some(text);
                }
                if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
                    entry.summary = Some(summary);
                }
                ParsedOutput::BrowserWorker {
                    action: Action::Update,
                    entry,
                }
            }
            None => {
                let mut entry = self.entry(&worker, timestamp, Phase::Research);
                entry.is_markdown = text.as_deref().is_some_and(is_markdown);
                entry.text = text;
                entry.links.extend(link);
                entry.summary = summary.filter(|s| !s.trim().is_empty());
                ParsedOutput::BrowserWorker {
                    action: Action::Create,
                    entry,
                }
            }
        }
    }

    /// Create, fill in, or insert a slide.
    ///
    /// A complete payload landing on an already complete slide is read as a
    /// new slide inserted at that position.
    fn merge_slide(
        &self,
        slide_number: u32,
        thinking: Option<String>,
        html: Option<String>,
        timestamp: u64,
        state: &PresentationState,
    ) -> ParsedOutput {
        let incoming = SlideEntry::new(slide_number, thinking.clone(), html.clone(), timestamp);
        match state.slide(slide_number) {
            None => ParsedOutput::Slide {
                action: Action::Create,
                slide: incoming,
            },
            Some(existing) if existing.is_complete && incoming.is_complete => ParsedOutput::Slide {
                action: Action::Insert,
                slide: incoming,
            },
            Some(existing) => ParsedOutput::Slide {
                action: Action::Update,
                slide: existing.merged_with(thinking, html, timestamp),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(msg: Value, state: &PresentationState) -> ParsedOutput {
        PresentationParser::new().parse_agent_output(&msg, state).unwrap()
    }

    #[test]
    fn topic_checker_tool_call_is_planning_log() {
        let out = parse(
            json!({"type": "tool_call", "agent_name": "topic_checker_agent", "text": "checking topic"}),
            &PresentationState::default(),
        );
        match out {
            ParsedOutput::Log { action, entry } => {
                assert_eq!(action, Action::Create);
                assert_eq!(entry.author, "topic_checker_agent");
                assert_eq!(entry.phase, Phase::Planning);
                assert_eq!(entry.text.as_deref(), Some("checking topic"));
            }
            other => panic!("expected log, got {other:?}"),
        }
    }

    #[test]
    fn enhanced_slide_generator_index_is_zero_based() {
        let result = r#"```json
{"generated_html": "<section><h1>Three</h1></section>"}
```"#;
        let out = parse(
            json!({
                "type": "tool_response",
                "agent_name": "enhanced_slide_generator",
                "slide_index": 2,
                "result": result
            }),
            &PresentationState::default(),
        );
        match out {
            ParsedOutput::Slide { action, slide } => {
                assert_eq!(action, Action::Create);
                assert_eq!(slide.slide_number, 3);
                assert_eq!(slide.html_content.as_deref(), Some("<section><h1>Three</h1></section>"));
                assert!(!slide.is_complete);
            }
            other => panic!("expected slide, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        let err = PresentationParser::new()
            .parse_agent_output(&json!({"type": "hologram", "author": "x"}), &PresentationState::default())
            .unwrap_err();
        assert!(matches!(err, ParseError::UnknownEvent { .. }));
    }

    #[test]
    fn unknown_author_without_type_is_an_error() {
        let err = AgentEvent::classify(&json!({"author": "mystery", "text": "hi"})).unwrap_err();
        assert!(matches!(err, ParseError::UnknownEvent { .. }));
    }

    #[test]
    fn non_object_is_rejected() {
        assert_eq!(AgentEvent::classify(&json!("hi")).unwrap_err(), ParseError::NotAnObject);
    }

    #[test]
    fn slide_without_number_is_rejected() {
        let err = AgentEvent::classify(&json!({"type": "slide", "html_content": "<p/>"})).unwrap_err();
        assert!(matches!(err, ParseError::MissingSlideNumber { .. }));
    }

    #[test]
    fn orchestrator_narration_takes_phase_label() {
        let out = parse(
            json!({"author": "orchestrator", "text": "## Now researching", "phase": "research"}),
            &PresentationState::default(),
        );
        let ParsedOutput::Log { entry, .. } = out else { panic!("expected log") };
        assert_eq!(entry.phase, Phase::Research);
        assert!(entry.is_markdown);
    }

    #[test]
    fn web_search_results_become_links() {
        let out = parse(
            json!({
                "type": "tool_response",
                "agent_name": "web_search_agent",
                "result": "{\"query\": \"rust\", \"results\": [{\"url\": \"https://a\", \"title\": \"A\"}, \"https://b\"]}"
            }),
            &PresentationState::default(),
        );
        let ParsedOutput::LogWithMetadata { entry, metadata, .. } = out else {
            panic!("expected log_with_metadata")
        };
        assert_eq!(entry.links.len(), 2);
        assert_eq!(entry.links[0].title.as_deref(), Some("A"));
        assert_eq!(metadata["query"], "rust");
    }

    #[test]
    fn generic_tool_response_keeps_payload_as_metadata() {
        let out = parse(
            json!({"type": "tool_response", "agent_name": "planner_agent", "tool_name": "outline", "result": "{\"slides\": 5}"}),
            &PresentationState::default(),
        );
        let ParsedOutput::LogWithMetadata { entry, metadata, .. } = out else { panic!() };
        assert_eq!(metadata, json!({"slides": 5}));
        assert_eq!(entry.tool_name.as_deref(), Some("outline"));
        assert_eq!(entry.phase, Phase::Planning);
    }

    #[test]
    fn worker_updates_merge_in_place() {
        let parser = PresentationParser::new();
        let mut state = PresentationState::default();

        let first = parser
            .parse_agent_output(
                &json!({"author": "browser_worker_1", "text": "opening", "link": "https://a"}),
                &state,
            )
            .unwrap();
        assert!(matches!(first, ParsedOutput::BrowserWorker { action: Action::Create, .. }));
        state.apply(first);

        let second = parser
            .parse_agent_output(
                &json!({"author": "browser_worker_1", "link": {"url": "https://b"}, "summary": "done"}),
                &state,
            )
            .unwrap();
        state.apply(second);

        // an empty summary never erases the previous one
        let third = parser
            .parse_agent_output(&json!({"author": "browser_worker_1", "summary": "", "link": "https://a"}), &state)
            .unwrap();
        let ParsedOutput::BrowserWorker { action, ref entry } = third else { panic!() };
        assert_eq!(action, Action::Update);
        assert_eq!(entry.summary.as_deref(), Some("done"));
        assert_eq!(entry.links.len(), 2);
        state.apply(third);

        assert_eq!(state.logs().len(), 1);
        assert!(state.logs()[0].is_finished());
    }

    #[test]
    fn slide_fill_in_then_insertion() {
        let parser = PresentationParser::new();
        let mut state = PresentationState::default();
        let msg = |n: u32, thinking: Option<&str>, html: Option<&str>| {
            json!({"type": "slide", "author": "slide_generator", "slide_number": n,
                   "thinking": thinking, "html_content": html})
        };

        let a = parser.parse_agent_output(&msg(1, Some("why"), None), &state).unwrap();
        assert!(matches!(a, ParsedOutput::Slide { action: Action::Create, .. }));
        state.apply(a);

        let b = parser.parse_agent_output(&msg(1, None, Some("<p>1</p>")), &state).unwrap();
        let ParsedOutput::Slide { action, ref slide } = b else { panic!() };
        assert_eq!(action, Action::Update);
        assert!(slide.is_complete);
        state.apply(b);

        let c = parser
            .parse_agent_output(&msg(1, Some("new"), Some("<p>new</p>")), &state)
            .unwrap();
        assert!(matches!(c, ParsedOutput::Slide { action: Action::Insert, .. }));
    }

    #[test]
    fn phase_table() {
        assert_eq!(phase_for_author("outline_agent"), Phase::Planning);
        assert_eq!(phase_for_author("browser_worker_12"), Phase::Research);
        assert_eq!(phase_for_author("html_generator"), Phase::Generation);
        assert_eq!(phase_for_author("orchestrator"), Phase::Unknown);
    }

    #[test]
    fn parsed_output_is_tagged_by_type() {
        let out = parse(
            json!({"type": "tool_call", "agent_name": "planner_agent", "text": "plan"}),
            &PresentationState::default(),
        );
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["type"], "log");
        assert_eq!(v["action"], "create");
        assert_eq!(v["entry"]["phase"], "planning");
    }
}
