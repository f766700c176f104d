// Normalizing a presentation agent's event stream end to end.

use rstest::rstest;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use research_stream::presentation::{
    is_markdown, markdown_features, Action, ParseError, ParsedOutput, Phase, PresentationParser,
    PresentationState,
};

fn feed(parser: &PresentationParser, state: &mut PresentationState, message: Value) -> ParsedOutput {
    let out = assert_ok!(parser.parse_agent_output(&message, state));
    state.apply(out.clone());
    out
}

fn action_of(out: &ParsedOutput) -> Action {
    match out {
        ParsedOutput::Log { action, .. }
        | ParsedOutput::LogWithMetadata { action, .. }
        | ParsedOutput::Slide { action, .. }
        | ParsedOutput::BrowserWorker { action, .. } => *action,
    }
}

#[test]
fn test_topic_checker_and_zero_based_slide_index() {
    let parser = PresentationParser::new();
    let mut state = PresentationState::default();

    let out = feed(
        &parser,
        &mut state,
        json!({"type": "tool_call", "agent_name": "topic_checker_agent", "text": "Is the topic safe?", "timestamp": 100}),
    );
    match out {
        ParsedOutput::Log { action, entry } => {
            assert_eq!(action, Action::Create);
            assert_eq!(entry.phase, Phase::Planning);
        }
        other => panic!("expected a log record, got {other:?}"),
    }

    let out = feed(
        &parser,
        &mut state,
        json!({
            "type": "tool_response",
            "agent_name": "enhanced_slide_generator",
            "slide_index": 2,
            "result": {"generated_html": "<section>Third</section>", "thinking": "closing slide"},
            "timestamp": 200
        }),
    );
    match out {
        ParsedOutput::Slide { action, slide } => {
            assert_eq!(action, Action::Create);
            assert_eq!(slide.slide_number, 3);
            assert!(slide.is_complete);
        }
        other => panic!("expected a slide record, got {other:?}"),
    }

    assert_eq!(state.logs().len(), 1);
    assert_eq!(state.slide(3).and_then(|s| s.html_content.as_deref()), Some("<section>Third</section>"));
}

#[test]
fn test_slide_chunks_fill_in_then_complete_slide_inserts() {
    let parser = PresentationParser::new();
    let mut state = PresentationState::default();

    let first = feed(
        &parser,
        &mut state,
        json!({"type": "slide", "slide_number": 1, "thinking": "open with the question", "timestamp": 1}),
    );
    assert_eq!(action_of(&first), Action::Create);
    assert!(!state.slide(1).unwrap().is_complete);

    let second = feed(
        &parser,
        &mut state,
        json!({"type": "slide", "slide_number": 1, "html_content": "<section>One</section>", "timestamp": 2}),
    );
    assert_eq!(action_of(&second), Action::Update);
    let slide = state.slide(1).unwrap();
    assert!(slide.is_complete);
    assert_eq!(slide.thinking.as_deref(), Some("open with the question"));
    assert_eq!(slide.timestamp, 1);
    assert_eq!(slide.last_updated, 2);

    feed(
        &parser,
        &mut state,
        json!({"type": "slide", "slide_number": 2, "thinking": "t", "html_content": "<section>Two</section>", "timestamp": 3}),
    );

    // A complete payload for an already complete slide is a new slide at
    // that position.
    let third = feed(
        &parser,
        &mut state,
        json!({"type": "slide", "slide_number": 1, "thinking": "new intro", "html_content": "<section>Intro</section>", "timestamp": 4}),
    );
    assert_eq!(action_of(&third), Action::Insert);

    let order: Vec<(u32, &str)> = state
        .slides()
        .map(|s| (s.slide_number, s.html_content.as_deref().unwrap_or("")))
        .collect();
    assert_eq!(
        order,
        vec![
            (1, "<section>Intro</section>"),
            (2, "<section>One</section>"),
            (3, "<section>Two</section>"),
        ]
    );
}

#[test]
fn test_browser_worker_updates_merge_into_one_record() {
    let parser = PresentationParser::new();
    let mut state = PresentationState::default();

    let out = feed(
        &parser,
        &mut state,
        json!({"agent_name": "browser_worker_2", "text": "Opening page", "link": {"url": "https://a.example", "title": "A"}, "timestamp": 10}),
    );
    assert_eq!(action_of(&out), Action::Create);

    feed(
        &parser,
        &mut state,
        json!({"agent_name": "browser_worker_2", "url": "https://b.example", "timestamp": 11}),
    );
    // Repeated link is not duplicated; empty summary is ignored.
    feed(
        &parser,
        &mut state,
        json!({"agent_name": "browser_worker_2", "link": {"url": "https://a.example", "title": "A"}, "summary": "  ", "timestamp": 12}),
    );
    let out = feed(
        &parser,
        &mut state,
        json!({"agent_name": "browser_worker_2", "summary": "Both pages agree.", "timestamp": 13}),
    );
    assert_eq!(action_of(&out), Action::Update);

    assert_eq!(state.logs().len(), 1);
    let worker = state.worker_log("browser_worker_2").unwrap();
    let urls: Vec<&str> = worker.links.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(urls, vec!["https://a.example", "https://b.example"]);
    assert_eq!(worker.summary.as_deref(), Some("Both pages agree."));
    assert!(worker.is_finished());
    assert_eq!(worker.phase, Phase::Research);
}

#[test]
fn test_distinct_workers_get_distinct_records() {
    let parser = PresentationParser::new();
    let mut state = PresentationState::default();
    feed(&parser, &mut state, json!({"agent_name": "browser_worker_1", "text": "a", "timestamp": 1}));
    feed(&parser, &mut state, json!({"agent_name": "browser_worker_2", "text": "b", "timestamp": 1}));
    assert_eq!(state.logs().len(), 2);
}

#[test]
fn test_replayed_message_is_not_stored_twice() {
    let parser = PresentationParser::new();
    let mut state = PresentationState::default();
    let msg = json!({"author": "orchestrator", "text": "Starting research", "timestamp": 42});

    let out = assert_ok!(parser.parse_agent_output(&msg, &state));
    assert!(state.apply(out));
    let again = assert_ok!(parser.parse_agent_output(&msg, &state));
    assert!(!state.apply(again));
    assert_eq!(state.logs().len(), 1);
}

#[test]
fn test_unrecognised_messages_leave_state_untouched() {
    let parser = PresentationParser::new();
    let state = PresentationState::default();

    let err = assert_err!(parser.parse_agent_output(&json!({"type": "telepathy", "agent_name": "planner_agent"}), &state));
    assert!(matches!(err, ParseError::UnknownEvent { .. }));
    assert_err!(parser.parse_agent_output(&json!([1, 2, 3]), &state));
    assert_err!(parser.parse_agent_output(&json!({"type": "tool_call"}), &state));
    assert!(state.logs().is_empty());
}

#[test]
fn test_log_ids_are_unique_within_one_millisecond() {
    let parser = PresentationParser::new();
    let state = PresentationState::default();
    let msg = json!({"type": "tool_call", "agent_name": "planner_agent", "text": "x", "timestamp": 7});

    let ids: Vec<String> = (0..3)
        .map(|_| match assert_ok!(parser.parse_agent_output(&msg, &state)) {
            ParsedOutput::Log { entry, .. } => entry.id,
            other => panic!("expected log, got {other:?}"),
        })
        .collect();
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
}

#[test]
fn test_state_serializes_for_the_ui() {
    let parser = PresentationParser::new();
    let mut state = PresentationState::default();
    feed(&parser, &mut state, json!({"type": "slide", "slide_index": 0, "html_content": "<p>x</p>", "timestamp": 5}));
    let v = serde_json::to_value(&state).unwrap();
    assert_eq!(v["slides"]["1"]["slide_number"], 1);
    assert_eq!(v["slides"]["1"]["is_complete"], false);
}

#[rstest]
#[case::index_at_top(json!({"type": "tool_response", "agent_name": "enhanced_slide_generator", "slide_index": 4294967295u64, "result": {"generated_html": "<p/>"}}))]
#[case::index_past_u32(json!({"type": "tool_response", "agent_name": "enhanced_slide_generator", "result": {"slide_index": 4294967296u64, "generated_html": "<p/>"}}))]
#[case::number_past_u32(json!({"type": "tool_response", "agent_name": "slide_generator", "result": {"slide_number": 8589934593u64, "html": "<p/>"}}))]
#[case::top_level_number_past_u32(json!({"type": "slide", "slide_number": 4294967296u64, "html_content": "<p/>"}))]
fn test_out_of_range_slide_positions_are_malformed(#[case] message: Value) {
    let parser = PresentationParser::new();
    let state = PresentationState::default();
    let err = assert_err!(parser.parse_agent_output(&message, &state));
    assert!(matches!(err, ParseError::Malformed(_)), "{err:?}");
    assert_eq!(state.slide_count(), 0);
}

#[rstest]
#[case("# Heading", true)]
#[case("Some **bold** claim", true)]
#[case("- first\n- second", true)]
#[case("See [docs](https://docs.rs)", true)]
#[case("> quoted", true)]
#[case("| a | b |", true)]
#[case("call `fetch()` first", true)]
#[case("plain sentence with no markup", false)]
#[case("price is 3 * 4 = 12", false)]
fn test_markdown_detection(#[case] text: &str, #[case] expected: bool) {
    assert_eq!(is_markdown(text), expected, "{text:?}");
}

#[test]
fn test_markdown_features_are_named() {
    let features = markdown_features("## Plan\n\n1. search\n2. **write**");
    assert_eq!(features, vec!["headers", "bold", "lists"]);
}
