//! Application-side store of normalized records.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::parser::{Action, ParsedOutput};
use super::records::{is_log_duplicate, is_slide_duplicate, LogEntry, SlideEntry};

/// Logs and slides for one viewed chat.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PresentationState {
    logs: Vec<LogEntry>,
    slides: BTreeMap<u32, SlideEntry>,
}

impl PresentationState {
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Slides in slide-number order.
    pub fn slides(&self) -> impl Iterator<Item = &SlideEntry> {
        self.slides.values()
    }

    pub fn slide(&self, number: u32) -> Option<&SlideEntry> {
        self.slides.get(&number)
    }

    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    /// The live record for a worker author.
    pub fn worker_log(&self, author: &str) -> Option<&LogEntry> {
        self.logs.iter().rev().find(|l| l.author == author)
    }

    /// Merge a parsed output. Returns false when it was a duplicate or an
    /// update for a record that no longer exists.
    pub fn apply(&mut self, output: ParsedOutput) -> bool {
        match output {
            ParsedOutput::Log { action, entry }
            | ParsedOutput::LogWithMetadata { action, entry, .. }
            | ParsedOutput::BrowserWorker { action, entry } => self.apply_log(action, entry),
            ParsedOutput::Slide { action, slide } => self.apply_slide(action, slide),
        }
    }

    fn apply_log(&mut self, action: Action, entry: LogEntry) -> bool {
        match action {
            Action::Update => match self.logs.iter_mut().find(|l| l.id == entry.id) {
                Some(slot) => {
                    *slot = entry;
                    true
                }
                None => false,
            },
            Action::Create | Action::Insert => {
                if is_log_duplicate(&entry, &self.logs) {
                    debug!(id = %entry.id, author = %entry.author, "skipping duplicate log");
                    return false;
                }
                self.logs.push(entry);
                true
            }
        }
    }

    fn apply_slide(&mut self, action: Action, slide: SlideEntry) -> bool {
        let n = slide.slide_number;
        match action {
            Action::Create => {
                if is_slide_duplicate(&slide, self.slides.values()) {
                    return false;
                }
                self.slides.insert(n, slide);
                true
            }
            Action::Update => {
                if !self.slides.contains_key(&n) {
                    return false;
                }
                self.slides.insert(n, slide);
                true
            }
            Action::Insert => {
                self.shift_from(n);
                self.slides.insert(n, slide);
                true
            }
        }
    }

    /// Move every slide numbered `from` or higher up by one.
    fn shift_from(&mut self, from: u32) {
        let moved = self.slides.split_off(&from);
        for (number, mut slide) in moved {
            let Some(next) = number.checked_add(1) else {
                warn!(slide = number, "no room to shift slide, dropping it");
                continue;
            };
            slide.slide_number = next;
            self.slides.insert(next, slide);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::records::Phase;

    fn complete(n: u32, tag: &str) -> SlideEntry {
        SlideEntry::new(n, Some(format!("why {tag}")), Some(format!("<p>{tag}</p>")), 0)
    }

    #[test]
    fn insertion_shifts_later_slides() {
        let mut st = PresentationState::default();
        for (n, tag) in [(1, "a"), (2, "b"), (3, "c")] {
            assert!(st.apply(ParsedOutput::Slide { action: Action::Create, slide: complete(n, tag) }));
        }
        st.apply(ParsedOutput::Slide { action: Action::Insert, slide: complete(2, "new") });

        let order: Vec<(u32, String)> = st
            .slides()
            .map(|s| (s.slide_number, s.html_content.clone().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, "<p>a</p>".to_string()),
                (2, "<p>new</p>".to_string()),
                (3, "<p>b</p>".to_string()),
                (4, "<p>c</p>".to_string()),
            ]
        );
    }

    #[test]
    fn insertion_at_the_top_number_does_not_overflow() {
        let mut st = PresentationState::default();
        st.apply(ParsedOutput::Slide { action: Action::Create, slide: complete(u32::MAX, "last") });
        assert!(st.apply(ParsedOutput::Slide { action: Action::Insert, slide: complete(u32::MAX, "new") }));
        assert_eq!(st.slide_count(), 1);
        assert_eq!(st.slide(u32::MAX).unwrap().html_content.as_deref(), Some("<p>new</p>"));
    }

    #[test]
    fn duplicate_create_is_ignored() {
        let mut st = PresentationState::default();
        let entry = LogEntry::new("id-1".into(), "planner_agent", 10, Phase::Planning);
        assert!(st.apply(ParsedOutput::Log { action: Action::Create, entry: entry.clone() }));
        assert!(!st.apply(ParsedOutput::Log { action: Action::Create, entry }));
        assert_eq!(st.logs().len(), 1);

        assert!(st.apply(ParsedOutput::Slide { action: Action::Create, slide: complete(1, "x") }));
        assert!(!st.apply(ParsedOutput::Slide { action: Action::Create, slide: complete(1, "y") }));
        assert_eq!(st.slide(1).unwrap().html_content.as_deref(), Some("<p>x</p>"));
    }

    #[test]
    fn update_of_missing_record_is_rejected() {
        let mut st = PresentationState::default();
        let entry = LogEntry::new("ghost".into(), "browser_worker_1", 1, Phase::Research);
        assert!(!st.apply(ParsedOutput::BrowserWorker { action: Action::Update, entry }));
        assert!(!st.apply(ParsedOutput::Slide { action: Action::Update, slide: complete(4, "z") }));
        assert!(st.logs().is_empty());
        assert_eq!(st.slide_count(), 0);
    }
}
