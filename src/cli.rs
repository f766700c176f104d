use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use colored::*;

use crate::config::ClientConfig;
use crate::presentation::ParsedOutput;
use crate::queue_status::ResearchConfig;
use crate::research::{ConnectionStatus, ResearchUpdate, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "research-stream")]
#[command(version)]
#[command(about = "Run, follow and recover deep-research jobs against a research backend")]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides config and RESEARCH_API_URL)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Chat the research belongs to
    #[arg(long, global = true)]
    pub chat: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a research job and follow it to completion
    Research {
        /// Research question
        query: String,

        /// Number of initial search queries
        #[arg(long, default_value_t = 3)]
        initial_queries: u32,

        /// Maximum reflection loops
        #[arg(long, default_value_t = 2)]
        max_loops: u32,

        /// Print updates as JSON lines instead of coloured text
        #[arg(long)]
        json: bool,
    },

    /// Resume the job recorded in the breadcrumb store
    Recover {
        #[arg(long)]
        json: bool,
    },

    /// Print the status of one job
    Status { job_id: String },

    /// Print queue statistics
    Queue,

    /// Normalize a file of newline-delimited agent events
    Normalize {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Strip editor classes, styles and scripts from an edited slide document
    Extract {
        file: PathBuf,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print shell completions
    Completions { shell: Shell },
}

impl Args {
    /// Apply command-line overrides on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.url {
            config.base_url = url.clone();
        }
    }
}

/// Backend config for a `research` invocation.
pub fn research_config(initial_queries: u32, max_loops: u32) -> ResearchConfig {
    ResearchConfig {
        number_of_initial_queries: initial_queries,
        max_research_loops: max_loops,
        ..ResearchConfig::default()
    }
}

fn status_label(status: ConnectionStatus) -> ColoredString {
    let s = status.to_string();
    match status {
        ConnectionStatus::Connected => s.green(),
        ConnectionStatus::Polling | ConnectionStatus::Reconnecting | ConnectionStatus::Connecting => {
            s.yellow()
        }
        ConnectionStatus::Failed | ConnectionStatus::Timeout | ConnectionStatus::Disconnected => {
            s.red()
        }
        ConnectionStatus::Idle => s.dimmed(),
    }
}

/// One terminal line for an update.
pub fn render_update(update: &ResearchUpdate) -> String {
    match update {
        ResearchUpdate::Status { status } => format!("{} {}", "status".bold(), status_label(*status)),
        ResearchUpdate::JobAssigned { job_id } => format!("{} {}", "job".bold(), job_id.cyan()),
        ResearchUpdate::Step { event } => format!("{} {}", "step".bold(), event.step),
        ResearchUpdate::Presentation { output } => render_parsed(output),
        ResearchUpdate::Completed { result } => {
            format!("{}\n{}", "completed".green().bold(), result.answer)
        }
        ResearchUpdate::Failed { error } => format!("{} {}", "failed".red().bold(), error),
    }
}

pub fn render_parsed(output: &ParsedOutput) -> String {
    match output {
        ParsedOutput::Log { action, entry }
        | ParsedOutput::LogWithMetadata { action, entry, .. }
        | ParsedOutput::BrowserWorker { action, entry } => format!(
            "{} [{:?}] {} ({}): {}",
            "log".blue(),
            action,
            entry.author,
            entry.phase,
            entry.text.as_deref().unwrap_or("")
        ),
        ParsedOutput::Slide { action, slide } => format!(
            "{} [{:?}] #{}{}",
            "slide".magenta(),
            action,
            slide.slide_number,
            if slide.is_complete { " complete" } else { "" }
        ),
    }
}

pub fn render_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed(_) => "research completed".green().to_string(),
        RunOutcome::AlreadyHandled => "result already recorded".dimmed().to_string(),
        RunOutcome::Failed(msg) => format!("{} {}", "research failed:".red(), msg),
        RunOutcome::TimedOut => "research timed out, please try again".red().to_string(),
        RunOutcome::Cancelled => "research cancelled".yellow().to_string(),
        RunOutcome::NothingToRecover => "no interrupted research to recover".dimmed().to_string(),
        RunOutcome::Unreachable => "research job unreachable, breadcrumb kept".yellow().to_string(),
    }
}

/// Process exit code for an outcome.
pub fn outcome_exit_code(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Completed(_) | RunOutcome::AlreadyHandled | RunOutcome::NothingToRecover => 0,
        RunOutcome::Cancelled => 130,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_research() {
        let args = Args::parse_from(["rs", "research", "state of wasi", "--chat", "c1"]);
        assert_eq!(args.chat.as_deref(), Some("c1"));
        match args.command {
            Command::Research {
                query,
                initial_queries,
                max_loops,
                json,
            } => {
                assert_eq!(query, "state of wasi");
                assert_eq!(initial_queries, 3);
                assert_eq!(max_loops, 2);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_args_global_flags_after_subcommand() {
        let args = Args::parse_from(["rs", "queue", "--url", "http://backend:9000", "-c", "cfg.toml"]);
        assert!(matches!(args.command, Command::Queue));
        assert_eq!(args.config, Some(PathBuf::from("cfg.toml")));

        let mut cfg = ClientConfig::default();
        args.apply_overrides(&mut cfg);
        assert_eq!(cfg.base_url, "http://backend:9000");
    }

    #[test]
    fn test_args_parse_extract_and_completions() {
        let args = Args::parse_from(["rs", "extract", "slide.html", "-o", "clean.html"]);
        match args.command {
            Command::Extract { file, output } => {
                assert_eq!(file, PathBuf::from("slide.html"));
                assert_eq!(output, Some(PathBuf::from("clean.html")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
        let args = Args::parse_from(["rs", "completions", "bash"]);
        assert!(matches!(args.command, Command::Completions { shell: Shell::Bash }));
    }

    #[test]
    fn test_args_missing_subcommand_is_error() {
        assert!(Args::try_parse_from(["rs"]).is_err());
    }

    #[test]
    fn test_research_config_overrides_counts_only() {
        let cfg = research_config(5, 1);
        assert_eq!(cfg.number_of_initial_queries, 5);
        assert_eq!(cfg.max_research_loops, 1);
        assert_eq!(cfg.answer_model, ResearchConfig::default().answer_model);
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(outcome_exit_code(&RunOutcome::NothingToRecover), 0);
        assert_eq!(outcome_exit_code(&RunOutcome::Cancelled), 130);
        assert_eq!(outcome_exit_code(&RunOutcome::TimedOut), 1);
        assert_eq!(outcome_exit_code(&RunOutcome::Failed("x".into())), 1);
    }

    #[test]
    fn test_render_update_plain() {
        colored::control::set_override(false);
        let line = render_update(&ResearchUpdate::JobAssigned { job_id: "research_1".into() });
        assert_eq!(line, "job research_1");
        let line = render_update(&ResearchUpdate::Status {
            status: ConnectionStatus::Polling,
        });
        assert_eq!(line, "status polling");
    }
}
