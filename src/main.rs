use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use colored::*;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use research_stream::cli::{
    outcome_exit_code, render_outcome, render_parsed, render_update, research_config, Args, Command,
};
use research_stream::document::{extract_modified_content, Document};
use research_stream::presentation::{PresentationParser, PresentationState};
use research_stream::research::CancelHandle;
use research_stream::store::open_store;
use research_stream::{
    ClientConfig, HttpResearchApi, QueueStatusService, ResearchApi, ResearchStream, ResearchUpdate,
    Result,
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    if let Command::Completions { shell } = &args.command {
        clap_complete::generate(
            *shell,
            &mut Args::command(),
            "research-stream",
            &mut std::io::stdout(),
        );
        return Ok(0);
    }

    let mut config = ClientConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);

    match args.command {
        Command::Research {
            query,
            initial_queries,
            max_loops,
            json,
        } => {
            let (tx, rx) = mpsc::unbounded_channel();
            let printer = spawn_printer(rx, json);
            let mut research = build_stream(&config, args.chat, tx)?;
            spawn_cancel_on_ctrl_c(research.cancel_handle());

            let outcome = research
                .start_research(&query, research_config(initial_queries, max_loops))
                .await?;
            drop(research);
            let _ = printer.await;
            println!("{}", render_outcome(&outcome));
            Ok(outcome_exit_code(&outcome))
        }
        Command::Recover { json } => {
            let (tx, rx) = mpsc::unbounded_channel();
            let printer = spawn_printer(rx, json);
            let mut research = build_stream(&config, args.chat, tx)?;
            spawn_cancel_on_ctrl_c(research.cancel_handle());

            if !research.connection().is_connection_interrupted() {
                info!("breadcrumb is fresh or absent; checking anyway");
            }
            let outcome = research.check_and_recover_connection().await;
            drop(research);
            let _ = printer.await;
            println!("{}", render_outcome(&outcome));
            Ok(outcome_exit_code(&outcome))
        }
        Command::Status { job_id } => {
            let api = HttpResearchApi::new(config)?;
            let status = api.job_status(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(0)
        }
        Command::Queue => {
            let store = open_store(config.store_path.as_deref())?;
            let queue = QueueStatusService::new(Arc::new(HttpResearchApi::new(config)?), store);
            let stats = queue.get_queue_stats().await;
            println!(
                "{} waiting: {}  active: {}",
                "research queue".bold(),
                stats.research.waiting.to_string().yellow(),
                stats.research.active.to_string().green()
            );
            Ok(0)
        }
        Command::Normalize { file, json } => {
            let text = tokio::fs::read_to_string(&file).await?;
            normalize(&text, json)?;
            Ok(0)
        }
        Command::Extract { file, output } => {
            let html = tokio::fs::read_to_string(&file).await?;
            let clean = extract_modified_content(&Document::parse(&html));
            match output {
                Some(path) => {
                    tokio::fs::write(&path, clean).await?;
                    info!(path = %path.display(), "wrote clean document");
                }
                None => println!("{clean}"),
            }
            Ok(0)
        }
        Command::Completions { .. } => Ok(0),
    }
}

fn build_stream(
    config: &ClientConfig,
    chat: Option<String>,
    tx: mpsc::UnboundedSender<ResearchUpdate>,
) -> Result<ResearchStream<HttpResearchApi>> {
    let store = open_store(config.store_path.as_deref())?;
    let api = Arc::new(HttpResearchApi::new(config.clone())?);
    let mut research = ResearchStream::new(api, store)
        .with_polling(config.polling.clone())
        .with_stale_after(config.stale_after_ms)
        .with_updates(tx);
    if let Some(chat) = chat {
        research = research.with_chat(chat);
    }
    Ok(research)
}

fn spawn_printer(rx: mpsc::UnboundedReceiver<ResearchUpdate>, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut updates = UnboundedReceiverStream::new(rx);
        while let Some(update) = updates.next().await {
            if json {
                match serde_json::to_string(&update) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!(error = %e, "could not serialize update"),
                }
            } else {
                println!("{}", render_update(&update));
            }
        }
    })
}

fn spawn_cancel_on_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling research");
            handle.cancel();
        }
    });
}

/// Feed newline-delimited agent events through the parser and print the
/// normalized records.
fn normalize(text: &str, json: bool) -> Result<()> {
    let parser = PresentationParser::new();
    let mut state = PresentationState::default();
    let mut dropped = 0usize;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "skipping invalid json");
                dropped += 1;
                continue;
            }
        };
        match parser.parse_agent_output(&message, &state) {
            Ok(output) => {
                if json {
                    println!("{}", serde_json::to_string(&output)?);
                } else {
                    println!("{}", render_parsed(&output));
                }
                state.apply(output);
            }
            Err(_) => dropped += 1,
        }
    }

    eprintln!(
        "{} {} logs, {} slides, {} dropped",
        "normalized:".bold(),
        state.logs().len(),
        state.slide_count(),
        dropped
    );
    Ok(())
}
