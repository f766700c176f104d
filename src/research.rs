//! Orchestration of one long-running research job.
//!
//! A run starts on a streamed response of newline-delimited JSON step
//! events. When the stream drops or ends early the run falls back to
//! polling the job status with a tiered interval, and a later session can
//! pick the job up again from the stored breadcrumb.
//!
//! All progress lands in [`ResearchState`] and is published as
//! [`ResearchUpdate`]s on an optional channel. The orchestrator never
//! returns transport or server failures as `Err`; they become a
//! [`RunOutcome`] plus the `error`/`status` fields of the state.
//!
//! ```rust,ignore
//! let api = Arc::new(HttpResearchApi::new(config.clone())?);
//! let mut research = ResearchStream::new(api, store)
//!     .with_chat("chat-42")
//!     .with_updates(tx);
//! let outcome = research.start_research("state of WASI", ResearchConfig::default()).await?;
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PollingConfig;
use crate::connection::ConnectionState;
use crate::error::{ResearchError, Result};
use crate::events::{parse_event_line, CompletedResult, LineDecoder, StreamEvent};
use crate::presentation::{ParsedOutput, PresentationParser, PresentationState};
use crate::queue_status::{JobStatus, QueueStatusService, ResearchApi, ResearchConfig, ResearchRequest};
use crate::store::{ACTIVE_CHAT_KEY, CURRENT_JOB_KEY};

/// Lifecycle of the current run. The single source of truth for "is
/// something already in progress".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Polling,
    Completing,
    Completed,
    Failed,
    TimedOut,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed | RunPhase::TimedOut)
    }
}

/// User-facing connection indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Polling,
    Reconnecting,
    Failed,
    Timeout,
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Polling => "polling",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Failed => "failed",
            ConnectionStatus::Timeout => "timeout",
            ConnectionStatus::Disconnected => "disconnected",
        };
        write!(f, "{s}")
    }
}

/// Published on every observable state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResearchUpdate {
    Status { status: ConnectionStatus },
    JobAssigned { job_id: String },
    Step { event: StreamEvent },
    Presentation { output: ParsedOutput },
    Completed { result: CompletedResult },
    Failed { error: String },
}

/// Shared view of the research run for the UI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResearchState {
    pub job_id: Option<String>,
    pub phase: RunPhase,
    pub status: ConnectionStatus,
    pub events: Vec<StreamEvent>,
    pub results: Vec<CompletedResult>,
    pub error: Option<String>,
    pub presentation: PresentationState,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(CompletedResult),
    /// A completion for this job was already processed.
    AlreadyHandled,
    Failed(String),
    TimedOut,
    Cancelled,
    /// No breadcrumbed job to recover.
    NothingToRecover,
    /// The breadcrumbed job could not be looked up; the breadcrumb is kept.
    Unreachable,
}

/// Cancels the run from another task. Client-side only: the backend job
/// keeps running.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<u64>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }
}

enum StreamRead {
    Cancelled,
    Chunk(Option<Result<Vec<u8>>>),
}

/// Drives a research job for one chat.
pub struct ResearchStream<A> {
    api: Arc<A>,
    queue: QueueStatusService<A>,
    connection: ConnectionState,
    polling: PollingConfig,
    parser: PresentationParser,
    parse_presentation: bool,
    updates: Option<mpsc::UnboundedSender<ResearchUpdate>>,
    cancel_tx: Arc<watch::Sender<u64>>,
    cancel_rx: watch::Receiver<u64>,
    state: ResearchState,
    /// Events already dispatched for the current job, used as the polling
    /// offset into the cumulative `events` array.
    dispatched_for_job: usize,
    /// Ids of results the chat already holds on the backend.
    stored_result_ids: HashSet<String>,
}

impl<A: ResearchApi> ResearchStream<A> {
    pub fn new(api: Arc<A>, store: crate::store::SharedStore) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(0u64);
        Self {
            queue: QueueStatusService::new(Arc::clone(&api), Arc::clone(&store)),
            api,
            connection: ConnectionState::new(store),
            polling: PollingConfig::default(),
            parser: PresentationParser::new(),
            parse_presentation: true,
            updates: None,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
            state: ResearchState::default(),
            dispatched_for_job: 0,
            stored_result_ids: HashSet::new(),
        }
    }

    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.connection.set_chat_id(Some(chat_id.into()));
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_stale_after(mut self, ms: u64) -> Self {
        self.connection = self.connection.with_stale_after(ms);
        self
    }

    pub fn with_updates(mut self, tx: mpsc::UnboundedSender<ResearchUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    /// Route step payloads through the presentation parser (default on).
    pub fn parse_presentation(mut self, enabled: bool) -> Self {
        self.parse_presentation = enabled;
        self
    }

    pub fn state(&self) -> &ResearchState {
        &self.state
    }

    pub fn queue(&self) -> &QueueStatusService<A> {
        &self.queue
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionState {
        &mut self.connection
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Start a new research job, or recover the one already in flight.
    ///
    /// # Errors
    /// Only [`ResearchError::NoActiveChat`]; every other failure is reported
    /// through the returned [`RunOutcome`] and the state.
    pub async fn start_research(&mut self, query: &str, config: ResearchConfig) -> Result<RunOutcome> {
        let Some(chat_id) = self.connection.chat_id().map(str::to_string) else {
            error!("cannot start research without an active chat");
            self.state.error = Some(ResearchError::NoActiveChat.to_string());
            return Err(ResearchError::NoActiveChat);
        };

        if self.queue.has_active_research().await {
            info!(chat_id = %chat_id, "research already in flight, recovering instead of starting");
            return Ok(self.check_and_recover_connection().await);
        }

        let job_id = format!("research_{}", Uuid::new_v4());
        self.begin_job(&job_id);
        self.persist_breadcrumbs(&job_id, "starting", Some(&chat_id));
        self.set_phase(RunPhase::Connecting, ConnectionStatus::Connecting);
        info!(job_id = %job_id, chat_id = %chat_id, "starting research");

        let request = ResearchRequest {
            chat: chat_id,
            query: query.to_string(),
            config,
        };

        let mut cancel = self.cancel_rx.clone();
        cancel.borrow_and_update();

        let opened = tokio::select! {
            biased;
            _ = cancel.changed() => None,
            res = self.api.open_research_stream(&request) => Some(res),
        };
        let stream = match opened {
            None => return Ok(self.cancel_research()),
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                // The job may exist server-side; keep the breadcrumb so a
                // reconnect can still find it.
                warn!(job_id = %job_id, error = %e, "research request failed");
                return Ok(self.fail(e, false));
            }
        };

        self.set_phase(RunPhase::Streaming, ConnectionStatus::Connected);
        self.consume_stream(stream, cancel).await
    }

    /// Resume the breadcrumbed job, if any.
    pub async fn check_and_recover_connection(&mut self) -> RunOutcome {
        let store = Arc::clone(self.connection.store());
        let job_id = match store.get(CURRENT_JOB_KEY) {
            Ok(Some(id)) if !id.is_empty() => Some(id),
            _ => self.connection.get_stored_metadata().map(|m| m.job_id),
        };
        let Some(job_id) = job_id.filter(|id| !id.is_empty()) else {
            debug!("no research breadcrumb, nothing to recover");
            return RunOutcome::NothingToRecover;
        };
        if self.connection.chat_id().is_none() {
            if let Ok(Some(chat)) = store.get(ACTIVE_CHAT_KEY) {
                self.connection.set_chat_id(Some(chat));
            }
        }

        if self.state.job_id.as_deref() != Some(job_id.as_str()) {
            self.begin_job(&job_id);
        }
        self.set_status(ConnectionStatus::Reconnecting);
        info!(job_id = %job_id, "recovering research job");

        let mut cancel = self.cancel_rx.clone();
        cancel.borrow_and_update();
        let loaded = tokio::select! {
            biased;
            _ = cancel.changed() => false,
            _ = self.load_stored_results() => true,
        };
        if !loaded {
            return self.cancel_research();
        }
        let fetched = tokio::select! {
            biased;
            _ = cancel.changed() => None,
            s = self.queue.get_job_status(&job_id) => Some(s),
        };
        match fetched {
            None => self.cancel_research(),
            Some(None) => {
                warn!(job_id = %job_id, "could not reach research job, keeping breadcrumb");
                self.set_status(ConnectionStatus::Disconnected);
                RunOutcome::Unreachable
            }
            Some(Some(status)) if status.is_completed() => self.handle_completed_job(&status),
            Some(Some(status)) if status.is_failed() => self.fail(server_failure(&status), true),
            Some(Some(_)) => self.poll_until_done(&job_id, cancel).await,
        }
    }

    /// Poll the job status until it reaches a terminal state.
    ///
    /// Intervals widen from 5 s to 8 s after 20 polls and to 15 s after 100
    /// polls; the run times out after 600 polls. Newly observed events are
    /// replayed in order, spaced by the configured stagger, before the next
    /// poll and before any terminal transition.
    pub async fn start_polling_mode(&mut self, job_id: &str) -> RunOutcome {
        if self.state.phase == RunPhase::Polling {
            info!(job_id, "polling already active, restarting");
        }
        if self.state.job_id.as_deref() != Some(job_id) {
            self.begin_job(job_id);
        }

        let mut cancel = self.cancel_rx.clone();
        cancel.borrow_and_update();
        let loaded = tokio::select! {
            biased;
            _ = cancel.changed() => false,
            _ = self.load_stored_results() => true,
        };
        if !loaded {
            return self.cancel_research();
        }
        self.poll_until_done(job_id, cancel).await
    }

    async fn poll_until_done(&mut self, job_id: &str, mut cancel: watch::Receiver<u64>) -> RunOutcome {
        self.set_phase(RunPhase::Polling, ConnectionStatus::Polling);

        let mut seen = self.dispatched_for_job;
        let mut consecutive_errors: u32 = 0;
        let mut pending: VecDeque<StreamEvent> = VecDeque::new();
        let max_polls = self.polling.max_polls;

        for tick in 1..=max_polls {
            let fetched = tokio::select! {
                biased;
                _ = cancel.changed() => None,
                s = self.queue.get_job_status(job_id) => Some(s),
            };
            let Some(fetched) = fetched else {
                return self.cancel_research();
            };

            match fetched {
                None => {
                    consecutive_errors += 1;
                    warn!(job_id, tick, consecutive_errors, "status poll failed");
                    if consecutive_errors >= self.polling.max_consecutive_errors {
                        let err = ResearchError::ConnectionLost {
                            failures: consecutive_errors,
                        };
                        error!(job_id, error = %err, "giving up on polling");
                        return self.fail(err, false);
                    }
                }
                Some(status) => {
                    consecutive_errors = 0;
                    let total = status.progress.events.len();
                    if total < seen {
                        debug!(job_id, total, seen, "event log shrank, resetting offset");
                        seen = total;
                    }
                    pending.extend(
                        status.progress.events[seen..]
                            .iter()
                            .cloned()
                            .filter_map(StreamEvent::from_value),
                    );
                    seen = total;

                    if !self.drain_pending(&mut pending, &mut cancel).await {
                        return self.cancel_research();
                    }

                    if status.is_completed() {
                        info!(job_id, tick, "job completed while polling");
                        return self.handle_completed_job(&status);
                    }
                    if status.is_failed() {
                        return self.fail(server_failure(&status), true);
                    }
                    debug!(job_id, tick, status = %status.status, events = total, "job still running");
                }
            }

            if tick == max_polls {
                break;
            }
            let wait = self.polling.interval_for_tick(tick);
            let cancelled = tokio::select! {
                biased;
                _ = cancel.changed() => true,
                _ = tokio::time::sleep(wait) => false,
            };
            if cancelled {
                return self.cancel_research();
            }
        }

        let err = ResearchError::Timeout { polls: max_polls };
        warn!(job_id, error = %err, "polling timed out");
        self.state.error = Some(err.to_string());
        self.set_phase(RunPhase::TimedOut, ConnectionStatus::Timeout);
        self.emit(ResearchUpdate::Failed {
            error: err.to_string(),
        });
        self.clear_breadcrumbs();
        RunOutcome::TimedOut
    }

    /// Record the final result of a completed job exactly once.
    pub fn handle_completed_job(&mut self, job: &JobStatus) -> RunOutcome {
        let id = job.id.clone().or_else(|| self.state.job_id.clone());
        let result = match &job.result {
            Some(v) => CompletedResult::from_value(v, id),
            None => CompletedResult {
                id,
                ..CompletedResult::default()
            },
        };
        self.finalize(result)
    }

    /// Stop observing the job and forget it. The backend job is untouched.
    pub fn cancel_research(&mut self) -> RunOutcome {
        info!(job_id = ?self.state.job_id, "research cancelled");
        self.clear_breadcrumbs();
        self.state.phase = RunPhase::Idle;
        self.state.error = None;
        self.set_status(ConnectionStatus::Idle);
        RunOutcome::Cancelled
    }

    // -----------------------------------------------------------------------
    // Stream handling
    // -----------------------------------------------------------------------

    async fn consume_stream(
        &mut self,
        mut stream: crate::queue_status::ByteStream,
        mut cancel: watch::Receiver<u64>,
    ) -> Result<RunOutcome> {
        let mut decoder = LineDecoder::new();
        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.changed() => StreamRead::Cancelled,
                chunk = stream.next() => StreamRead::Chunk(chunk),
            };
            match read {
                StreamRead::Cancelled => return Ok(self.cancel_research()),
                StreamRead::Chunk(None) => break,
                StreamRead::Chunk(Some(Err(e))) => {
                    warn!(job_id = ?self.state.job_id, error = %e, "research stream interrupted");
                    return Ok(self.fall_back_to_polling().await);
                }
                StreamRead::Chunk(Some(Ok(bytes))) => {
                    for line in decoder.push(&bytes) {
                        if let Some(outcome) = self.handle_line(&line) {
                            return Ok(outcome);
                        }
                    }
                }
            }
        }
        if let Some(line) = decoder.finish() {
            if let Some(outcome) = self.handle_line(&line) {
                return Ok(outcome);
            }
        }
        debug!(job_id = ?self.state.job_id, "stream ended without a terminal step");
        Ok(self.fall_back_to_polling().await)
    }

    async fn fall_back_to_polling(&mut self) -> RunOutcome {
        let Some(job_id) = self.state.job_id.clone() else {
            let err = ResearchError::ServerReported("stream ended before a job was assigned".into());
            return self.fail(err, true);
        };
        self.set_status(ConnectionStatus::Reconnecting);
        self.start_polling_mode(&job_id).await
    }

    /// Returns the outcome when the line ends the run.
    fn handle_line(&mut self, line: &str) -> Option<RunOutcome> {
        let event = match parse_event_line(line) {
            Ok(Some(ev)) => ev,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, line_len = line.len(), "skipping malformed stream line");
                return None;
            }
        };

        if event.is_error() {
            let msg = event.error_message();
            error!(job_id = ?self.state.job_id, error = %msg, "research reported an error");
            return Some(self.fail(ResearchError::ServerReported(msg), true));
        }

        let completed = event.is_completed();
        let data = event.data.clone();
        self.dispatch_event(event);
        if self.state.phase == RunPhase::Streaming {
            self.dispatched_for_job += 1;
        }

        if completed {
            let result = CompletedResult::from_value(&data, self.state.job_id.clone());
            return Some(self.finalize(result));
        }
        None
    }

    // -----------------------------------------------------------------------
    // Shared state transitions
    // -----------------------------------------------------------------------

    async fn drain_pending(
        &mut self,
        pending: &mut VecDeque<StreamEvent>,
        cancel: &mut watch::Receiver<u64>,
    ) -> bool {
        let stagger = self.polling.event_stagger();
        let mut first = true;
        while let Some(event) = pending.pop_front() {
            if !first && !stagger.is_zero() {
                let cancelled = tokio::select! {
                    biased;
                    _ = cancel.changed() => true,
                    _ = tokio::time::sleep(stagger) => false,
                };
                if cancelled {
                    return false;
                }
            }
            first = false;
            self.dispatch_event(event);
            self.dispatched_for_job += 1;
        }
        true
    }

    fn dispatch_event(&mut self, event: StreamEvent) {
        if let Some(server_id) = event.job_id().map(str::to_string) {
            self.adopt_server_job_id(server_id);
        }
        if let Some(job_id) = self.state.job_id.clone() {
            if let Err(e) = self.connection.store_connection_metadata(&job_id, &event.step) {
                warn!(error = %e, "failed to update connection metadata");
            }
        }

        if self.parse_presentation && looks_like_agent_output(&event.data) {
            match self.parser.parse_agent_output(&event.data, &self.state.presentation) {
                Ok(output) => {
                    if self.state.presentation.apply(output.clone()) {
                        self.emit(ResearchUpdate::Presentation { output });
                    }
                }
                Err(e) => debug!(step = %event.step, error = %e, "step is not presentation output"),
            }
        }

        debug!(step = %event.step, "research step");
        self.state.events.push(event.clone());
        self.emit(ResearchUpdate::Step { event });
    }

    fn adopt_server_job_id(&mut self, server_id: String) {
        if self.state.job_id.as_deref() == Some(server_id.as_str()) {
            return;
        }
        info!(client_id = ?self.state.job_id, server_id = %server_id, "server assigned job id");
        if let Err(e) = self.connection.store().set(CURRENT_JOB_KEY, &server_id) {
            warn!(error = %e, "failed to persist server job id");
        }
        self.state.job_id = Some(server_id.clone());
        self.emit(ResearchUpdate::JobAssigned { job_id: server_id });
    }

    fn finalize(&mut self, result: CompletedResult) -> RunOutcome {
        if self.state.phase == RunPhase::Completing {
            debug!("completion already in progress");
            return RunOutcome::AlreadyHandled;
        }
        let id = result.id.clone();
        let duplicate = id.as_deref().is_some_and(|id| {
            self.stored_result_ids.contains(id) || self.state.results.iter().any(|r| r.id.as_deref() == Some(id))
        });
        if duplicate {
            debug!(job_id = ?id, "completion already recorded");
            self.clear_breadcrumbs();
            self.set_phase(RunPhase::Completed, ConnectionStatus::Idle);
            return RunOutcome::AlreadyHandled;
        }

        self.state.phase = RunPhase::Completing;
        self.state.results.push(result.clone());
        self.state.error = None;
        self.emit(ResearchUpdate::Completed {
            result: result.clone(),
        });
        self.clear_breadcrumbs();
        self.set_phase(RunPhase::Completed, ConnectionStatus::Idle);
        info!(job_id = ?id, sources = result.sources.len(), "research completed");
        RunOutcome::Completed(result)
    }

    /// Remember which results the active chat already holds, so a job that
    /// finished while nobody was watching is not appended twice. A failed
    /// lookup leaves the set as it was.
    async fn load_stored_results(&mut self) {
        let Some(chat_id) = self.connection.chat_id().map(str::to_string) else {
            return;
        };
        let records = self.queue.get_chat_researches(&chat_id).await;
        let before = self.stored_result_ids.len();
        self.stored_result_ids.extend(
            records
                .into_iter()
                .filter(|r| r.is_complete())
                .filter_map(|r| r.id),
        );
        debug!(
            chat_id = %chat_id,
            added = self.stored_result_ids.len() - before,
            "loaded stored research results"
        );
    }

    fn fail(&mut self, err: ResearchError, clear_breadcrumb: bool) -> RunOutcome {
        let message = err.to_string();
        self.state.error = Some(message.clone());
        self.set_phase(RunPhase::Failed, ConnectionStatus::Failed);
        self.emit(ResearchUpdate::Failed {
            error: message.clone(),
        });
        if clear_breadcrumb {
            self.clear_breadcrumbs();
        }
        RunOutcome::Failed(message)
    }

    fn begin_job(&mut self, job_id: &str) {
        self.state.job_id = Some(job_id.to_string());
        self.state.events.clear();
        self.state.error = None;
        self.state.phase = RunPhase::Idle;
        self.dispatched_for_job = 0;
    }

    fn persist_breadcrumbs(&self, job_id: &str, step: &str, chat_id: Option<&str>) {
        let store = self.connection.store();
        let mut result = store.set(CURRENT_JOB_KEY, job_id);
        if let Some(chat) = chat_id {
            result = result.and_then(|_| store.set(ACTIVE_CHAT_KEY, chat));
        }
        result = result.and_then(|_| self.connection.store_connection_metadata(job_id, step));
        if let Err(e) = result {
            warn!(job_id, error = %e, "failed to persist research breadcrumbs");
        }
    }

    fn clear_breadcrumbs(&self) {
        if let Err(e) = self.connection.clear_connection_metadata() {
            warn!(error = %e, "failed to clear research breadcrumbs");
        }
    }

    fn set_phase(&mut self, phase: RunPhase, status: ConnectionStatus) {
        self.state.phase = phase;
        self.set_status(status);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.state.status != status {
            self.state.status = status;
            self.emit(ResearchUpdate::Status { status });
        }
    }

    fn emit(&self, update: ResearchUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }
}

fn server_failure(status: &JobStatus) -> ResearchError {
    ResearchError::ServerReported(status.error.clone().unwrap_or_else(|| "research failed".into()))
}

/// Step payloads produced by the presentation agent carry a discriminant.
fn looks_like_agent_output(data: &Value) -> bool {
    data.get("type").is_some() || data.get("author").is_some() || data.get("agent_name").is_some()
}
