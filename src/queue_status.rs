//! Backend contract, HTTP client and the best-effort job status oracle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ResearchError, Result};
use crate::store::{SharedStore, CURRENT_JOB_KEY};

// --- Backend wire types ---

/// Aggregate waiting/active counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    #[serde(default)]
    pub waiting: u64,
    #[serde(default)]
    pub active: u64,
}

/// `GET queue stats` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(default)]
    pub research: QueueCounts,
}

/// Cumulative progress attached to a job status document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(default)]
    pub events: Vec<Value>,
}

/// `GET job status` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Server-assigned job id, when the backend echoes it.
    #[serde(default, alias = "jobId", alias = "job_id")]
    pub id: Option<String>,
    /// `waiting | active | completed | failed`
    pub status: String,
    #[serde(default)]
    pub progress: JobProgress,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default, alias = "failedReason")]
    pub error: Option<String>,
}

impl JobStatus {
    pub fn is_completed(&self) -> bool {
        is_job_completed(&self.status)
    }

    pub fn is_active(&self) -> bool {
        is_job_active(&self.status)
    }

    pub fn is_failed(&self) -> bool {
        is_job_failed(&self.status)
    }
}

/// Model/loop knobs forwarded to the research backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub query_generator_model: String,
    pub reflection_model: String,
    pub answer_model: String,
    pub number_of_initial_queries: u32,
    pub max_research_loops: u32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            query_generator_model: "gemini-2.0-flash".into(),
            reflection_model: "gemini-2.5-flash".into(),
            answer_model: "gemini-2.5-pro".into(),
            number_of_initial_queries: 3,
            max_research_loops: 2,
        }
    }
}

/// `POST research-create` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub chat: String,
    pub query: String,
    pub config: ResearchConfig,
}

/// One entry of `GET chat researches`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchRecord {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub sources: Vec<Value>,
}

const PLACEHOLDER_RESULTS: &[&str] = &["", "pending", "processing", "processing..."];

impl ResearchRecord {
    /// Complete when it carries a non-placeholder `result`.
    pub fn is_complete(&self) -> bool {
        match &self.result {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => {
                let s = s.trim().to_ascii_lowercase();
                !PLACEHOLDER_RESULTS.contains(&s.as_str())
            }
            Some(_) => true,
        }
    }
}

pub fn is_job_completed(status: &str) -> bool {
    status == "completed"
}

pub fn is_job_active(status: &str) -> bool {
    status == "active" || status == "waiting"
}

pub fn is_job_failed(status: &str) -> bool {
    status == "failed"
}

// --- Backend seam ---

/// Raw body chunks of a streamed research response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Everything the orchestrator needs from the research backend.
pub trait ResearchApi: Send + Sync {
    /// Start a job and return its newline-delimited JSON body.
    fn open_research_stream(
        &self,
        request: &ResearchRequest,
    ) -> impl Future<Output = Result<ByteStream>> + Send;

    fn job_status(&self, job_id: &str) -> impl Future<Output = Result<JobStatus>> + Send;

    fn queue_stats(&self) -> impl Future<Output = Result<QueueStats>> + Send;

    fn chat_researches(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Vec<ResearchRecord>>> + Send;
}

/// reqwest-backed [`ResearchApi`].
#[derive(Debug, Clone)]
pub struct HttpResearchApi {
    config: ClientConfig,
    client: reqwest::Client,
}

impl HttpResearchApi {
    /// # Errors
    /// [`ResearchError::Config`] when the HTTP client cannot be built, for
    /// example when no TLS backend can be initialised.
    pub fn new(config: ClientConfig) -> Result<Self> {
        // The research stream can stay open for many minutes, so only the
        // connect phase is bounded on the client; status calls add a
        // per-request timeout below.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ResearchError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String, field: &str) -> Result<T> {
        let resp = self
            .authorize(self.client.get(&url))
            .timeout(self.config.request_timeout())
            .send()
            .await
            .map_err(|e| ResearchError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ResearchError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        let bytes = resp.bytes().await.map_err(|e| ResearchError::Connect {
            url: url.clone(),
            detail: e.to_string(),
        })?;

        serde_json::from_slice::<T>(&bytes).map_err(|e| ResearchError::Json {
            field: field.into(),
            detail: e.to_string(),
        })
    }
}

impl ResearchApi for HttpResearchApi {
    async fn open_research_stream(&self, request: &ResearchRequest) -> Result<ByteStream> {
        let url = self.config.url(&self.config.endpoints.research_create);
        let resp = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(|e| ResearchError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ResearchError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        let stream = resp.bytes_stream().map(move |chunk| {
            chunk.map(|b| b.to_vec()).map_err(|e| ResearchError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })
        });
        Ok(Box::pin(stream))
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let url = self.config.job_status_url(job_id);
        self.get_json(url, "status").await
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let url = self.config.url(&self.config.endpoints.queue_stats);
        self.get_json(url, "research").await
    }

    async fn chat_researches(&self, chat_id: &str) -> Result<Vec<ResearchRecord>> {
        let url = self.config.chat_researches_url(chat_id);
        self.get_json(url, "researches").await
    }
}

// --- Status oracle ---

/// Best-effort view of the backend queue.
///
/// Every call swallows failures into a default and logs them: callers must
/// tolerate stale or missing answers.
pub struct QueueStatusService<A> {
    api: Arc<A>,
    store: SharedStore,
}

impl<A> Clone for QueueStatusService<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            store: Arc::clone(&self.store),
        }
    }
}

impl<A: ResearchApi> QueueStatusService<A> {
    pub fn new(api: Arc<A>, store: SharedStore) -> Self {
        Self { api, store }
    }

    /// Aggregate queue depth, zeroed on any failure.
    pub async fn get_queue_stats(&self) -> QueueStats {
        match self.api.queue_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "queue stats unavailable, reporting empty queue");
                QueueStats::default()
            }
        }
    }

    /// Status of one job, `None` on any failure.
    pub async fn get_job_status(&self, job_id: &str) -> Option<JobStatus> {
        match self.api.job_status(job_id).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, job_id, "job status unavailable");
                None
            }
        }
    }

    /// Research records of a chat, empty on any failure.
    pub async fn get_chat_researches(&self, chat_id: &str) -> Vec<ResearchRecord> {
        match self.api.chat_researches(chat_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, chat_id, "chat researches unavailable");
                Vec::new()
            }
        }
    }

    /// Whether the breadcrumbed job is still running or finished with a
    /// result the caller can pick up.
    ///
    /// Only the single breadcrumbed job is consulted. Aggregate queue counts
    /// include other users' work and are deliberately not used here.
    pub async fn has_active_research(&self) -> bool {
        let job_id = match self.store.get(CURRENT_JOB_KEY) {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => return false,
            Err(e) => {
                warn!(error = %e, "could not read current job breadcrumb");
                return false;
            }
        };

        match self.get_job_status(&job_id).await {
            Some(status) => {
                let active = status.is_active() || status.is_completed();
                debug!(job_id = %job_id, status = %status.status, active, "breadcrumbed job resolved");
                active
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn http_client_builds_from_default_config() {
        let api = HttpResearchApi::new(ClientConfig::default()).unwrap();
        assert_eq!(api.config().base_url, ClientConfig::default().base_url);
    }

    #[test]
    fn classifiers() {
        assert!(is_job_completed("completed"));
        assert!(!is_job_completed("active"));
        assert!(is_job_active("active"));
        assert!(is_job_active("waiting"));
        assert!(!is_job_active("completed"));
        assert!(is_job_failed("failed"));
        assert!(!is_job_failed("completed"));
    }

    #[test]
    fn job_status_deserializes_minimal_and_full() {
        let minimal: JobStatus = serde_json::from_value(json!({"status": "waiting"})).unwrap();
        assert!(minimal.progress.events.is_empty());
        assert!(minimal.result.is_none());
        assert!(minimal.is_active());

        let full: JobStatus = serde_json::from_value(json!({
            "jobId": "srv-1",
            "status": "completed",
            "progress": {"events": [{"step": "a"}, {"step": "b"}]},
            "result": {"answer": "42"}
        }))
        .unwrap();
        assert_eq!(full.id.as_deref(), Some("srv-1"));
        assert_eq!(full.progress.events.len(), 2);
        assert!(full.is_completed());
    }

    #[test]
    fn queue_stats_tolerates_missing_fields() {
        let s: QueueStats = serde_json::from_value(json!({"research": {"active": 2}})).unwrap();
        assert_eq!(s.research.active, 2);
        assert_eq!(s.research.waiting, 0);
        let empty: QueueStats = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, QueueStats::default());
    }

    #[test]
    fn research_request_wire_shape() {
        let req = ResearchRequest {
            chat: "c1".into(),
            query: "rust async".into(),
            config: ResearchConfig::default(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["chat"], "c1");
        assert_eq!(v["config"]["number_of_initial_queries"], 3);
        assert!(v["config"]["max_research_loops"].is_number());
        assert!(v["config"]["answer_model"].is_string());
    }

    #[test]
    fn research_record_placeholders_are_incomplete() {
        let mk = |v: Value| ResearchRecord {
            result: Some(v),
            ..Default::default()
        };
        assert!(!ResearchRecord::default().is_complete());
        assert!(!mk(Value::Null).is_complete());
        assert!(!mk(json!("")).is_complete());
        assert!(!mk(json!("Processing...")).is_complete());
        assert!(!mk(json!("pending")).is_complete());
        assert!(mk(json!("The answer is 42.")).is_complete());
        assert!(mk(json!({"answer": "x"})).is_complete());
    }
}
