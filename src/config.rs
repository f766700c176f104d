//! Client configuration: backend location, endpoint paths and the polling
//! schedule.
//!
//! Values come from built-in defaults, then an optional TOML file, then
//! environment variables (`RESEARCH_API_URL`, `RESEARCH_API_TOKEN`,
//! `RESEARCH_STORE_PATH`).
//!
//! ```toml
//! base_url = "https://api.example.com"
//! request_timeout_secs = 30
//!
//! [polling]
//! max_polls = 600
//! event_stagger_ms = 1500
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ResearchError, Result};

/// Backend endpoint paths, relative to `base_url`.
///
/// `{job_id}` and `{chat_id}` are substituted at request time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub research_create: String,
    pub job_status: String,
    pub queue_stats: String,
    pub chat_researches: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            research_create: "/research/create".into(),
            job_status: "/research/jobs/{job_id}".into(),
            queue_stats: "/research/queue/stats".into(),
            chat_researches: "/chat/{chat_id}/researches".into(),
        }
    }
}

/// Tiered polling schedule used once the live stream is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval for the first `mid_after` ticks.
    pub fast_interval_ms: u64,
    /// Interval from tick `mid_after` until tick `slow_after`.
    pub mid_interval_ms: u64,
    /// Interval from tick `slow_after` onwards.
    pub slow_interval_ms: u64,
    pub mid_after: u32,
    pub slow_after: u32,
    /// Hard cap on status checks before the run times out.
    pub max_polls: u32,
    /// Consecutive failed status checks before giving up.
    pub max_consecutive_errors: u32,
    /// Spacing between replayed events observed by a single poll.
    pub event_stagger_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: 5_000,
            mid_interval_ms: 8_000,
            slow_interval_ms: 15_000,
            mid_after: 20,
            slow_after: 100,
            max_polls: 600,
            max_consecutive_errors: 5,
            event_stagger_ms: 1_500,
        }
    }
}

impl PollingConfig {
    /// Interval to wait after the given 1-based tick.
    pub fn interval_for_tick(&self, tick: u32) -> Duration {
        let ms = if tick >= self.slow_after {
            self.slow_interval_ms
        } else if tick >= self.mid_after {
            self.mid_interval_ms
        } else {
            self.fast_interval_ms
        };
        Duration::from_millis(ms)
    }

    pub fn event_stagger(&self) -> Duration {
        Duration::from_millis(self.event_stagger_ms)
    }

    /// Same tier boundaries, every wait scaled down to `ms`. Handy for tests
    /// and local backends.
    pub fn with_uniform_interval(mut self, ms: u64) -> Self {
        self.fast_interval_ms = ms;
        self.mid_interval_ms = ms;
        self.slow_interval_ms = ms;
        self.event_stagger_ms = 0;
        self
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the research backend (e.g. `http://127.0.0.1:8000`).
    pub base_url: String,
    /// Optional bearer token sent on every request.
    pub api_token: Option<String>,
    pub connect_timeout_secs: u64,
    /// Per-request timeout for status calls. The research stream itself is
    /// not bounded by this.
    pub request_timeout_secs: u64,
    /// Breadcrumb database; `None` keeps breadcrumbs in memory.
    pub store_path: Option<PathBuf>,
    /// Age after which a stored breadcrumb counts as an interrupted run.
    pub stale_after_ms: u64,
    pub endpoints: Endpoints,
    pub polling: PollingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            api_token: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            store_path: None,
            stale_after_ms: 30_000,
            endpoints: Endpoints::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ResearchError::Config(e.to_string()))
    }

    /// Load from `path` if given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    ResearchError::Config(format!("reading {}: {e}", p.display()))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("RESEARCH_API_URL") {
            self.base_url = url;
        }
        if let Some(token) = lookup("RESEARCH_API_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(path) = lookup("RESEARCH_STORE_PATH") {
            self.store_path = Some(PathBuf::from(path));
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn job_status_url(&self, job_id: &str) -> String {
        self.url(&self.endpoints.job_status.replace("{job_id}", job_id))
    }

    pub fn chat_researches_url(&self, chat_id: &str) -> String {
        self.url(&self.endpoints.chat_researches.replace("{chat_id}", chat_id))
    }
}
