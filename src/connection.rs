//! Connectivity tracking and in-flight job breadcrumbs.
//!
//! Tracks whether the host is online and whether the view is visible, and
//! persists a breadcrumb for the running job so that an interrupted run can
//! be detected after the process was suspended or restarted.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::now_ms;
use crate::store::{SharedStore, ACTIVE_CHAT_KEY, CONNECTION_METADATA_KEY, CURRENT_JOB_KEY};

/// Default staleness threshold for a breadcrumb.
pub const STALE_AFTER_MS: u64 = 30_000;

/// Persisted breadcrumb for the job currently being observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    pub job_id: String,
    pub last_step: String,
    /// Unix epoch milliseconds at the time the breadcrumb was written.
    pub timestamp: u64,
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Online/visibility flags plus breadcrumb persistence.
pub struct ConnectionState {
    store: SharedStore,
    stale_after_ms: u64,
    chat_id: Option<String>,
    is_online: bool,
    is_page_visible: bool,
    last_disconnect_time: Option<u64>,
}

impl ConnectionState {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            stale_after_ms: STALE_AFTER_MS,
            chat_id: None,
            is_online: true,
            is_page_visible: true,
            last_disconnect_time: None,
        }
    }

    pub fn with_stale_after(mut self, ms: u64) -> Self {
        self.stale_after_ms = ms;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn set_chat_id(&mut self, chat_id: Option<String>) {
        self.chat_id = chat_id;
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    pub fn is_online(&self) -> bool {
        self.is_online
    }

    pub fn is_page_visible(&self) -> bool {
        self.is_page_visible
    }

    pub fn last_disconnect_time(&self) -> Option<u64> {
        self.last_disconnect_time
    }

    /// Record an online/offline transition. Going offline stamps the
    /// disconnect time.
    pub fn set_online(&mut self, online: bool) {
        if self.is_online && !online {
            self.last_disconnect_time = Some(now_ms());
            debug!("connection went offline");
        }
        self.is_online = online;
    }

    /// Record a visibility transition. Becoming hidden stamps the disconnect
    /// time.
    pub fn set_page_visible(&mut self, visible: bool) {
        if self.is_page_visible && !visible {
            self.last_disconnect_time = Some(now_ms());
            debug!("page hidden");
        }
        self.is_page_visible = visible;
    }

    /// Persist `{jobId, lastStep, timestamp, chatId}`, replacing any prior
    /// breadcrumb.
    pub fn store_connection_metadata(&self, job_id: &str, step: &str) -> Result<()> {
        self.store_connection_metadata_at(job_id, step, now_ms())
    }

    pub fn store_connection_metadata_at(&self, job_id: &str, step: &str, now: u64) -> Result<()> {
        let meta = ConnectionMetadata {
            job_id: job_id.to_string(),
            last_step: step.to_string(),
            timestamp: now,
            chat_id: self.chat_id.clone(),
        };
        let json = serde_json::to_string(&meta)?;
        self.store.set(CONNECTION_METADATA_KEY, &json)
    }

    /// Read the breadcrumb. A corrupt entry reads as absent.
    pub fn get_stored_metadata(&self) -> Option<ConnectionMetadata> {
        let raw = match self.store.get(CONNECTION_METADATA_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read connection metadata");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(error = %e, "ignoring corrupt connection metadata");
                None
            }
        }
    }

    /// Drop every breadcrumb key for the active job.
    pub fn clear_connection_metadata(&self) -> Result<()> {
        self.store.remove(CONNECTION_METADATA_KEY)?;
        self.store.remove(CURRENT_JOB_KEY)?;
        self.store.remove(ACTIVE_CHAT_KEY)?;
        Ok(())
    }

    /// True when a breadcrumb names a job and is older than the staleness
    /// threshold. A heuristic: the job may well still be healthy.
    pub fn is_connection_interrupted(&self) -> bool {
        self.is_connection_interrupted_at(now_ms())
    }

    pub fn is_connection_interrupted_at(&self, now: u64) -> bool {
        match self.get_stored_metadata() {
            Some(meta) if !meta.job_id.is_empty() => {
                now.saturating_sub(meta.timestamp) > self.stale_after_ms
            }
            _ => false,
        }
    }

    /// Interrupted and able to reach the backend right now.
    pub fn should_attempt_recovery(&self) -> bool {
        self.is_online && self.is_page_visible && self.is_connection_interrupted()
    }

    /// Call when the host comes back online or visible. Returns whether the
    /// caller should run a recovery check.
    pub fn on_resume(&mut self) -> bool {
        self.set_online(true);
        self.set_page_visible(true);
        self.get_stored_metadata().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn state() -> ConnectionState {
        ConnectionState::new(MemoryStore::shared())
    }

    #[test]
    fn fresh_breadcrumb_is_not_interrupted() {
        let s = state();
        s.store_connection_metadata("job-1", "searching").unwrap();
        assert!(!s.is_connection_interrupted());
    }

    #[test]
    fn stale_breadcrumb_is_interrupted() {
        let s = state();
        s.store_connection_metadata_at("job-1", "searching", 1_000).unwrap();
        assert!(s.is_connection_interrupted_at(1_000 + 30_001));
        assert!(!s.is_connection_interrupted_at(1_000 + 30_000));
    }

    #[test]
    fn no_breadcrumb_is_not_interrupted() {
        assert!(!state().is_connection_interrupted_at(u64::MAX));
    }

    #[test]
    fn empty_job_id_is_not_interrupted() {
        let s = state();
        s.store_connection_metadata_at("", "x", 0).unwrap();
        assert!(!s.is_connection_interrupted_at(100_000));
    }

    #[test]
    fn store_overwrites_and_carries_chat_id() {
        let mut s = state();
        s.set_chat_id(Some("chat-3".into()));
        s.store_connection_metadata_at("a", "one", 5).unwrap();
        s.store_connection_metadata_at("b", "two", 6).unwrap();
        let meta = s.get_stored_metadata().unwrap();
        assert_eq!(meta.job_id, "b");
        assert_eq!(meta.last_step, "two");
        assert_eq!(meta.timestamp, 6);
        assert_eq!(meta.chat_id.as_deref(), Some("chat-3"));
    }

    #[test]
    fn metadata_uses_camel_case_keys() {
        let s = state();
        s.store_connection_metadata_at("j", "s", 1).unwrap();
        let raw = s.store().get(CONNECTION_METADATA_KEY).unwrap().unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["jobId"], "j");
        assert_eq!(v["lastStep"], "s");
        assert_eq!(v["timestamp"], 1);
    }

    #[test]
    fn clear_removes_all_keys() {
        let s = state();
        s.store().set(CURRENT_JOB_KEY, "j").unwrap();
        s.store().set(ACTIVE_CHAT_KEY, "c").unwrap();
        s.store_connection_metadata("j", "s").unwrap();
        s.clear_connection_metadata().unwrap();
        assert!(s.get_stored_metadata().is_none());
        assert!(s.store().get(CURRENT_JOB_KEY).unwrap().is_none());
        assert!(s.store().get(ACTIVE_CHAT_KEY).unwrap().is_none());
    }

    #[test]
    fn corrupt_metadata_reads_as_none() {
        let s = state();
        s.store().set(CONNECTION_METADATA_KEY, "{not json").unwrap();
        assert!(s.get_stored_metadata().is_none());
        assert!(!s.is_connection_interrupted());
    }

    #[test]
    fn going_offline_stamps_disconnect_time() {
        let mut s = state();
        assert!(s.last_disconnect_time().is_none());
        s.set_online(false);
        assert!(!s.is_online());
        assert!(s.last_disconnect_time().is_some());
    }

    #[test]
    fn hiding_stamps_disconnect_time() {
        let mut s = state();
        s.set_page_visible(false);
        assert!(!s.is_page_visible());
        assert!(s.last_disconnect_time().is_some());
    }

    #[test]
    fn recovery_requires_online_and_visible() {
        let mut s = state().with_stale_after(0);
        s.store_connection_metadata_at("j", "s", 0).unwrap();
        s.set_online(false);
        assert!(!s.should_attempt_recovery());
        assert!(s.on_resume());
        assert!(s.should_attempt_recovery());
    }
}
