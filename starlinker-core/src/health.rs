use chrono::{DateTime, Utc};
use serde::Serialize;
use starlinker_db::StarlinkerConfig;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    running: bool,
    last_poll: Option<DateTime<Utc>>,
    last_poll_reason: Option<String>,
    last_digests: HashMap<String, DateTime<Utc>>,
    next_runs: HashMap<String, DateTime<Utc>>,
    last_config: Option<StarlinkerConfig>,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub running: bool,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_poll_reason: Option<String>,
    pub last_digests: HashMap<String, DateTime<Utc>>,
    pub next_runs: HashMap<String, DateTime<Utc>>,
    pub config: Option<StarlinkerConfig>,
}

/// Lightweight operational state for the admin `/health` surface. Mirrors
/// the original `HealthStatus` dataclass.
#[derive(Default)]
pub struct HealthStatus {
    inner: Mutex<Inner>,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_started(&self) {
        self.inner.lock().unwrap().running = true;
    }

    pub fn mark_stopped(&self) {
        self.inner.lock().unwrap().running = false;
    }

    pub fn record_poll(&self, when: DateTime<Utc>, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_poll = Some(when);
        inner.last_poll_reason = Some(reason.to_string());
    }

    pub fn record_digest(&self, when: DateTime<Utc>, digest_type: &str) {
        self.inner
            .lock()
            .unwrap()
            .last_digests
            .insert(digest_type.to_string(), when);
    }

    pub fn update_config(&self, config: StarlinkerConfig) {
        self.inner.lock().unwrap().last_config = Some(config);
    }

    pub fn update_next_run(&self, job: &str, when: DateTime<Utc>) {
        self.inner
            .lock()
            .unwrap()
            .next_runs
            .insert(job.to_string(), when);
    }

    pub fn clear_next_runs(&self) {
        self.inner.lock().unwrap().next_runs.clear();
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.lock().unwrap();
        HealthSnapshot {
            running: inner.running,
            last_poll: inner.last_poll,
            last_poll_reason: inner.last_poll_reason.clone(),
            last_digests: inner.last_digests.clone(),
            next_runs: inner.next_runs.clone(),
            config: inner.last_config.clone(),
        }
    }
}
