use crate::client::build_client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use miette::Diagnostic;
use starlinker_db::{NormalizedSignal, SignalStore, StarlinkerConfig, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("error building HTTP client")]
    Client(#[source] reqwest::Error),
    #[error("request to upstream source failed")]
    Request(#[source] reqwest::Error),
    #[error("response from upstream source could not be parsed: {0}")]
    Parse(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An ingest source. Each module polls one upstream and returns the signals
/// it found; the manager is responsible for enablement checks, error
/// capture, and storage.
#[async_trait]
pub trait IngestModule: Send + Sync {
    fn name(&self) -> &str;
    fn enabled(&self, config: &StarlinkerConfig) -> bool;
    async fn run(
        &self,
        config: &StarlinkerConfig,
        client: &reqwest::Client,
        triggered_at: DateTime<Utc>,
    ) -> Result<Vec<NormalizedSignal>, IngestError>;
}

#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    pub fetched: usize,
    pub stored: usize,
}

/// Runs every enabled ingest module against a shared HTTP client and stores
/// what they find. `run_poll` holds an internal lock so overlapping
/// schedule triggers and manual triggers never run concurrently, matching
/// the original's `asyncio.Lock`-guarded `run_poll`.
pub struct IngestManager {
    store: Arc<SignalStore>,
    modules: Vec<Box<dyn IngestModule>>,
    lock: Mutex<()>,
}

impl IngestManager {
    pub fn new(store: Arc<SignalStore>) -> Self {
        Self {
            store,
            modules: Vec::new(),
            lock: Mutex::new(()),
        }
    }

    pub fn register_module(&mut self, module: Box<dyn IngestModule>) {
        self.modules.push(module);
    }

    pub async fn run_poll(
        &self,
        config: &StarlinkerConfig,
        reason: &str,
        triggered_at: DateTime<Utc>,
    ) -> Result<HashMap<String, PollOutcome>, IngestError> {
        let _guard = self.lock.lock().await;
        self.run_modules(config, reason, triggered_at).await
    }

    async fn run_modules(
        &self,
        config: &StarlinkerConfig,
        reason: &str,
        triggered_at: DateTime<Utc>,
    ) -> Result<HashMap<String, PollOutcome>, IngestError> {
        let client = build_client().map_err(IngestError::Client)?;
        let mut summary = HashMap::new();
        for module in &self.modules {
            if !module.enabled(config) {
                continue;
            }
            match module.run(config, &client, triggered_at).await {
                Ok(signals) => {
                    let fetched = signals.len();
                    let stored = self.store.store_signals(&signals)?;
                    summary.insert(module.name().to_string(), PollOutcome { fetched, stored });
                }
                Err(e) => {
                    warn!("ingest module '{}' failed: {}", module.name(), e);
                    let details = serde_json::json!({"reason": reason});
                    self.store
                        .record_error(module.name(), &e.to_string(), Some(&details), triggered_at)?;
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait]
    impl IngestModule for AlwaysFails {
        fn name(&self) -> &str {
            "always.fails"
        }
        fn enabled(&self, _config: &StarlinkerConfig) -> bool {
            true
        }
        async fn run(
            &self,
            _config: &StarlinkerConfig,
            _client: &reqwest::Client,
            _triggered_at: DateTime<Utc>,
        ) -> Result<Vec<NormalizedSignal>, IngestError> {
            Err(IngestError::Parse("malformed payload".to_string()))
        }
    }

    #[tokio::test]
    async fn a_failing_module_is_recorded_and_does_not_abort_the_poll() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = Arc::new(SignalStore::new(tmp.path().to_str().unwrap(), 4).unwrap());
        let mut manager = IngestManager::new(store.clone());
        manager.register_module(Box::new(AlwaysFails));
        let config = StarlinkerConfig::default();
        let summary = manager.run_poll(&config, "test", Utc::now()).await.unwrap();
        assert!(summary.is_empty());
        let snap = store.health_snapshot().unwrap();
        assert!(snap.last_error.is_some());
    }
}
