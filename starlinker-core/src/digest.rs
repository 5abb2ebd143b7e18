//! Periodic digest generation and dispatch (§4.9).

use crate::alerts::{EmailPlaceholder, Mailer};
use crate::clock::SharedClock;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use log::warn;
use miette::Diagnostic;
use serde::Serialize;
use starlinker_db::{SignalStore, StarlinkerConfig, StoreError, StoredSignal};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

const DISCORD_BODY_LIMIT: usize = 1800;
const SUMMARY_EXCERPT_LIMIT: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestType {
    Daily,
    Weekly,
}

impl DigestType {
    fn window(self) -> Duration {
        match self {
            DigestType::Daily => Duration::days(1),
            DigestType::Weekly => Duration::days(7),
        }
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DigestType::Daily => "daily",
            DigestType::Weekly => "weekly",
        })
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum DigestError {
    #[error("unsupported digest type: {0}")]
    UnsupportedType(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("discord webhook request failed")]
    Discord(#[source] reqwest::Error),
}

impl FromStr for DigestType {
    type Err = DigestError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(DigestType::Daily),
            "weekly" => Ok(DigestType::Weekly),
            other => Err(DigestError::UnsupportedType(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DigestRunResult {
    pub digest: String,
    pub sent: bool,
    pub signals: usize,
    pub channels: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DigestPreview {
    pub digest: String,
    pub body: String,
    pub signals: usize,
}

/// Builds a markdown digest body from recently stored signals and sends it
/// to whichever output channels are configured.
pub struct DigestService {
    store: Arc<SignalStore>,
    client: reqwest::Client,
    mailer: Arc<dyn Mailer>,
    clock: SharedClock,
    lock: AsyncMutex<()>,
}

impl DigestService {
    pub fn new(store: Arc<SignalStore>, client: reqwest::Client, clock: SharedClock) -> Self {
        Self {
            store,
            client,
            mailer: Arc::new(EmailPlaceholder::new()),
            clock,
            lock: AsyncMutex::new(()),
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub async fn run_digest(
        &self,
        digest_type: DigestType,
        config: &StarlinkerConfig,
        triggered_at: DateTime<Utc>,
    ) -> Result<DigestRunResult, DigestError> {
        let _guard = self.lock.lock().await;
        let (body, signals) = self.generate_digest_body(digest_type, config, triggered_at)?;
        if signals.is_empty() {
            return Ok(DigestRunResult {
                digest: digest_type.to_string(),
                sent: false,
                signals: 0,
                channels: Vec::new(),
            });
        }
        let subject = format!("[Starlinker] {digest_type} Digest");
        let mut delivered_channels = Vec::new();
        let webhook = config.outputs.discord_webhook.trim();
        if !webhook.is_empty() {
            match self.post_discord(webhook, &body).await {
                Ok(()) => delivered_channels.push("discord".to_string()),
                Err(e) => {
                    warn!("digest discord dispatch failed: {e}");
                    self.store.record_error(
                        "digest.dispatch",
                        &e.to_string(),
                        Some(&serde_json::json!({"channel": "discord"})),
                        triggered_at,
                    )?;
                }
            }
        }
        let email_to = config.outputs.email_to.trim();
        if !email_to.is_empty() {
            if let Err(e) = self.mailer.send(email_to, &subject, &body) {
                warn!("digest email dispatch failed: {e}");
                self.store.record_error(
                    "digest.dispatch",
                    &e.to_string(),
                    Some(&serde_json::json!({"channel": "email"})),
                    triggered_at,
                )?;
            } else {
                delivered_channels.push("email".to_string());
            }
        }
        if !delivered_channels.is_empty() {
            self.store
                .record_digest(&digest_type.to_string(), &body, triggered_at)?;
        }
        Ok(DigestRunResult {
            digest: digest_type.to_string(),
            sent: !delivered_channels.is_empty(),
            signals: signals.len(),
            channels: delivered_channels,
        })
    }

    pub fn generate_digest_body(
        &self,
        digest_type: DigestType,
        config: &StarlinkerConfig,
        triggered_at: DateTime<Utc>,
    ) -> Result<(String, Vec<StoredSignal>), DigestError> {
        let since = triggered_at - digest_type.window();
        let signals = self.store.fetch_signals(since)?;
        if signals.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        let tz = Tz::from_str(&config.timezone).unwrap_or(chrono_tz::UTC);
        let local_date = triggered_at.with_timezone(&tz).format("%Y-%m-%d").to_string();
        let mut lines = vec![
            format!("# Starlinker {digest_type} Digest ({local_date})"),
            String::new(),
        ];
        let mut sorted = signals.clone();
        sorted.sort_by(|a, b| {
            (b.priority, &b.published_at).cmp(&(a.priority, &a.published_at))
        });
        for signal in &sorted {
            let published = signal
                .published_at()
                .map(|dt| dt.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|_| signal.published_at.clone());
            lines.push(format!("- [{}]({}) \u{2014} {published}", signal.title, signal.url));
            if let Some(summary) = signal.summary.clone().or_else(|| signal.raw_excerpt.clone()) {
                let trimmed: String = summary.trim().chars().take(SUMMARY_EXCERPT_LIMIT).collect();
                if !trimmed.is_empty() {
                    lines.push(format!("  - {trimmed}"));
                }
            }
        }
        Ok((lines.join("\n"), signals))
    }

    pub fn preview(
        &self,
        digest_type: DigestType,
        config: &StarlinkerConfig,
        triggered_at: DateTime<Utc>,
    ) -> Result<DigestPreview, DigestError> {
        let (body, signals) = self.generate_digest_body(digest_type, config, triggered_at)?;
        Ok(DigestPreview {
            digest: digest_type.to_string(),
            body,
            signals: signals.len(),
        })
    }

    async fn post_discord(&self, webhook: &str, body: &str) -> Result<(), DigestError> {
        let truncated: String = body.chars().take(DISCORD_BODY_LIMIT).collect();
        let response = self
            .client
            .post(webhook)
            .json(&serde_json::json!({"content": truncated}))
            .send()
            .await
            .map_err(DigestError::Discord)?;
        response.error_for_status().map_err(DigestError::Discord)?;
        Ok(())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use starlinker_db::NormalizedSignal;

    fn store() -> Arc<SignalStore> {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        Arc::new(SignalStore::new(tmp.path().to_str().unwrap(), 4).unwrap())
    }

    #[test]
    fn digest_type_parses_known_values() {
        assert_eq!(DigestType::from_str("daily").unwrap(), DigestType::Daily);
        assert!(DigestType::from_str("hourly").is_err());
    }

    #[tokio::test]
    async fn empty_window_yields_unsent_digest() {
        let svc = DigestService::new(store(), reqwest::Client::new(), system_clock());
        let config = StarlinkerConfig::default();
        let result = svc.run_digest(DigestType::Daily, &config, Utc::now()).await.unwrap();
        assert!(!result.sent);
        assert_eq!(result.signals, 0);
    }

    #[tokio::test]
    async fn digest_body_includes_stored_signal_titles() {
        let store = store();
        store
            .store_signals(&[NormalizedSignal {
                source: "rsi.patch_notes.live".into(),
                title: "4.0 Released".into(),
                url: "https://x".into(),
                published_at: Utc::now(),
                fetched_at: Utc::now(),
                raw_excerpt: Some("Big patch".into()),
                summary: None,
                tags: vec![],
                priority: 10,
            }])
            .unwrap();
        let svc = DigestService::new(store, reqwest::Client::new(), system_clock());
        let config = StarlinkerConfig::default();
        let preview = svc.preview(DigestType::Daily, &config, Utc::now()).unwrap();
        assert_eq!(preview.signals, 1);
        assert!(preview.body.contains("4.0 Released"));
    }
}
