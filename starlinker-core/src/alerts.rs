//! Signal scoring, dedup, quiet-hours suppression, and channel dispatch
//! (§4.8).

use crate::clock::SharedClock;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use log::warn;
use miette::Diagnostic;
use serde::Serialize;
use starlinker_db::{StarlinkerConfig, StoreError, StoredSignal};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

const DISCORD_BODY_LIMIT: usize = 1800;

#[derive(Debug, Error, Diagnostic)]
pub enum AlertError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("discord webhook request failed")]
    Discord(#[source] reqwest::Error),
    #[error("mailer failed to send: {0}")]
    Mail(String),
}

/// Placeholder mail transport: in lieu of a real SMTP integration, keeps
/// everything it "sent" in memory so tests and the admin API can inspect
/// dispatch history, mirroring the original's `EmailPlaceholder`.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AlertError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub struct EmailPlaceholder {
    sent: Mutex<Vec<SentEmail>>,
}

impl EmailPlaceholder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for EmailPlaceholder {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), AlertError> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct AlertRunResult {
    pub alerts: usize,
    pub suppressed: bool,
}

struct AlertCandidate {
    signal: StoredSignal,
    priority: i32,
    dedup_key: String,
}

/// Evaluates recently stored signals, dedupes and scores them, and
/// dispatches the survivors to whichever channels are configured.
pub struct AlertsService {
    store: Arc<starlinker_db::SignalStore>,
    client: reqwest::Client,
    mailer: Arc<dyn Mailer>,
    clock: SharedClock,
    window: chrono::Duration,
    min_priority: i32,
    lock: AsyncMutex<()>,
    snoozed_until: Mutex<Option<DateTime<Utc>>>,
}

impl AlertsService {
    pub fn new(
        store: Arc<starlinker_db::SignalStore>,
        client: reqwest::Client,
        mailer: Arc<dyn Mailer>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            client,
            mailer,
            clock,
            window: chrono::Duration::hours(24),
            min_priority: 60,
            lock: AsyncMutex::new(()),
            snoozed_until: Mutex::new(None),
        }
    }

    /// Suppresses alert dispatch for `minutes` starting now, regardless of
    /// quiet hours. Takes precedence over everything else `run` checks.
    pub fn snooze(&self, minutes: i64, from: DateTime<Utc>) {
        *self.snoozed_until.lock().unwrap() = Some(from + chrono::Duration::minutes(minutes));
    }

    pub fn snoozed_until(&self) -> Option<DateTime<Utc>> {
        *self.snoozed_until.lock().unwrap()
    }

    fn is_snoozed(&self, moment: DateTime<Utc>) -> bool {
        matches!(self.snoozed_until(), Some(until) if moment < until)
    }

    pub async fn run(
        &self,
        config: &StarlinkerConfig,
        triggered_at: DateTime<Utc>,
    ) -> Result<AlertRunResult, AlertError> {
        let _guard = self.lock.lock().await;
        if self.is_snoozed(triggered_at) {
            return Ok(AlertRunResult {
                alerts: 0,
                suppressed: true,
            });
        }
        let candidates = self.collect_candidates(config, triggered_at)?;
        if candidates.is_empty() {
            return Ok(AlertRunResult {
                alerts: 0,
                suppressed: false,
            });
        }
        if in_quiet_hours(config, triggered_at) {
            return Ok(AlertRunResult {
                alerts: 0,
                suppressed: true,
            });
        }

        let mut delivered_total = 0;
        for candidate in candidates {
            let mut delivered_channels = Vec::new();
            let content = render_message(&candidate.signal);
            let subject = format!("[Starlinker] {}", candidate.signal.title);
            let webhook = config.outputs.discord_webhook.trim();
            if !webhook.is_empty() {
                match self.post_discord(webhook, &content).await {
                    Ok(()) => delivered_channels.push("discord".to_string()),
                    Err(e) => {
                        warn!("discord dispatch failed: {e}");
                        self.store.record_error(
                            "alerts.dispatch",
                            &e.to_string(),
                            Some(&serde_json::json!({"channel": "discord"})),
                            triggered_at,
                        )?;
                    }
                }
            }
            let email_to = config.outputs.email_to.trim();
            if !email_to.is_empty() {
                match self.mailer.send(email_to, &subject, &content) {
                    Ok(()) => delivered_channels.push("email".to_string()),
                    Err(e) => {
                        warn!("email dispatch failed: {e}");
                        self.store.record_error(
                            "alerts.dispatch",
                            &e.to_string(),
                            Some(&serde_json::json!({"channel": "email"})),
                            triggered_at,
                        )?;
                    }
                }
            }
            if !delivered_channels.is_empty() {
                self.store.record_alert(
                    "signal",
                    &candidate.signal.title,
                    Some(&candidate.signal.url),
                    &delivered_channels,
                    &candidate.dedup_key,
                    triggered_at,
                )?;
                delivered_total += 1;
            }
        }
        Ok(AlertRunResult {
            alerts: delivered_total,
            suppressed: false,
        })
    }

    fn collect_candidates(
        &self,
        config: &StarlinkerConfig,
        triggered_at: DateTime<Utc>,
    ) -> Result<Vec<AlertCandidate>, AlertError> {
        let _ = config;
        let since = triggered_at - self.window;
        let signals = self.store.fetch_signals(since)?;
        let mut candidates = Vec::new();
        for signal in signals {
            let priority = score_signal(&signal);
            if priority < self.min_priority {
                continue;
            }
            let dedup_key = build_dedup_key(&signal);
            if self.store.alert_exists(&dedup_key)? {
                continue;
            }
            candidates.push(AlertCandidate {
                signal,
                priority,
                dedup_key,
            });
        }
        candidates.sort_by(|a, b| {
            (b.priority, &b.signal.published_at).cmp(&(a.priority, &a.signal.published_at))
        });
        Ok(candidates)
    }

    async fn post_discord(&self, webhook: &str, content: &str) -> Result<(), AlertError> {
        let truncated = truncate(content, DISCORD_BODY_LIMIT);
        let response = self
            .client
            .post(webhook)
            .json(&serde_json::json!({"content": truncated}))
            .send()
            .await
            .map_err(AlertError::Discord)?;
        response.error_for_status().map_err(AlertError::Discord)?;
        Ok(())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn score_signal(signal: &StoredSignal) -> i32 {
    let mut priority = signal.priority;
    let tags: Vec<String> = signal.tags().iter().map(|t| t.to_lowercase()).collect();
    if tags.iter().any(|t| t == "live") {
        priority = priority.max(80);
    }
    if tags.iter().any(|t| t == "ptu") {
        priority = priority.max(50);
    }
    let lowered = signal.title.to_lowercase();
    if lowered.contains("hotfix") || lowered.contains("critical") {
        priority = priority.max(85);
    }
    if lowered.contains("roadmap") || lowered.contains("status") {
        priority = priority.max(60);
    }
    priority
}

fn build_dedup_key(signal: &StoredSignal) -> String {
    format!("{}:{}", signal.source, signal.url.to_lowercase())
}

fn render_message(signal: &StoredSignal) -> String {
    let summary = signal
        .summary
        .clone()
        .or_else(|| signal.raw_excerpt.clone())
        .unwrap_or_default();
    let published = signal
        .published_at()
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|_| signal.published_at.clone());
    let mut lines = vec![
        format!("**{}**", signal.title),
        format!("Source: {}", signal.source),
        format!("Published: {published}"),
        signal.url.clone(),
    ];
    let trimmed = summary.trim();
    if !trimmed.is_empty() {
        lines.push(String::new());
        lines.push(trimmed.to_string());
    }
    lines.join("\n")
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Whether `moment`, converted into `config.timezone`, falls inside the
/// configured quiet-hours window. Supports a window that wraps past
/// midnight (e.g. `23:00`-`07:00`).
pub fn in_quiet_hours(config: &StarlinkerConfig, moment: DateTime<Utc>) -> bool {
    if config.quiet_hours.len() != 2 {
        return false;
    }
    let tz = Tz::from_str(&config.timezone).unwrap_or(chrono_tz::UTC);
    let local = moment.with_timezone(&tz);
    let (Some(start), Some(end)) = (
        parse_time(&config.quiet_hours[0]),
        parse_time(&config.quiet_hours[1]),
    ) else {
        return false;
    };
    let current = local.time();
    if start <= end {
        start <= current && current < end
    } else {
        current >= start || current < end
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let (h, m) = value.split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use chrono::TimeZone;
    use starlinker_db::{NormalizedSignal, SignalStore};

    fn store() -> Arc<SignalStore> {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        Arc::new(SignalStore::new(tmp.path().to_str().unwrap(), 4).unwrap())
    }

    fn service(store: Arc<SignalStore>) -> AlertsService {
        AlertsService::new(
            store,
            reqwest::Client::new(),
            Arc::new(EmailPlaceholder::new()),
            system_clock(),
        )
    }

    #[test]
    fn hotfix_titles_score_above_threshold() {
        let signal = StoredSignal {
            id: 1,
            source: "rsi.patch_notes.live".into(),
            title: "Hotfix 4.0.1".into(),
            url: "https://x".into(),
            published_at: Utc::now().to_rfc3339(),
            fetched_at: Utc::now().to_rfc3339(),
            raw_excerpt: None,
            summary: None,
            tags_json: None,
            priority: 0,
        };
        assert!(score_signal(&signal) >= 60);
    }

    #[test]
    fn dedup_key_is_source_and_lowercased_url() {
        let signal = StoredSignal {
            id: 1,
            source: "rsi.patch_notes.live".into(),
            title: "x".into(),
            url: "https://Example.com/A".into(),
            published_at: Utc::now().to_rfc3339(),
            fetched_at: Utc::now().to_rfc3339(),
            raw_excerpt: None,
            summary: None,
            tags_json: None,
            priority: 0,
        };
        assert_eq!(
            build_dedup_key(&signal),
            "rsi.patch_notes.live:https://example.com/a"
        );
    }

    #[test]
    fn quiet_hours_wraps_past_midnight() {
        let mut config = StarlinkerConfig::default();
        config.timezone = "UTC".to_string();
        config.quiet_hours = vec!["23:00".to_string(), "07:00".to_string()];
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        let midday = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert!(in_quiet_hours(&config, late));
        assert!(!in_quiet_hours(&config, midday));
    }

    #[tokio::test]
    async fn no_candidates_yields_no_alerts_without_suppression() {
        let store = store();
        let svc = service(store);
        let config = StarlinkerConfig::default();
        let result = svc.run(&config, Utc::now()).await.unwrap();
        assert_eq!(result.alerts, 0);
        assert!(!result.suppressed);
    }

    #[tokio::test]
    async fn quiet_hours_suppresses_an_otherwise_eligible_alert() {
        let store = store();
        store
            .store_signals(&[NormalizedSignal {
                source: "rsi.patch_notes.live".into(),
                title: "Hotfix 4.0.1".into(),
                url: "https://x".into(),
                published_at: Utc::now(),
                fetched_at: Utc::now(),
                raw_excerpt: None,
                summary: None,
                tags: vec![],
                priority: 0,
            }])
            .unwrap();
        let svc = service(store);
        let mut config = StarlinkerConfig::default();
        config.timezone = "UTC".to_string();
        config.quiet_hours = vec!["00:00".to_string(), "23:59".to_string()];
        let moment = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let result = svc.run(&config, moment).await.unwrap();
        assert!(result.suppressed);
    }

    #[tokio::test]
    async fn snooze_suppresses_regardless_of_quiet_hours() {
        let store = store();
        store
            .store_signals(&[NormalizedSignal {
                source: "rsi.patch_notes.live".into(),
                title: "Hotfix 4.0.1".into(),
                url: "https://x".into(),
                published_at: Utc::now(),
                fetched_at: Utc::now(),
                raw_excerpt: None,
                summary: None,
                tags: vec![],
                priority: 0,
            }])
            .unwrap();
        let svc = service(store);
        let mut config = StarlinkerConfig::default();
        config.timezone = "UTC".to_string();
        config.quiet_hours = vec!["00:00".to_string(), "00:01".to_string()];
        let moment = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        svc.snooze(30, moment);
        let result = svc.run(&config, moment).await.unwrap();
        assert!(result.suppressed);
        assert_eq!(result.alerts, 0);
    }
}
