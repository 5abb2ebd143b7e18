//! Named job scheduler driving ingest polls and digest dispatch (§4.10).
//!
//! Each job runs its own loop in the teacher's `ingest_task_runner` shape:
//! compute how long until the next deadline with `chrono`, `tokio::select!`
//! that sleep against a shutdown signal, run the job, repeat. `RunGate`
//! generalizes the teacher's single Idle/Running ingest state machine to
//! four independently-scheduled jobs. A firing that finds its job's gate
//! held doesn't start a second concurrent execution; it marks one more
//! queued run to happen immediately once the in-flight one finishes
//! (`max_instances=1` coalescing), which manual admin triggers dispatch
//! into the background the same way a scheduled firing does.

use crate::alerts::AlertsService;
use crate::clock::SharedClock;
use crate::digest::{DigestService, DigestType};
use crate::health::{HealthSnapshot, HealthStatus};
use crate::run_gate::{RunGate, RunGuard};
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_humanize::HumanTime;
use chrono_tz::Tz;
use log::{info, warn};
use miette::Diagnostic;
use serde::Serialize;
use starlinker_db::{parse_weekly_schedule, SettingsRepository, StoreError};
use starlinker_ingest::IngestManager;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ingest(#[from] starlinker_ingest::IngestError),
    #[error(transparent)]
    Digest(#[from] crate::digest::DigestError),
    #[error(transparent)]
    Alert(#[from] crate::alerts::AlertError),
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerOutcome {
    pub triggered_at: DateTime<Utc>,
    pub skipped: bool,
}

struct Job {
    handle: JoinHandle<()>,
}

/// Orchestrates the priority/standard poll cadence and the daily/weekly
/// digest cadence described by `ScheduleConfig`, plus manual trigger
/// endpoints for the admin API.
pub struct Scheduler {
    settings: Arc<SettingsRepository>,
    ingest: Arc<IngestManager>,
    alerts: Arc<AlertsService>,
    digest: Arc<DigestService>,
    health: Arc<HealthStatus>,
    clock: SharedClock,
    shutdown: Arc<Notify>,
    jobs: Mutex<Vec<Job>>,
    priority_poll_gate: Arc<RunGate>,
    standard_poll_gate: Arc<RunGate>,
    daily_digest_gate: Arc<RunGate>,
    weekly_digest_gate: Arc<RunGate>,
    /// Divides every computed sleep duration; tests set this below 1.0 so
    /// job loops don't actually wait real-world minutes/hours.
    interval_scale: f64,
}

impl Scheduler {
    pub fn new(
        settings: Arc<SettingsRepository>,
        ingest: Arc<IngestManager>,
        alerts: Arc<AlertsService>,
        digest: Arc<DigestService>,
        health: Arc<HealthStatus>,
        clock: SharedClock,
    ) -> Self {
        Self {
            settings,
            ingest,
            alerts,
            digest,
            health,
            clock,
            shutdown: Arc::new(Notify::new()),
            jobs: Mutex::new(Vec::new()),
            priority_poll_gate: Arc::new(RunGate::new()),
            standard_poll_gate: Arc::new(RunGate::new()),
            daily_digest_gate: Arc::new(RunGate::new()),
            weekly_digest_gate: Arc::new(RunGate::new()),
            interval_scale: 1.0,
        }
    }

    #[cfg(test)]
    pub fn with_interval_scale(mut self, scale: f64) -> Self {
        self.interval_scale = scale;
        self
    }

    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        self.health.mark_started();
        let config = self.settings.load()?;
        self.health.update_config(config);

        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(Job {
            handle: self.clone().spawn_poll_loop(
                self.priority_poll_gate.clone(),
                "priority",
                |cfg| cfg.schedule.priority_poll_minutes as i64 * 60,
            ),
        });
        jobs.push(Job {
            handle: self.clone().spawn_poll_loop(
                self.standard_poll_gate.clone(),
                "standard",
                |cfg| cfg.schedule.standard_poll_hours as i64 * 3600,
            ),
        });
        jobs.push(Job {
            handle: self
                .clone()
                .spawn_digest_loop(self.daily_digest_gate.clone(), DigestType::Daily, false),
        });
        jobs.push(Job {
            handle: self
                .clone()
                .spawn_digest_loop(self.weekly_digest_gate.clone(), DigestType::Weekly, true),
        });
        Ok(())
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs.drain(..) {
            job.handle.abort();
        }
        self.health.mark_stopped();
        self.health.clear_next_runs();
    }

    pub fn refresh_config(&self) -> Result<(), SchedulerError> {
        let config = self.settings.load()?;
        self.health.update_config(config);
        Ok(())
    }

    pub fn describe(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn snooze_alerts(&self, minutes: i64) {
        self.alerts.snooze(minutes, self.clock.now());
    }

    pub fn preview_digest(
        &self,
        digest_type: &str,
    ) -> Result<crate::digest::DigestPreview, SchedulerError> {
        let dt = DigestType::from_str(digest_type)?;
        let config = self.settings.load()?;
        Ok(self.digest.preview(dt, &config, self.clock.now())?)
    }

    /// Submits a poll to the background execution context and returns
    /// immediately; `skipped` reports whether the priority-poll gate was
    /// already held (in which case this firing was coalesced into the
    /// in-flight run rather than starting a new one).
    pub fn trigger_poll(self: &Arc<Self>, reason: &str) -> TriggerOutcome {
        let now = self.clock.now();
        match self.priority_poll_gate.enter_or_queue() {
            Some(guard) => {
                let this = self.clone();
                let gate = self.priority_poll_gate.clone();
                let reason = reason.to_string();
                tokio::spawn(async move { this.drain_poll(gate, reason, guard).await });
                TriggerOutcome {
                    triggered_at: now,
                    skipped: false,
                }
            }
            None => TriggerOutcome {
                triggered_at: now,
                skipped: true,
            },
        }
    }

    /// Submits a digest run to the background execution context and
    /// returns immediately, the same way `trigger_poll` does.
    pub fn trigger_digest(self: &Arc<Self>, digest_type: &str) -> Result<TriggerOutcome, SchedulerError> {
        let dt = DigestType::from_str(digest_type)?;
        let now = self.clock.now();
        let gate = match dt {
            DigestType::Daily => &self.daily_digest_gate,
            DigestType::Weekly => &self.weekly_digest_gate,
        };
        match gate.enter_or_queue() {
            Some(guard) => {
                let this = self.clone();
                let gate = gate.clone();
                tokio::spawn(async move { this.drain_digest(gate, dt, guard).await });
                Ok(TriggerOutcome {
                    triggered_at: now,
                    skipped: false,
                })
            }
            None => Ok(TriggerOutcome {
                triggered_at: now,
                skipped: true,
            }),
        }
    }

    async fn run_poll_now(&self, reason: &str, now: DateTime<Utc>) {
        let config = match self.settings.load() {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("scheduler: failed to load config before '{reason}' poll: {e}");
                return;
            }
        };
        if let Err(e) = self.ingest.run_poll(&config, reason, now).await {
            warn!("'{reason}' poll failed: {e}");
        }
        self.health.record_poll(now, reason);
        if let Err(e) = self.alerts.run(&config, now).await {
            warn!("alerts run after '{reason}' poll failed: {e}");
        }
    }

    async fn run_digest_now(&self, digest_type: DigestType, now: DateTime<Utc>) {
        let config = match self.settings.load() {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("scheduler: failed to load config before {digest_type} digest: {e}");
                return;
            }
        };
        if let Err(e) = self.digest.run_digest(digest_type, &config, now).await {
            warn!("{digest_type} digest failed: {e}");
        }
        self.health.record_digest(now, &digest_type.to_string());
    }

    /// Runs the poll once under `guard`, then keeps re-running (re-entering
    /// the gate, which always succeeds since nothing else can hold it while
    /// this loop is executing) as long as a collision queued a re-run while
    /// this one was in flight.
    async fn drain_poll(self: Arc<Self>, gate: Arc<RunGate>, reason: String, mut guard: RunGuard) {
        loop {
            let now = self.clock.now();
            self.run_poll_now(&reason, now).await;
            drop(guard);
            if !gate.take_pending() {
                break;
            }
            guard = match gate.try_enter() {
                Some(g) => g,
                None => break,
            };
        }
    }

    async fn drain_digest(
        self: Arc<Self>,
        gate: Arc<RunGate>,
        digest_type: DigestType,
        mut guard: RunGuard,
    ) {
        loop {
            let now = self.clock.now();
            self.run_digest_now(digest_type, now).await;
            drop(guard);
            if !gate.take_pending() {
                break;
            }
            guard = match gate.try_enter() {
                Some(g) => g,
                None => break,
            };
        }
    }

    fn spawn_poll_loop(
        self: Arc<Self>,
        gate: Arc<RunGate>,
        reason: &'static str,
        interval_secs: impl Fn(&starlinker_db::StarlinkerConfig) -> i64 + Send + Sync + 'static,
    ) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let secs = match self.settings.load() {
                    Ok(cfg) => interval_secs(&cfg).max(1),
                    Err(e) => {
                        warn!("scheduler: failed to load config for '{reason}' poll: {e}");
                        60
                    }
                };
                let next_at = self.clock.now() + chrono::Duration::seconds(secs);
                self.health.update_next_run(reason, next_at);
                let wait = scaled_duration(secs as f64, self.interval_scale);
                info!(
                    "next '{reason}' poll in {}",
                    HumanTime::from(chrono::Duration::from_std(wait).unwrap_or_default())
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.notified() => break,
                }
                if let Some(guard) = gate.enter_or_queue() {
                    self.clone().drain_poll(gate.clone(), reason.to_string(), guard).await;
                } else {
                    warn!("'{reason}' poll already in flight; queued a re-run");
                }
            }
        })
    }

    fn spawn_digest_loop(
        self: Arc<Self>,
        gate: Arc<RunGate>,
        digest_type: DigestType,
        weekly: bool,
    ) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let config = match self.settings.load() {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        warn!("scheduler: failed to load config for {digest_type} digest: {e}");
                        tokio::time::sleep(scaled_duration(300.0, self.interval_scale)).await;
                        continue;
                    }
                };
                let (time_str, anchor_weekday): (String, Option<Weekday>) = if weekly {
                    match parse_weekly_schedule(&config.schedule.digest_weekly) {
                        Some((weekday, time)) => (time.to_string(), Some(weekday)),
                        None => {
                            if !config.schedule.digest_weekly.trim().is_empty() {
                                warn!(
                                    "scheduler: malformed weekly digest schedule '{}'",
                                    config.schedule.digest_weekly
                                );
                            }
                            tokio::select! {
                                _ = tokio::time::sleep(scaled_duration(300.0, self.interval_scale)) => continue,
                                _ = shutdown.notified() => break,
                            }
                        }
                    }
                } else {
                    (config.schedule.digest_daily.clone(), None)
                };
                if time_str.is_empty() {
                    // Disabled; re-check periodically in case config changes.
                    tokio::select! {
                        _ = tokio::time::sleep(scaled_duration(300.0, self.interval_scale)) => continue,
                        _ = shutdown.notified() => break,
                    }
                }
                let tz = Tz::from_str(&config.timezone).unwrap_or(chrono_tz::UTC);
                let now = self.clock.now();
                let next = match next_occurrence(&time_str, tz, now, anchor_weekday) {
                    Some(n) => n,
                    None => {
                        warn!("scheduler: malformed {digest_type} digest time '{time_str}'");
                        tokio::time::sleep(scaled_duration(300.0, self.interval_scale)).await;
                        continue;
                    }
                };
                self.health.update_next_run(&digest_type.to_string(), next);
                let wait_chrono = next - now;
                let wait = scaled_duration(
                    wait_chrono.num_milliseconds().max(0) as f64 / 1000.0,
                    self.interval_scale,
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.notified() => break,
                }
                if let Some(guard) = gate.enter_or_queue() {
                    self.clone().drain_digest(gate.clone(), digest_type, guard).await;
                } else {
                    warn!("{digest_type} digest already in flight; queued a re-run");
                }
            }
        })
    }
}

fn scaled_duration(secs: f64, scale: f64) -> std::time::Duration {
    std::time::Duration::from_secs_f64((secs * scale).max(0.0))
}

/// Next UTC instant at which `time_str` ("HH:MM" in `tz`) occurs, strictly
/// after `after`. When `anchor_weekday` is set, only that weekday counts.
fn next_occurrence(
    time_str: &str,
    tz: Tz,
    after: DateTime<Utc>,
    anchor_weekday: Option<Weekday>,
) -> Option<DateTime<Utc>> {
    let (h, m) = time_str.split_once(':')?;
    let time = NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)?;
    let local_after = after.with_timezone(&tz);
    let mut candidate_date = local_after.date_naive();
    loop {
        let candidate_naive = candidate_date.and_time(time);
        let candidate = tz.from_local_datetime(&candidate_naive).single();
        if let Some(candidate) = candidate {
            let candidate_utc = candidate.with_timezone(&Utc);
            let weekday_ok = anchor_weekday.map(|w| candidate.weekday() == w).unwrap_or(true);
            if candidate_utc > after && weekday_ok {
                return Some(candidate_utc);
            }
        }
        candidate_date = candidate_date.succ_opt()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_occurrence_rolls_to_tomorrow_if_time_passed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let next = next_occurrence("09:00", chrono_tz::UTC, now, None).unwrap();
        assert_eq!(next.date_naive(), chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn next_occurrence_same_day_if_time_still_ahead() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let next = next_occurrence("09:00", chrono_tz::UTC, now, None).unwrap();
        assert_eq!(next.date_naive(), chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn weekly_anchor_only_matches_configured_weekday() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(); // a Monday
        let next = next_occurrence("09:00", chrono_tz::UTC, now, Some(Weekday::Mon)).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
    }

    #[test]
    fn weekly_schedule_string_picks_the_configured_weekday() {
        let (weekday, time) = parse_weekly_schedule("fri 18:30").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(); // a Monday
        let next = next_occurrence(time, chrono_tz::UTC, now, Some(weekday)).unwrap();
        assert_eq!(next.weekday(), Weekday::Fri);
        assert_eq!(next.date_naive(), chrono::NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
    }
}
