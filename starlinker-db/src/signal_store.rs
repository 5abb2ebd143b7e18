use crate::error::StoreError;
use crate::models::{NewAlert, NewDigest, NewErrorRecord, NewSignal, StoredAlert, StoredDigest, StoredSignal};
use crate::pool::{get_pool, ConnectionPool};
use crate::schema::{alerts, digests, errors, signals};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

/// A content signal normalized by an ingest module, ready for persistence.
/// Mirrors `ingest.models.NormalizedSignal` field-for-field.
#[derive(Debug, Clone)]
pub struct NormalizedSignal {
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub raw_excerpt: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub priority: i32,
}

impl NormalizedSignal {
    fn new_row(&self) -> NewSignal<'_> {
        NewSignal {
            source: &self.source,
            title: &self.title,
            url: &self.url,
            published_at: self.published_at.to_rfc3339(),
            fetched_at: self.fetched_at.to_rfc3339(),
            raw_excerpt: self.raw_excerpt.as_deref(),
            summary: self.summary.as_deref(),
            tags_json: if self.tags.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&self.tags).unwrap_or_default())
            },
            priority: self.priority,
        }
    }
}

impl StoredSignal {
    pub fn published_at(&self) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(&self.published_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| StoreError::BadTimestamp(self.published_at.clone()))
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub signal_count: i64,
    pub digest_count: i64,
    pub alert_count: i64,
    pub last_error: Option<LastError>,
}

#[derive(Debug, Serialize)]
pub struct LastError {
    pub module: String,
    pub message: String,
    pub ts: String,
}

/// Signal/alert/digest/error persistence, backed by a pooled SQLite
/// connection (swapped from the teacher's Postgres pool — Starlinker's data
/// is a single file-local store, not a shared network RDBMS).
pub struct SignalStore {
    pool: ConnectionPool,
}

impl SignalStore {
    pub fn new(database_path: &str, max_pool_size: u32) -> Result<Self, StoreError> {
        crate::migrations::run_migrations(database_path)?;
        let pool = get_pool(database_path, max_pool_size)?;
        Ok(Self { pool })
    }

    /// Inserts `signals`, skipping any whose `url` already exists. Returns
    /// how many were newly stored.
    pub fn store_signals(&self, new_signals: &[NormalizedSignal]) -> Result<usize, StoreError> {
        let mut conn = self.pool.get()?;
        let mut stored = 0usize;
        for signal in new_signals {
            let row = signal.new_row();
            let inserted = diesel::insert_into(signals::table)
                .values(&row)
                .on_conflict(signals::url)
                .do_nothing()
                .execute(&mut conn)?;
            stored += inserted;
        }
        Ok(stored)
    }

    pub fn fetch_signals(&self, since: DateTime<Utc>) -> Result<Vec<StoredSignal>, StoreError> {
        let mut conn = self.pool.get()?;
        let since_str = since.to_rfc3339();
        let rows = signals::table
            .filter(signals::fetched_at.ge(since_str))
            .order(signals::fetched_at.desc())
            .select(StoredSignal::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    pub fn alert_exists(&self, dedup_key: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get()?;
        let count: i64 = alerts::table
            .filter(alerts::dedup_key.eq(dedup_key))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    pub fn record_alert(
        &self,
        alert_type: &str,
        title: &str,
        url: Option<&str>,
        delivered_channels: &[String],
        dedup_key: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let row = NewAlert {
            created_at: created_at.to_rfc3339(),
            alert_type,
            title,
            url,
            delivered_channels_json: Some(serde_json::to_string(delivered_channels)?),
            dedup_key,
        };
        diesel::insert_into(alerts::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn record_digest(
        &self,
        digest_type: &str,
        body_markdown: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let row = NewDigest {
            sent_at: sent_at.to_rfc3339(),
            digest_type,
            body_markdown,
        };
        diesel::insert_into(digests::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn list_digests(&self, limit: i64) -> Result<Vec<StoredDigest>, StoreError> {
        let mut conn = self.pool.get()?;
        let rows = digests::table
            .order(digests::id.desc())
            .limit(limit)
            .select(StoredDigest::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    pub fn record_error(
        &self,
        module: &str,
        message: &str,
        details: Option<&serde_json::Value>,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let details_json = details.map(serde_json::to_string).transpose()?;
        let row = NewErrorRecord {
            ts: ts.to_rfc3339(),
            module,
            message,
            details_json,
        };
        diesel::insert_into(errors::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn health_snapshot(&self) -> Result<HealthSnapshot, StoreError> {
        let mut conn = self.pool.get()?;
        let signal_count: i64 = signals::table.count().get_result(&mut conn)?;
        let digest_count: i64 = digests::table.count().get_result(&mut conn)?;
        let alert_count: i64 = alerts::table.count().get_result(&mut conn)?;
        let last_error = errors::table
            .order(errors::ts.desc())
            .select((errors::module, errors::message, errors::ts))
            .first::<(String, String, String)>(&mut conn)
            .optional()?
            .map(|(module, message, ts)| LastError { module, message, ts });
        Ok(HealthSnapshot {
            signal_count,
            digest_count,
            alert_count,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(source: &str, url: &str) -> NormalizedSignal {
        NormalizedSignal {
            source: source.to_string(),
            title: "Title".to_string(),
            url: url.to_string(),
            published_at: Utc::now(),
            fetched_at: Utc::now(),
            raw_excerpt: None,
            summary: None,
            tags: vec!["rsi".to_string()],
            priority: 10,
        }
    }

    fn store() -> SignalStore {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        SignalStore::new(tmp.path().to_str().unwrap(), 4).unwrap()
    }

    #[test]
    fn storing_duplicate_url_is_a_noop() {
        let store = store();
        let s = signal("rsi.patch_notes.live", "https://example.com/a");
        assert_eq!(store.store_signals(&[s.clone()]).unwrap(), 1);
        assert_eq!(store.store_signals(&[s]).unwrap(), 0);
    }

    #[test]
    fn same_url_from_a_different_source_is_still_deduped() {
        let store = store();
        let a = signal("rsi.patch_notes.live", "https://example.com/a");
        let b = signal("rsi.patch_notes.ptu", "https://example.com/a");
        assert_eq!(store.store_signals(&[a]).unwrap(), 1);
        assert_eq!(store.store_signals(&[b]).unwrap(), 0);
    }

    #[test]
    fn alert_exists_reflects_recorded_alerts() {
        let store = store();
        assert!(!store.alert_exists("rsi.patch_notes:https://x").unwrap());
        store
            .record_alert(
                "signal",
                "Title",
                Some("https://x"),
                &["discord".to_string()],
                "rsi.patch_notes:https://x",
                Utc::now(),
            )
            .unwrap();
        assert!(store.alert_exists("rsi.patch_notes:https://x").unwrap());
    }

    #[test]
    fn health_snapshot_counts_rows() {
        let store = store();
        store
            .store_signals(&[signal("a", "https://a"), signal("b", "https://b")])
            .unwrap();
        let snap = store.health_snapshot().unwrap();
        assert_eq!(snap.signal_count, 2);
        assert_eq!(snap.digest_count, 0);
        assert!(snap.last_error.is_none());
    }
}
