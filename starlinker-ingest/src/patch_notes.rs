//! RSI patch-notes ingest module — the reference ingest source.

use crate::manager::{IngestError, IngestModule};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use starlinker_db::{NormalizedSignal, StarlinkerConfig};
use std::collections::HashSet;

const API_URL: &str = "https://robertsspaceindustries.com/api/patchnotes/get";

pub struct RsiPatchNotesIngest;

#[async_trait]
impl IngestModule for RsiPatchNotesIngest {
    fn name(&self) -> &str {
        "rsi.patch_notes"
    }

    fn enabled(&self, config: &StarlinkerConfig) -> bool {
        config.sources.patch_notes.enabled
    }

    async fn run(
        &self,
        config: &StarlinkerConfig,
        client: &reqwest::Client,
        triggered_at: DateTime<Utc>,
    ) -> Result<Vec<NormalizedSignal>, IngestError> {
        let mut channels = vec!["LIVE"];
        if config.sources.patch_notes.include_ptu {
            channels.push("PTU");
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        for channel in channels {
            let entries = fetch_channel(client, channel).await?;
            for item in entries {
                let normalized = normalize_item(&item, channel, triggered_at);
                if seen.contains(&normalized.url) {
                    continue;
                }
                seen.insert(normalized.url.clone());
                results.push(normalized);
            }
        }
        Ok(results)
    }
}

async fn fetch_channel(client: &reqwest::Client, channel: &str) -> Result<Vec<Value>, IngestError> {
    let response = client
        .get(API_URL)
        .query(&[("page", "1"), ("channel", channel)])
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(IngestError::Request)?
        .error_for_status()
        .map_err(IngestError::Request)?;
    let data: Value = response.json().await.map_err(IngestError::Request)?;
    let entries = data
        .get("data")
        .and_then(|d| d.get("patchnotes"))
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();
    Ok(entries)
}

fn normalize_item(item: &Value, channel: &str, fetched_at: DateTime<Utc>) -> NormalizedSignal {
    let channel_lower = channel.to_lowercase();
    let title = item
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Patch Notes")
        .trim()
        .to_string();
    let url = build_url(item.get("url").and_then(Value::as_str).unwrap_or(""));
    let published_at = ["published_at", "time_created", "created_at"]
        .iter()
        .find_map(|key| item.get(*key))
        .map(|v| parse_datetime(v))
        .unwrap_or(fetched_at);
    let excerpt = item
        .get("excerpt")
        .or_else(|| item.get("snippet"))
        .or_else(|| item.get("brief"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string());
    let mut tags = vec!["rsi".to_string(), "patch-notes".to_string(), channel_lower.clone()];
    if let Some(item_channel) = item.get("channel").and_then(Value::as_str) {
        let lowered = item_channel.to_lowercase();
        if !tags.contains(&lowered) {
            tags.push(lowered);
        }
    }
    NormalizedSignal {
        source: format!("rsi.patch_notes.{channel_lower}"),
        title,
        url,
        published_at,
        fetched_at,
        raw_excerpt: excerpt,
        summary: None,
        tags,
        priority: 0,
    }
}

fn build_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    let path = if raw.is_empty() {
        "/".to_string()
    } else if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    };
    format!("https://robertsspaceindustries.com{path}")
}

/// Tries a handful of timestamp shapes RSI's API has been observed to use,
/// in order, before giving up and treating the item as published now.
fn parse_datetime(value: &Value) -> DateTime<Utc> {
    if let Some(n) = value.as_f64() {
        if let Some(dt) = Utc.timestamp_opt(n as i64, 0).single() {
            return dt;
        }
    }
    if let Some(s) = value.as_str() {
        let text = s.trim().replace('Z', "+00:00");
        let formats = [
            "%Y-%m-%dT%H:%M:%S%z",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S%z",
        ];
        for fmt in formats {
            if let Ok(dt) = DateTime::parse_from_str(&text, fmt) {
                return dt.with_timezone(&Utc);
            }
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(&text, fmt) {
                return Utc.from_utc_datetime(&naive);
            }
        }
    }
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relative_urls_resolve_against_rsi_domain() {
        assert_eq!(
            build_url("/comm-link/transmission/123"),
            "https://robertsspaceindustries.com/comm-link/transmission/123"
        );
        assert_eq!(build_url("https://elsewhere.example/x"), "https://elsewhere.example/x");
    }

    #[test]
    fn malformed_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let got = parse_datetime(&json!("not-a-date"));
        assert!(got >= before);
    }

    #[test]
    fn normalize_item_tags_include_channel() {
        let item = json!({"title": "4.0 Patch", "url": "/patch-notes/4-0", "published_at": "2024-05-01T12:00:00Z"});
        let signal = normalize_item(&item, "LIVE", Utc::now());
        assert!(signal.tags.contains(&"live".to_string()));
        assert_eq!(signal.source, "rsi.patch_notes.live");
    }
}
