use std::time::Duration;

/// Builds the shared HTTP client ingest modules poll external sources with.
/// 20 second timeout and a descriptive User-Agent, matching the original
/// `httpx.AsyncClient` default factory.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent("Starlinker/0.1")
        .build()
}
