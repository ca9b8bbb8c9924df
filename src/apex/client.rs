// =============================================================================
// Apex HTTP Client — streaming GET, filter management, history archive
// =============================================================================
//
// SECURITY: The API key is sent as the `x-api-key` header on every request
// and is never logged or serialized.
//
// Two underlying reqwest clients are held: `http` carries the request timeout
// for filter/history calls, while `stream_http` has only a connect timeout —
// the streaming GET stays open indefinitely and must not be cut off by a
// total-request timeout.
// =============================================================================

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, instrument};

use crate::error::FeedError;

/// HTTP client for the event/history service.
#[derive(Clone)]
pub struct ApexClient {
    base_url: String,
    http: reqwest::Client,
    stream_http: reqwest::Client,
}

impl ApexClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `ApexClient`.
    ///
    /// # Arguments
    /// * `base_url` — service root, e.g. `https://api.launchapex.io`; a
    ///   trailing slash is tolerated.
    /// * `api_key`  — static key sent as the `x-api-key` header.
    /// * `timeout`  — total-request timeout for filter and history calls.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("x-api-key", val);
        }

        let http = reqwest::Client::builder()
            .default_headers(default_headers.clone())
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");

        let stream_http = reqwest::Client::builder()
            .default_headers(default_headers)
            .connect_timeout(timeout)
            .build()
            .expect("failed to build streaming reqwest client");

        debug!(base_url = %base_url, "ApexClient initialised");

        Self {
            base_url,
            http,
            stream_http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -------------------------------------------------------------------------
    // Event stream
    // -------------------------------------------------------------------------

    /// GET /v1/events — open the long-lived event stream.
    ///
    /// Returns the raw response; the caller checks the status and consumes the
    /// body chunk-wise.
    #[instrument(skip(self), name = "apex::open_stream")]
    pub async fn open_stream(&self) -> Result<reqwest::Response, FeedError> {
        let url = format!("{}/v1/events", self.base_url);
        debug!(url = %url, "opening event stream");

        self.stream_http
            .get(&url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| FeedError::Transport(format!("GET /v1/events failed: {e}")))
    }

    // -------------------------------------------------------------------------
    // Filter management
    // -------------------------------------------------------------------------

    /// POST /v1/events/filter/{client_id} — register server-side event filters
    /// for this session.
    #[instrument(skip(self, filters), name = "apex::register_filters")]
    pub async fn register_filters(
        &self,
        client_id: &str,
        filters: &[String],
    ) -> Result<(), FeedError> {
        let url = format!("{}/v1/events/filter/{}", self.base_url, client_id);

        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "filters": filters }))
            .send()
            .await
            .map_err(|e| FeedError::Subscription(format!("POST filter request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Subscription(format!(
                "filter endpoint returned {status}: {body}"
            )));
        }

        debug!(count = filters.len(), "filters registered");
        Ok(())
    }

    /// GET /v1/events/filter/clear/{client_id} — drop every filter registered
    /// for this session.
    #[instrument(skip(self), name = "apex::clear_filters")]
    pub async fn clear_filters(&self, client_id: &str) -> Result<(), FeedError> {
        let url = format!("{}/v1/events/filter/clear/{}", self.base_url, client_id);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Subscription(format!("filter clear request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Subscription(format!(
                "filter clear endpoint returned {status}: {body}"
            )));
        }

        debug!("filters cleared");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // History archive
    // -------------------------------------------------------------------------

    /// GET /v1/chart/history/{address} — fetch one page of historical bars.
    ///
    /// Returns the raw JSON rows; the backfill bridge maps them to [`Bar`]
    /// values (the wire shape is `{ time, ohlcv: [o, h, l, c, v] }`).
    ///
    /// [`Bar`]: crate::types::Bar
    #[instrument(skip(self), name = "apex::fetch_history")]
    pub async fn fetch_history(
        &self,
        address: &str,
        start: i64,
        end: i64,
        limit: u32,
    ) -> Result<Vec<serde_json::Value>, FeedError> {
        let url = format!(
            "{}/v1/chart/history/{}?start={}&end={}&limit={}",
            self.base_url, address, start, end, limit
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::HistoryFetch(format!("GET /v1/chart/history failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::HistoryFetch(format!(
                "history endpoint returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FeedError::HistoryFetch(format!("failed to decode history response: {e}")))?;

        let rows = body
            .as_array()
            .cloned()
            .ok_or_else(|| FeedError::HistoryFetch("history response is not an array".into()))?;

        debug!(address, count = rows.len(), "history page fetched");
        Ok(rows)
    }
}

impl std::fmt::Debug for ApexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApexClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let client = ApexClient::new("http://localhost:9/", "k", Duration::from_secs(1));
        assert_eq!(client.base_url(), "http://localhost:9");
    }

    #[test]
    fn debug_output_omits_api_key() {
        let client = ApexClient::new("http://localhost:9", "super-secret", Duration::from_secs(1));
        let out = format!("{client:?}");
        assert!(!out.contains("super-secret"));
    }
}
