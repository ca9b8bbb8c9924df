// =============================================================================
// Backfill/Live Bridge — one-page history fetch that seeds live aggregation
// =============================================================================
//
// Serves the first history request for a chart load from the archive endpoint,
// maps the wire rows into typed bars, and seeds the instrument's aggregator
// from the final bar so the first live ticks continue it without a gap.
// Pagination requests (first_data_request unset) come back empty: only one
// page is ever served, deeper history is out of scope.
// =============================================================================

use std::sync::Arc;

use chrono::DateTime;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::aggregator::BarAggregator;
use crate::apex::ApexClient;
use crate::error::FeedError;
use crate::types::{Bar, HistoryRange};

/// One page of historical bars plus whether the archive may hold more.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub bars: Vec<Bar>,
    pub has_more: bool,
}

pub struct BackfillBridge {
    client: Arc<ApexClient>,
}

impl BackfillBridge {
    pub fn new(client: Arc<ApexClient>) -> Self {
        Self { client }
    }

    /// Serve one page of history for an instrument.
    ///
    /// Only the first request of a chart load (`first_data_request`) hits the
    /// archive; it also seeds `aggregator` from the last returned bar.
    /// Later pagination requests return an empty page with `has_more` unset.
    /// A malformed row fails the whole page: serving a partial page would
    /// leave silent holes in the chart.
    pub async fn fetch_history(
        &self,
        instrument: &str,
        range: &HistoryRange,
        first_data_request: bool,
        aggregator: &Mutex<BarAggregator>,
    ) -> Result<HistoryPage, FeedError> {
        if !first_data_request {
            debug!(instrument, "pagination request, serving empty page");
            return Ok(HistoryPage {
                bars: Vec::new(),
                has_more: false,
            });
        }

        // The charting range passes through to the archive untouched.
        let rows = self
            .client
            .fetch_history(instrument, range.from, range.to, range.count_back)
            .await?;

        let bars = rows
            .iter()
            .map(parse_history_row)
            .collect::<Result<Vec<Bar>, FeedError>>()
            .map_err(|err| FeedError::HistoryFetch(format!("malformed history row: {err}")))?;

        if let Some(last) = bars.last() {
            aggregator.lock().seed(last);
            debug!(last_time = last.time, "aggregator seeded from history");
        }

        let has_more = !bars.is_empty() && bars.len() as u32 >= range.count_back;
        info!(instrument, bars = bars.len(), has_more, "history page served");

        Ok(HistoryPage { bars, has_more })
    }
}

// ---------------------------------------------------------------------------
// Wire decoding
// ---------------------------------------------------------------------------

/// Validate one wire history row into the typed [`Bar`].
///
/// `time` arrives either as epoch milliseconds or as an ISO-8601 timestamp,
/// depending on the archive version. `ohlcv` is a five-element array in
/// open/high/low/close/volume order.
fn parse_history_row(row: &Value) -> Result<Bar, FeedError> {
    let time = match &row["time"] {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| FeedError::Parse("field time is not a valid i64".into()))?,
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map_err(|err| FeedError::Parse(format!("failed to parse time {s}: {err}")))?
            .timestamp_millis(),
        _ => return Err(FeedError::Parse("field time has unexpected JSON type".into())),
    };

    let ohlcv = row["ohlcv"]
        .as_array()
        .ok_or_else(|| FeedError::Parse("field ohlcv is not an array".into()))?;
    if ohlcv.len() < 5 {
        return Err(FeedError::Parse(format!(
            "field ohlcv has {} entries, expected 5",
            ohlcv.len()
        )));
    }

    Ok(Bar {
        time,
        open: parse_wire_f64(&ohlcv[0], "ohlcv[0]")?,
        high: parse_wire_f64(&ohlcv[1], "ohlcv[1]")?,
        low: parse_wire_f64(&ohlcv[2], "ohlcv[2]")?,
        close: parse_wire_f64(&ohlcv[3], "ohlcv[3]")?,
        volume: parse_wire_f64(&ohlcv[4], "ohlcv[4]")?,
    })
}

/// Helper: the archive serialises numeric values either as JSON numbers or
/// as strings.
fn parse_wire_f64(val: &Value, name: &str) -> Result<f64, FeedError> {
    match val {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| FeedError::Parse(format!("failed to parse {name} as f64: {s}"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FeedError::Parse(format!("field {name} is not a valid f64"))),
        _ => Err(FeedError::Parse(format!(
            "field {name} has unexpected JSON type"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bridge() -> BackfillBridge {
        BackfillBridge::new(Arc::new(ApexClient::new(
            "http://127.0.0.1:9",
            "test-key",
            Duration::from_secs(1),
        )))
    }

    #[test]
    fn history_row_with_epoch_millis_time() {
        let row: Value = serde_json::from_str(
            r#"{"time":1700000001000,"ohlcv":[1.0,2.0,0.5,1.5,42.0]}"#,
        )
        .unwrap();
        let bar = parse_history_row(&row).unwrap();
        assert_eq!(bar.time, 1_700_000_001_000);
        assert!((bar.open - 1.0).abs() < f64::EPSILON);
        assert!((bar.high - 2.0).abs() < f64::EPSILON);
        assert!((bar.low - 0.5).abs() < f64::EPSILON);
        assert!((bar.close - 1.5).abs() < f64::EPSILON);
        assert!((bar.volume - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn history_row_with_iso_time_and_string_numbers() {
        let row: Value = serde_json::from_str(
            r#"{"time":"2023-11-14T22:13:21Z","ohlcv":["1.0","2.0","0.5","1.5","42.0"]}"#,
        )
        .unwrap();
        let bar = parse_history_row(&row).unwrap();
        assert_eq!(bar.time, 1_700_000_001_000);
        assert!((bar.close - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn history_row_with_short_ohlcv_is_rejected() {
        let row: Value =
            serde_json::from_str(r#"{"time":1700000001000,"ohlcv":[1.0,2.0]}"#).unwrap();
        let err = parse_history_row(&row).unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }

    #[test]
    fn history_row_with_bad_time_is_rejected() {
        let row: Value =
            serde_json::from_str(r#"{"time":"yesterday","ohlcv":[1,2,0.5,1.5,42]}"#).unwrap();
        assert!(parse_history_row(&row).is_err());
    }

    #[tokio::test]
    async fn pagination_request_serves_empty_page_without_fetching() {
        // The client points at an unroutable address, so any fetch attempt
        // would error; an empty page proves no request was made.
        let bridge = bridge();
        let aggregator = Mutex::new(BarAggregator::new());
        let range = HistoryRange {
            from: 1_700_000_000,
            to: 1_700_000_300,
            count_back: 300,
        };

        let page = bridge
            .fetch_history("So1aaa", &range, false, &aggregator)
            .await
            .unwrap();
        assert!(page.bars.is_empty());
        assert!(!page.has_more);
        assert!(aggregator.lock().running_bar().is_none());
    }
}
