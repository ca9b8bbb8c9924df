// =============================================================================
// Shared types used across the apexfeed pipeline
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single trade event decoded from the live stream.
///
/// `tx` is the transaction signature and doubles as the dedup key; `time_ms`
/// is the exchange-side timestamp in milliseconds.
#[derive(Debug, Clone)]
pub struct TradeTick {
    pub tx: String,
    pub price: f64,
    pub volume: f64,
    pub time_ms: i64,
}

/// An emitted OHLCV bar at one-second granularity.
///
/// `time` is the start of the bucket-second in milliseconds. Bars for one
/// instrument are emitted in non-decreasing `time` order, and a bar is only
/// emitted once its bucket-second has fully closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Time range for a history request. `from`/`to` are epoch seconds as sent by
/// the charting widget; `count_back` caps the number of bars returned.
#[derive(Debug, Clone, Copy)]
pub struct HistoryRange {
    pub from: i64,
    pub to: i64,
    pub count_back: u32,
}

/// Result of a `get_bars` call: the mapped bars plus the no-data flag the
/// charting contract expects when the page is empty.
#[derive(Debug, Clone)]
pub struct GetBarsResult {
    pub bars: Vec<Bar>,
    pub no_data: bool,
}

/// Static capabilities reported by `configure()` (the charting widget's
/// `onReady` payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatafeedConfiguration {
    pub supported_resolutions: Vec<String>,
    pub currency_codes: Vec<String>,
    pub supports_search: bool,
    pub has_seconds: bool,
    pub enabled_features: Vec<String>,
}

/// One entry returned by `search_symbols`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSearchResult {
    pub symbol: String,
    pub full_name: String,
    pub description: String,
    pub exchange: String,
    pub ticker: String,
    #[serde(rename = "type")]
    pub symbol_type: String,
}

/// Immutable symbol metadata resolved once per instrument address.
///
/// Field names follow the charting datafeed contract, hence the serde rename
/// on `symbol_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolDescriptor {
    pub ticker: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub symbol_type: String,
    pub session: String,
    pub timezone: String,
    pub exchange: String,
    pub minmov: u32,
    pub pricescale: u64,
    pub has_seconds: bool,
    pub has_intraday: bool,
    pub visible_plots_set: String,
    pub has_weekly_and_monthly: bool,
    pub supported_resolutions: Vec<String>,
    pub volume_precision: u32,
    pub data_status: String,
}
