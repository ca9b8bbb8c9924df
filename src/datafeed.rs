// =============================================================================
// Datafeed Adapter — the callback contract consumed by the charting widget
// =============================================================================
//
// Thin shaping layer over the registry and the backfill bridge. The widget
// drives it through six operations: configure, search, resolve, history and
// live subscribe/unsubscribe. The adapter keeps the per-address symbol
// descriptor cache plus the per-instrument aggregator handoff shared between
// the history seed path and the live tick path; everything else delegates.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::aggregator::BarAggregator;
use crate::error::FeedError;
use crate::feed_config::FeedConfig;
use crate::history::BackfillBridge;
use crate::subscriptions::SubscriptionRegistry;
use crate::types::{
    Bar, DatafeedConfiguration, GetBarsResult, HistoryRange, SymbolDescriptor, SymbolSearchResult,
};

/// Resolutions reported in the `configure()` capability payload.
const CONFIG_RESOLUTIONS: [&str; 3] = ["1S", "1", "60"];
/// Resolutions advertised per resolved symbol.
const SYMBOL_RESOLUTIONS: [&str; 5] = ["1S", "1", "60", "1D", "1W"];

pub struct Datafeed {
    address: String,
    ticker: String,
    description: String,
    exchange: String,
    pricescale: u64,
    registry: Arc<SubscriptionRegistry>,
    bridge: BackfillBridge,
    descriptors: RwLock<HashMap<String, Arc<SymbolDescriptor>>>,
    aggregators: RwLock<HashMap<String, Arc<Mutex<BarAggregator>>>>,
}

impl Datafeed {
    pub fn new(
        config: &FeedConfig,
        registry: Arc<SubscriptionRegistry>,
        bridge: BackfillBridge,
    ) -> Self {
        Self {
            address: config.token_address.clone(),
            ticker: config.ticker.clone(),
            description: config.symbol_description.clone(),
            exchange: config.exchange.clone(),
            pricescale: config.pricescale,
            registry,
            bridge,
            descriptors: RwLock::new(HashMap::new()),
            aggregators: RwLock::new(HashMap::new()),
        }
    }

    /// Static capability payload handed to the widget on ready.
    pub fn configure(&self) -> DatafeedConfiguration {
        DatafeedConfiguration {
            supported_resolutions: CONFIG_RESOLUTIONS.iter().map(|s| s.to_string()).collect(),
            currency_codes: vec!["USD".to_string()],
            supports_search: true,
            has_seconds: true,
            enabled_features: vec!["seconds_resolution".to_string()],
        }
    }

    /// Symbol search across the configured instrument. The feed serves one
    /// instrument, so the result list has at most that entry.
    pub fn search_symbols(
        &self,
        user_input: &str,
        _exchange: &str,
        _symbol_type: &str,
    ) -> Vec<SymbolSearchResult> {
        debug!(user_input, "symbol search");
        vec![SymbolSearchResult {
            symbol: self.address.clone(),
            full_name: self.ticker.clone(),
            description: self.description.clone(),
            exchange: self.exchange.clone(),
            ticker: self.ticker.clone(),
            symbol_type: "crypto".to_string(),
        }]
    }

    /// Resolve symbol metadata for an instrument address. Descriptors are
    /// immutable and cached per address.
    pub fn resolve_symbol(&self, address: &str) -> Arc<SymbolDescriptor> {
        if let Some(descriptor) = self.descriptors.read().get(address) {
            return descriptor.clone();
        }

        let descriptor = Arc::new(SymbolDescriptor {
            ticker: self.ticker.clone(),
            name: address.to_string(),
            description: self.description.clone(),
            symbol_type: "crypto".to_string(),
            session: "24x7".to_string(),
            timezone: "Etc/UTC".to_string(),
            exchange: self.exchange.clone(),
            minmov: 1,
            pricescale: self.pricescale,
            has_seconds: true,
            has_intraday: true,
            visible_plots_set: "ohlcv".to_string(),
            has_weekly_and_monthly: false,
            supported_resolutions: SYMBOL_RESOLUTIONS.iter().map(|s| s.to_string()).collect(),
            volume_precision: 2,
            data_status: "streaming".to_string(),
        });
        self.descriptors
            .write()
            .insert(address.to_string(), descriptor.clone());
        info!(address, ticker = %self.ticker, "symbol resolved");
        descriptor
    }

    /// Open a live bar feed: ticks for the instrument flow through its
    /// aggregator and every closed bar reaches `on_bar`.
    pub fn subscribe_bars(
        &self,
        address: &str,
        on_bar: impl Fn(Bar) + Send + Sync + 'static,
    ) -> Uuid {
        let aggregator = self.aggregator_for(address);
        let handle = self.registry.subscribe(address, move |tick| {
            if let Some(bar) = aggregator.lock().ingest(&tick) {
                on_bar(bar);
            }
        });
        info!(address, %handle, "bar subscription opened");
        handle
    }

    /// Tear down a live bar feed. The instrument's aggregation state stays
    /// put, so a later re-subscribe continues the same running bar.
    pub fn unsubscribe_bars(&self, handle: Uuid) {
        self.registry.unsubscribe(handle);
    }

    /// Fetch one page of history for the widget, seeding live aggregation on
    /// the first request of a chart load.
    #[instrument(skip(self), name = "datafeed::get_bars")]
    pub async fn get_bars(
        &self,
        address: &str,
        range: &HistoryRange,
        first_data_request: bool,
    ) -> Result<GetBarsResult, FeedError> {
        let aggregator = self.aggregator_for(address);
        let page = self
            .bridge
            .fetch_history(address, range, first_data_request, &aggregator)
            .await?;

        let no_data = page.bars.is_empty();
        Ok(GetBarsResult {
            bars: page.bars,
            no_data,
        })
    }

    /// Shared per-instrument aggregator, created on first use. Both the
    /// history seed path and the live tick path must hit the same instance.
    fn aggregator_for(&self, address: &str) -> Arc<Mutex<BarAggregator>> {
        self.aggregators
            .write()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BarAggregator::new())))
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apex::ApexClient;
    use crate::session::Session;
    use crate::stream::{EventStream, Frame};
    use std::time::Duration;

    fn harness() -> (Datafeed, EventStream) {
        let config = FeedConfig {
            token_address: "So1aaa".to_string(),
            ..FeedConfig::default()
        };
        let client = Arc::new(ApexClient::new(
            "http://127.0.0.1:9",
            "test-key",
            Duration::from_secs(1),
        ));
        let session = Arc::new(Session::new());
        let stream = EventStream::new(client.clone(), session.clone(), Duration::from_millis(50));
        let registry = Arc::new(SubscriptionRegistry::new(
            client.clone(),
            session,
            stream.clone(),
        ));
        let datafeed = Datafeed::new(&config, registry, BackfillBridge::new(client));
        (datafeed, stream)
    }

    fn frame(event: &str, data: &str) -> Frame {
        Frame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn configure_reports_seconds_support() {
        let (datafeed, _stream) = harness();
        let config = datafeed.configure();
        assert_eq!(config.supported_resolutions, vec!["1S", "1", "60"]);
        assert_eq!(config.currency_codes, vec!["USD"]);
        assert!(config.supports_search);
        assert!(config.has_seconds);
        assert_eq!(config.enabled_features, vec!["seconds_resolution"]);
    }

    #[test]
    fn search_returns_the_configured_instrument() {
        let (datafeed, _stream) = harness();
        let results = datafeed.search_symbols("ap", "", "");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol, "So1aaa");
        assert_eq!(results[0].ticker, "APEX");
        assert_eq!(results[0].symbol_type, "crypto");
    }

    #[test]
    fn resolve_symbol_is_cached_per_address() {
        let (datafeed, _stream) = harness();
        let first = datafeed.resolve_symbol("So1aaa");
        let second = datafeed.resolve_symbol("So1aaa");
        assert!(Arc::ptr_eq(&first, &second));

        assert_eq!(first.name, "So1aaa");
        assert_eq!(first.ticker, "APEX");
        assert_eq!(first.pricescale, 1_000_000_000);
        assert_eq!(first.session, "24x7");
        assert_eq!(
            first.supported_resolutions,
            vec!["1S", "1", "60", "1D", "1W"]
        );
    }

    #[test]
    fn live_ticks_become_closed_bars() {
        let (datafeed, stream) = harness();
        let bars: Arc<Mutex<Vec<Bar>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = bars.clone();
        datafeed.subscribe_bars("So1aaa", move |bar| sink.lock().push(bar));

        stream.deliver(&frame(
            "transaction:So1aaa",
            r#"[
                {"tx":"t1","priceUsd":10.0,"volume":2.0,"time":1000},
                {"tx":"t2","priceUsd":12.0,"volume":3.0,"time":1999},
                {"tx":"t3","priceUsd":9.0,"volume":1.0,"time":2000}
            ]"#,
        ));

        let got = bars.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].time, 1_000);
        assert!((got[0].open - 10.0).abs() < f64::EPSILON);
        assert!((got[0].high - 12.0).abs() < f64::EPSILON);
        assert!((got[0].low - 10.0).abs() < f64::EPSILON);
        assert!((got[0].close - 12.0).abs() < f64::EPSILON);
        assert!((got[0].volume - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unsubscribe_stops_bar_delivery_but_keeps_state() {
        let (datafeed, stream) = harness();
        let bars: Arc<Mutex<Vec<Bar>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = bars.clone();
        let handle = datafeed.subscribe_bars("So1aaa", move |bar| sink.lock().push(bar));

        stream.deliver(&frame(
            "transaction:So1aaa",
            r#"[{"tx":"t1","priceUsd":10.0,"volume":2.0,"time":1000}]"#,
        ));
        datafeed.unsubscribe_bars(handle);
        stream.deliver(&frame(
            "transaction:So1aaa",
            r#"[{"tx":"t2","priceUsd":12.0,"volume":1.0,"time":2000}]"#,
        ));
        assert!(bars.lock().is_empty());

        // Re-subscribing picks the running bar back up: the next rollover
        // closes the bar opened before the unsubscribe.
        let sink = bars.clone();
        datafeed.subscribe_bars("So1aaa", move |bar| sink.lock().push(bar));
        stream.deliver(&frame(
            "transaction:So1aaa",
            r#"[{"tx":"t3","priceUsd":11.0,"volume":1.0,"time":3000}]"#,
        ));

        let got = bars.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].time, 1_000);
        assert!((got[0].close - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn pagination_get_bars_reports_no_data() {
        let (datafeed, _stream) = harness();
        let range = HistoryRange {
            from: 1_700_000_000,
            to: 1_700_000_300,
            count_back: 300,
        };
        let result = datafeed.get_bars("So1aaa", &range, false).await.unwrap();
        assert!(result.bars.is_empty());
        assert!(result.no_data);
    }
}
