// =============================================================================
// apexfeed — resilient market-data feed over a streaming HTTP event endpoint
// =============================================================================
//
// Pipeline: the streaming transport keeps one long-lived connection alive and
// decodes `event:`/`data:` frames; the subscription registry turns those
// frames into per-instrument trade ticks; the bar aggregator folds ticks into
// one-second OHLCV bars; the datafeed adapter exposes history plus live bars
// through the callback contract a charting widget expects.
// =============================================================================

pub mod aggregator;
pub mod apex;
pub mod datafeed;
pub mod error;
pub mod feed_config;
pub mod history;
pub mod session;
pub mod stream;
pub mod subscriptions;
pub mod types;

pub use aggregator::BarAggregator;
pub use apex::ApexClient;
pub use datafeed::Datafeed;
pub use error::FeedError;
pub use feed_config::FeedConfig;
pub use history::{BackfillBridge, HistoryPage};
pub use session::Session;
pub use stream::{EventStream, StreamState};
pub use subscriptions::SubscriptionRegistry;
pub use types::{Bar, GetBarsResult, HistoryRange, TradeTick};
