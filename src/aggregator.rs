// =============================================================================
// Bar Aggregator — tick to one-second OHLCV bars with bounded dedup
// =============================================================================
//
// Pure per-instrument state machine. Ticks arrive in delivery order; a bar is
// emitted strictly when the bucket-second rolls over, never on a timer, so a
// quiet instrument emits nothing and the in-progress second stays provisional
// until a later tick supersedes it.
//
// Duplicate deliveries are discarded by transaction id. The dedup cache is
// bounded: once an insertion pushes it past DEDUP_CACHE_LIMIT the whole cache
// is cleared (the triggering id included). A tick replayed right after a
// clear can therefore re-aggregate; that imprecision is the accepted cost of
// the bounding policy.
// =============================================================================

use std::collections::HashSet;

use tracing::debug;

use crate::types::{Bar, TradeTick};

/// Dedup cache bound. The clear fires when an insertion pushes the cache
/// past this size.
pub const DEDUP_CACHE_LIMIT: usize = 300;

/// In-progress aggregation state for the current bucket-second.
#[derive(Debug, Clone)]
struct RunningBar {
    bucket_second: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl RunningBar {
    fn from_tick(tick: &TradeTick, bucket_second: i64) -> Self {
        Self {
            bucket_second,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
        }
    }

    fn snapshot(&self) -> Bar {
        Bar {
            time: self.bucket_second * 1000,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Aggregates trade ticks for one instrument into one-second OHLCV bars.
#[derive(Debug, Default)]
pub struct BarAggregator {
    dedup: HashSet<String>,
    running: Option<RunningBar>,
}

impl BarAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one tick. Returns the finalized bar when this tick's
    /// bucket-second differs from the running bar's, `None` otherwise.
    pub fn ingest(&mut self, tick: &TradeTick) -> Option<Bar> {
        // Duplicate delivery is a no-op.
        if self.dedup.contains(&tick.tx) {
            return None;
        }

        self.dedup.insert(tick.tx.clone());
        if self.dedup.len() > DEDUP_CACHE_LIMIT {
            debug!(size = self.dedup.len(), "dedup cache bound exceeded, clearing");
            self.dedup.clear();
        }

        let current_second = tick.time_ms.div_euclid(1000);

        match self.running.as_mut() {
            // First tick ever: seed the running bar, emit nothing.
            None => {
                self.running = Some(RunningBar::from_tick(tick, current_second));
                None
            }
            // Bucket rollover: finalize the old bar, start the new one.
            Some(running) if running.bucket_second != current_second => {
                let closed = running.snapshot();
                *running = RunningBar::from_tick(tick, current_second);
                Some(closed)
            }
            // Same second: fold the tick in.
            Some(running) => {
                running.high = running.high.max(tick.price);
                running.low = running.low.min(tick.price);
                running.close = tick.price;
                running.volume += tick.volume;
                None
            }
        }
    }

    /// Initialize the running bar from the last historical bar so the first
    /// live ticks continue it instead of opening a gap.
    pub fn seed(&mut self, last: &Bar) {
        self.running = Some(RunningBar {
            bucket_second: last.time.div_euclid(1000),
            open: last.open,
            high: last.high,
            low: last.low,
            close: last.close,
            volume: last.volume,
        });
    }

    /// Read-only snapshot of the in-progress bar, if any. Provisional: its
    /// bucket-second has not closed yet.
    pub fn running_bar(&self) -> Option<Bar> {
        self.running.as_ref().map(RunningBar::snapshot)
    }

    /// Number of transaction ids currently held in the dedup cache.
    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
