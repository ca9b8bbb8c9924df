// =============================================================================
// apexfeed — Main Entry Point
// =============================================================================
//
// Demo wiring for the feed pipeline: connect the event stream, resolve the
// configured instrument, pull one page of history, then log every closed
// one-second bar until Ctrl+C.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use apexfeed::{
    ApexClient, BackfillBridge, Datafeed, EventStream, FeedConfig, HistoryRange, Session,
    SubscriptionRegistry,
};

const CONFIG_PATH: &str = "feed_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║                 apexfeed — Starting Up                   ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = FeedConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        let config = FeedConfig::default();
        // Leave a template behind so the operator has something to edit.
        if let Err(e) = config.save(CONFIG_PATH) {
            error!(error = %e, "Failed to write default config template");
        }
        config
    });

    // Override endpoint and instrument from env if available.
    if let Ok(url) = std::env::var("APEX_BASE_URL") {
        config.base_url = url;
    }
    if let Ok(key) = std::env::var("APEX_API_KEY") {
        config.api_key = key;
    }
    if let Ok(addr) = std::env::var("APEX_TOKEN_ADDRESS") {
        config.token_address = addr;
    }
    if config.token_address.is_empty() {
        anyhow::bail!(
            "no instrument configured: set token_address in {CONFIG_PATH} or APEX_TOKEN_ADDRESS"
        );
    }

    info!(
        base_url = %config.base_url,
        token = %config.token_address,
        ticker = %config.ticker,
        "Configured instrument"
    );

    // ── 2. Build the pipeline ────────────────────────────────────────────
    let client = Arc::new(ApexClient::new(
        &config.base_url,
        &config.api_key,
        Duration::from_secs(config.request_timeout_secs),
    ));
    let session = Arc::new(Session::new());
    let stream = EventStream::new(
        client.clone(),
        session.clone(),
        Duration::from_millis(config.retry_delay_ms),
    );
    let registry = Arc::new(SubscriptionRegistry::new(
        client.clone(),
        session.clone(),
        stream.clone(),
    ));
    let datafeed = Datafeed::new(&config, registry, BackfillBridge::new(client));

    // ── 3. Connect and wait for the handshake ────────────────────────────
    stream.connect();

    match tokio::time::timeout(Duration::from_secs(30), session.wait_ready()).await {
        Ok(client_id) => info!(client_id = %client_id, "Stream handshake complete"),
        Err(_) => warn!("No handshake within 30s — filters will replay once it lands"),
    }

    // ── 4. Resolve the instrument and backfill one history page ──────────
    let descriptor = datafeed.resolve_symbol(&config.token_address);
    info!(
        ticker = %descriptor.ticker,
        description = %descriptor.description,
        exchange = %descriptor.exchange,
        "Symbol resolved"
    );

    let now = chrono::Utc::now().timestamp();
    let range = HistoryRange {
        from: now - 3600,
        to: now,
        count_back: config.history_limit,
    };
    match datafeed.get_bars(&config.token_address, &range, true).await {
        Ok(result) => {
            info!(
                bars = result.bars.len(),
                no_data = result.no_data,
                "History backfill complete"
            );
            if let Some(last) = result.bars.last() {
                info!(time = last.time, close = last.close, "Last historical bar");
            }
        }
        Err(e) => error!(error = %e, "History fetch failed — continuing with live data only"),
    }

    // ── 5. Live bars ─────────────────────────────────────────────────────
    let handle = datafeed.subscribe_bars(&config.token_address, |bar| {
        info!(
            time = bar.time,
            open = bar.open,
            high = bar.high,
            low = bar.low,
            close = bar.close,
            volume = bar.volume,
            "bar closed"
        );
    });

    info!("Feed running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    datafeed.unsubscribe_bars(handle);
    stream.close();

    info!("apexfeed shut down complete.");
    Ok(())
}
