// =============================================================================
// Subscription Registry — per-instrument filter lifecycle over the stream
// =============================================================================
//
// The streaming endpoint only forwards events matching filters registered
// out-of-band, keyed by the client id issued in the `connected` handshake.
// The registry owns the authoritative set of desired subscriptions: before
// the handshake completes, subscribe calls queue here instead of failing,
// and every time a fresh client id is learned (first connect and every
// reconnect) the full set is replayed to the server.
//
// Registration failures are logged and not retried. The transport listener
// stays attached either way, so ticks the server still forwards are not
// dropped.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::apex::ApexClient;
use crate::error::FeedError;
use crate::session::Session;
use crate::stream::EventStream;
use crate::types::TradeTick;

/// Payload of the `connected` handshake frame.
#[derive(Debug, Deserialize)]
struct ConnectedPayload {
    #[serde(rename = "clientId")]
    client_id: String,
}

/// One desired subscription: the server-side filter string and the transport
/// listener delivering its events.
struct ActiveSubscription {
    filter: String,
    listener: Uuid,
}

/// Tracks which instrument feeds the caller wants live and keeps the
/// server-side filter registrations in sync with that set across reconnects.
pub struct SubscriptionRegistry {
    client: Arc<ApexClient>,
    session: Arc<Session>,
    stream: EventStream,
    active: Arc<RwLock<HashMap<Uuid, ActiveSubscription>>>,
}

impl SubscriptionRegistry {
    /// Build the registry and attach its `connected` handshake listener to
    /// the stream.
    pub fn new(client: Arc<ApexClient>, session: Arc<Session>, stream: EventStream) -> Self {
        let active: Arc<RwLock<HashMap<Uuid, ActiveSubscription>>> =
            Arc::new(RwLock::new(HashMap::new()));

        {
            let client = client.clone();
            let session = session.clone();
            let active = active.clone();
            stream.add_listener("connected", move |data| {
                let payload: ConnectedPayload = match serde_json::from_str(data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(error = %err, raw = data, "malformed connected payload — dropping");
                        return;
                    }
                };
                info!(client_id = %payload.client_id, "handshake complete");
                session.set_client_id(payload.client_id.clone());

                // A fresh connection means the server has forgotten every
                // filter; replay the whole desired set.
                let filters = collect_filters(&active);
                if filters.is_empty() {
                    return;
                }
                let client = client.clone();
                tokio::spawn(async move {
                    info!(count = filters.len(), "replaying subscription filters");
                    if let Err(err) = client.register_filters(&payload.client_id, &filters).await {
                        warn!(error = %err, "filter replay failed");
                    }
                });
            });
        }

        Self {
            client,
            session,
            stream,
            active,
        }
    }

    /// Open a live tick feed for one instrument. The returned handle removes
    /// exactly this subscription.
    ///
    /// The wire payload for the instrument's event is a JSON array of tick
    /// records; `on_tick` runs once per record, in array order. Malformed
    /// records are dropped.
    pub fn subscribe(
        &self,
        instrument: &str,
        on_tick: impl Fn(TradeTick) + Send + Sync + 'static,
    ) -> Uuid {
        let filter = format!("transaction:{instrument}");

        let listener = self.stream.add_listener(filter.clone(), move |data| {
            for tick in parse_tick_batch(data) {
                on_tick(tick);
            }
        });

        let handle = Uuid::new_v4();
        self.active.write().insert(
            handle,
            ActiveSubscription {
                filter: filter.clone(),
                listener,
            },
        );
        info!(filter = %filter, active = self.active.read().len(), "subscription added");

        match self.session.client_id() {
            Some(client_id) => {
                let client = self.client.clone();
                let filters = vec![filter];
                tokio::spawn(async move {
                    if let Err(err) = client.register_filters(&client_id, &filters).await {
                        warn!(error = %err, "filter registration failed");
                    }
                });
            }
            // No client id yet: the entry stays queued in `active` and the
            // handshake listener replays it.
            None => debug!(filter = %filter, "handshake pending, filter queued"),
        }

        handle
    }

    /// Drop a subscription: detach the transport listener, then best-effort
    /// clear the server-side filters. Once this returns the tick callback is
    /// not invoked again, even if a delivery was in flight on the stream
    /// task. Clearing failures are logged only, since listener removal
    /// already stops local delivery.
    pub fn unsubscribe(&self, handle: Uuid) {
        let Some(sub) = self.active.write().remove(&handle) else {
            warn!(%handle, "unsubscribe for unknown handle");
            return;
        };
        self.stream.remove_listener(&sub.filter, sub.listener);
        info!(filter = %sub.filter, active = self.active.read().len(), "subscription removed");

        // Nothing is registered server-side before the handshake.
        if let Some(client_id) = self.session.client_id() {
            let client = self.client.clone();
            tokio::spawn(async move {
                if let Err(err) = client.clear_filters(&client_id).await {
                    warn!(error = %err, "filter clear failed");
                }
            });
        }
    }

    /// Deduplicated set of filters the registry currently wants active.
    pub fn desired_filters(&self) -> Vec<String> {
        collect_filters(&self.active)
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }
}

fn collect_filters(active: &RwLock<HashMap<Uuid, ActiveSubscription>>) -> Vec<String> {
    let mut filters: Vec<String> = active.read().values().map(|s| s.filter.clone()).collect();
    filters.sort();
    filters.dedup();
    filters
}

// ---------------------------------------------------------------------------
// Wire decoding
// ---------------------------------------------------------------------------

/// Decode one instrument event payload (a JSON array of tick records).
/// Records that fail validation are dropped with a warning; the rest of the
/// batch is still delivered.
fn parse_tick_batch(data: &str) -> Vec<TradeTick> {
    let records = match serde_json::from_str::<Value>(data) {
        Ok(Value::Array(records)) => records,
        Ok(_) => {
            warn!(raw = data, "tick payload is not an array — dropping");
            return Vec::new();
        }
        Err(err) => {
            warn!(error = %err, "undecodable tick payload — dropping");
            return Vec::new();
        }
    };

    records
        .iter()
        .filter_map(|record| match parse_tick(record) {
            Ok(tick) => Some(tick),
            Err(err) => {
                warn!(error = %err, "dropping tick record");
                None
            }
        })
        .collect()
}

/// Validate one wire tick record into the typed [`TradeTick`].
fn parse_tick(record: &Value) -> Result<TradeTick, FeedError> {
    let tx = record
        .get("tx")
        .and_then(Value::as_str)
        .ok_or_else(|| FeedError::Parse("tick record missing tx".into()))?
        .to_string();
    let price = json_f64(record.get("priceUsd"))
        .ok_or_else(|| FeedError::Parse(format!("tick {tx} has no usable priceUsd")))?;
    let volume = json_f64(record.get("volume"))
        .ok_or_else(|| FeedError::Parse(format!("tick {tx} has no usable volume")))?;
    let time_ms = record
        .get("time")
        .and_then(Value::as_i64)
        .ok_or_else(|| FeedError::Parse(format!("tick {tx} has no usable time")))?;

    Ok(TradeTick {
        tx,
        price,
        volume,
        time_ms,
    })
}

/// Accept a JSON number or a numeric string. The upstream serialisers are
/// not consistent about which they emit.
fn json_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
