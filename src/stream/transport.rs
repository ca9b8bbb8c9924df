// =============================================================================
// Streaming Transport — one logical connection with automatic reconnect
// =============================================================================
//
// Owns the long-lived streaming GET against the event endpoint. Response
// chunks feed an incremental frame parser and decoded frames are dispatched
// synchronously, in arrival order, to the registered listeners.
//
// Lifecycle: Connecting -> Open -> (ClosedRetrying <-> Connecting) ->
// ClosedFinal. Every failure (non-success status, read error, server close)
// notifies `on_error` exactly once and schedules a reconnect after a fixed
// retry delay. Only an explicit `close()` is final.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::apex::ApexClient;
use crate::error::FeedError;
use crate::session::Session;
use crate::stream::frame::{Frame, FrameParser, DEFAULT_EVENT};

/// Callback invoked with a frame's data payload.
pub type FrameHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Lifecycle state of the logical stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Open,
    ClosedRetrying,
    ClosedFinal,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::ClosedRetrying => write!(f, "ClosedRetrying"),
            Self::ClosedFinal => write!(f, "ClosedFinal"),
        }
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Reconnecting event-stream connection.
///
/// Cheap to clone; clones share the same underlying connection.
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    client: Arc<ApexClient>,
    session: Arc<Session>,
    retry_delay: Duration,
    state: RwLock<StreamState>,
    listeners: RwLock<HashMap<String, Vec<(Uuid, FrameHandler)>>>,
    on_message: RwLock<Option<FrameHandler>>,
    on_open: RwLock<Option<Arc<dyn Fn() + Send + Sync>>>,
    on_error: RwLock<Option<Arc<dyn Fn(&FeedError) + Send + Sync>>>,
    closed: AtomicBool,
    /// Serialises callback delivery against `close()` and listener removal:
    /// both wait here, so no callback runs after either returns. `delivering`
    /// names the thread currently inside a delivery section, so close and
    /// removal issued from inside a callback skip the wait instead of
    /// deadlocking on the non-reentrant gate.
    callback_gate: Mutex<()>,
    delivering: RwLock<Option<ThreadId>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Token for one callback delivery section: holds the gate and names the
/// delivering thread, clearing the name again before the gate is released.
struct DeliveryGuard<'a> {
    inner: &'a StreamInner,
    _gate: MutexGuard<'a, ()>,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        *self.inner.delivering.write() = None;
    }
}

impl EventStream {
    pub fn new(client: Arc<ApexClient>, session: Arc<Session>, retry_delay: Duration) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                client,
                session,
                retry_delay,
                state: RwLock::new(StreamState::Connecting),
                listeners: RwLock::new(HashMap::new()),
                on_message: RwLock::new(None),
                on_open: RwLock::new(None),
                on_error: RwLock::new(None),
                closed: AtomicBool::new(false),
                callback_gate: Mutex::new(()),
                delivering: RwLock::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.inner.state.read()
    }

    // -------------------------------------------------------------------------
    // Handlers & listeners
    // -------------------------------------------------------------------------

    /// Default handler for frames with the `"message"` event name.
    pub fn set_on_message(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.on_message.write() = Some(Arc::new(handler));
    }

    /// Notification fired exactly once per successful connection.
    pub fn set_on_open(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_open.write() = Some(Arc::new(handler));
    }

    /// Notification fired exactly once per failed connection, just before a
    /// reconnect is scheduled.
    pub fn set_on_error(&self, handler: impl Fn(&FeedError) + Send + Sync + 'static) {
        *self.inner.on_error.write() = Some(Arc::new(handler));
    }

    /// Register a callback for frames with the given event name. Multiple
    /// callbacks may be registered per name; the returned id removes this one.
    pub fn add_listener(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.inner
            .listeners
            .write()
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a single listener previously returned by [`add_listener`]. The
    /// callback is not invoked again after this returns: removal waits out a
    /// delivery in flight on another thread, and a removal from inside a
    /// callback takes effect for the rest of the current batch.
    ///
    /// [`add_listener`]: EventStream::add_listener
    pub fn remove_listener(&self, event: &str, id: Uuid) {
        // Holding the gate across the removal means no batch is mid-delivery
        // while the entry disappears. On the delivering thread the gate is
        // already held; the dispatch loop re-checks liveness instead.
        let _gate = if self.inner.on_delivery_thread() {
            None
        } else {
            Some(self.inner.callback_gate.lock())
        };
        let mut listeners = self.inner.listeners.write();
        if let Some(entries) = listeners.get_mut(event) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                listeners.remove(event);
            }
        }
    }

    /// Number of listeners registered for an event name.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .listeners
            .read()
            .get(event)
            .map_or(0, Vec::len)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the connection task. Does nothing if already started or closed.
    pub fn connect(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() || self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run_loop(inner)));
    }

    /// Tear the stream down for good: cancel any pending reconnect, abort the
    /// live request and transition to `ClosedFinal`. Idempotent, and no
    /// callback is invoked after this returns. Safe to call from inside a
    /// frame or error callback; the rest of that delivery is skipped.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // From another thread, let any in-flight delivery finish before we
        // report closed. On the delivering thread the gate is already held
        // and the per-callback closed check silences the rest of the batch.
        if !self.inner.on_delivery_thread() {
            drop(self.inner.callback_gate.lock());
        }
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        *self.inner.state.write() = StreamState::ClosedFinal;
        self.inner.session.clear();
        info!("event stream closed");
    }

    #[cfg(test)]
    pub(crate) fn deliver(&self, frame: &Frame) {
        self.inner.dispatch(frame);
    }
}

impl StreamInner {
    fn set_state(&self, next: StreamState) {
        *self.state.write() = next;
        debug!(state = %next, "stream state");
    }

    /// Take the callback gate and record this thread as the delivering one.
    fn enter_delivery(&self) -> DeliveryGuard<'_> {
        let gate = self.callback_gate.lock();
        *self.delivering.write() = Some(thread::current().id());
        DeliveryGuard { inner: self, _gate: gate }
    }

    fn on_delivery_thread(&self) -> bool {
        *self.delivering.read() == Some(thread::current().id())
    }

    fn listener_alive(&self, event: &str, id: Uuid) -> bool {
        self.listeners
            .read()
            .get(event)
            .map_or(false, |entries| entries.iter().any(|(entry_id, _)| *entry_id == id))
    }

    /// Hand a decoded frame to the default handler (for `"message"`) and to
    /// every listener registered under its exact event name. Handler clones
    /// are collected first so callbacks may add or remove listeners freely;
    /// each entry is re-checked against the live table just before it runs,
    /// so a removal or `close()` issued by an earlier callback silences the
    /// rest of the batch.
    fn dispatch(&self, frame: &Frame) {
        let _guard = self.enter_delivery();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if frame.event == DEFAULT_EVENT {
            let handler = self.on_message.read().clone();
            if let Some(handler) = handler {
                handler(&frame.data);
            }
        }

        let handlers: Vec<(Uuid, FrameHandler)> = self
            .listeners
            .read()
            .get(&frame.event)
            .cloned()
            .unwrap_or_default();

        for (id, handler) in handlers {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            if self.listener_alive(&frame.event, id) {
                handler(&frame.data);
            }
        }
    }

    fn notify_open(&self) {
        let _guard = self.enter_delivery();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let handler = self.on_open.read().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn notify_error(&self, err: &FeedError) {
        let _guard = self.enter_delivery();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let handler = self.on_error.read().clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

async fn run_loop(inner: Arc<StreamInner>) {
    loop {
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        inner.set_state(StreamState::Connecting);

        let err = match run_connection(&inner).await {
            Ok(()) => FeedError::Transport("stream closed by server".into()),
            Err(e) => e,
        };

        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        warn!(
            error = %err,
            retry_ms = inner.retry_delay.as_millis() as u64,
            "stream connection lost — reconnecting"
        );
        inner.notify_error(&err);
        // The error callback may have closed the stream for good.
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        inner.set_state(StreamState::ClosedRetrying);
        // The connection is destroyed wholesale; the next handshake issues a
        // fresh client id.
        inner.session.clear();

        tokio::time::sleep(inner.retry_delay).await;
    }
}

/// Drive one physical connection until the server closes it or it fails.
async fn run_connection(inner: &Arc<StreamInner>) -> Result<(), FeedError> {
    let resp = inner.client.open_stream().await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FeedError::Transport(format!(
            "stream endpoint returned {status}"
        )));
    }

    if inner.closed.load(Ordering::SeqCst) {
        return Ok(());
    }
    inner.set_state(StreamState::Open);
    info!("event stream connected");
    inner.notify_open();

    // Fresh parser per physical connection: no partial line survives a
    // reconnect.
    let mut parser = FrameParser::new();
    let mut body = resp.bytes_stream();

    while let Some(chunk) = body.next().await {
        let bytes =
            chunk.map_err(|e| FeedError::Transport(format!("stream read failed: {e}")))?;
        let text = String::from_utf8_lossy(&bytes);
        for frame in parser.push(&text) {
            inner.dispatch(&frame);
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
