use tracing::trace;

/// Event name used when a `data:` line arrives without a preceding
/// `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// One decoded (event name, data) unit from the streaming response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

// ---------------------------------------------------------------------------
// FrameParser -- incremental `event:`/`data:` line framing
// ---------------------------------------------------------------------------

/// Stateful incremental parser for the stream framing.
///
/// Feed it response chunks as they arrive; each call consumes every complete
/// line and retains only the trailing incomplete suffix, so cost is
/// proportional to the new bytes, not the total stream length. A `data:` line
/// produces a frame named by the most recent `event:` line; the pending name
/// falls back to [`DEFAULT_EVENT`] and resets after every produced frame.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Unconsumed tail of the stream (at most one partial line).
    buf: String,
    /// Event name from the most recent `event:` line, not yet attached to a
    /// frame. Empty means "use the default".
    pending_event: String,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of stream text and return every frame it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        self.buf.push_str(chunk);

        // Nothing to do until at least one full line is available.
        let Some(newline) = self.buf.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.buf.split_off(newline + 1);
        let complete = std::mem::replace(&mut self.buf, rest);

        let mut frames = Vec::new();
        for line in complete.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                let event = if self.pending_event.is_empty() {
                    DEFAULT_EVENT.to_string()
                } else {
                    std::mem::take(&mut self.pending_event)
                };
                trace!(event = %event, "frame decoded");
                frames.push(Frame {
                    event,
                    data: data.to_string(),
                });
            } else if let Some(name) = line.strip_prefix("event: ") {
                self.pending_event = name.to_string();
            }
            // Blank separator lines and anything unrecognised are skipped.
        }
        frames
    }

    /// Drop all retained state. Used when a fresh connection replaces the
    /// stream the buffered suffix came from.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pending_event.clear();
    }

    /// Bytes currently held back as an incomplete trailing line.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
