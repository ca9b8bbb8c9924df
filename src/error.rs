// =============================================================================
// Error taxonomy for the apexfeed pipeline
// =============================================================================
//
// Every failure in the feed maps to exactly one of these variants, and each
// variant has a fixed recovery policy. None of them is fatal to the process:
// the worst case is a stalled live feed, which the reconnect loop heals.
// =============================================================================

use thiserror::Error;

/// Errors produced by the streaming transport, wire decoding, history
/// backfill and filter registration paths.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection or status failure on the streaming endpoint.
    /// Recovered automatically: the transport notifies `on_error` once and
    /// reconnects after the configured retry delay.
    #[error("transport: {0}")]
    Transport(String),

    /// Malformed frame or wire record. The offending record is dropped and
    /// the stream continues.
    #[error("parse: {0}")]
    Parse(String),

    /// History archive request failed or returned a non-success status.
    /// Surfaced to the caller; never retried.
    #[error("history fetch: {0}")]
    HistoryFetch(String),

    /// Server-side filter registration failed. Logged; the local listener
    /// stays attached so ticks already flowing are not dropped. Not retried.
    #[error("subscription: {0}")]
    Subscription(String),
}

impl FeedError {
    /// True when the transport's reconnect loop will handle this error on
    /// its own and the caller only needs to observe it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Parse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category_and_detail() {
        let e = FeedError::Transport("stream endpoint returned 500".into());
        assert_eq!(e.to_string(), "transport: stream endpoint returned 500");

        let e = FeedError::HistoryFetch("timeout".into());
        assert_eq!(e.to_string(), "history fetch: timeout");
    }

    #[test]
    fn recoverability_policy() {
        assert!(FeedError::Transport("x".into()).is_recoverable());
        assert!(FeedError::Parse("x".into()).is_recoverable());
        assert!(!FeedError::HistoryFetch("x".into()).is_recoverable());
        assert!(!FeedError::Subscription("x".into()).is_recoverable());
    }
}
