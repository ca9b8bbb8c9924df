// =============================================================================
// Session — client identity shared across transport, registry and adapter
// =============================================================================
//
// The streaming endpoint assigns a client id on every fresh connection (the
// `connected` handshake event). Filter registration and clearing are keyed by
// that id, so the registry needs it and the transport invalidates it whenever
// the connection drops. One `Session` instance is passed explicitly to both;
// there is no ambient global.
// =============================================================================

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::debug;

/// Connection-scoped identity state.
#[derive(Debug, Default)]
pub struct Session {
    client_id: RwLock<Option<String>>,
    ready: Notify,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current client id, if the handshake for the live connection has
    /// completed.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.client_id.read().is_some()
    }

    /// Store the id learned from a `connected` handshake and wake any
    /// `wait_ready` callers.
    pub fn set_client_id(&self, id: impl Into<String>) {
        let id = id.into();
        debug!(client_id = %id, "session client id set");
        *self.client_id.write() = Some(id);
        self.ready.notify_waiters();
    }

    /// Invalidate the id. Called by the transport when the connection is
    /// destroyed; the next handshake re-learns it.
    pub fn clear(&self) {
        if self.client_id.write().take().is_some() {
            debug!("session client id cleared");
        }
    }

    /// Wait until a client id is available and return it.
    pub async fn wait_ready(&self) -> String {
        loop {
            // Register for notification before checking, so a set that lands
            // between the check and the await is not lost.
            let notified = self.ready.notified();
            if let Some(id) = self.client_id.read().clone() {
                return id;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_without_client_id() {
        let session = Session::new();
        assert!(!session.is_ready());
        assert_eq!(session.client_id(), None);
    }

    #[test]
    fn set_and_clear_roundtrip() {
        let session = Session::new();
        session.set_client_id("abc-123");
        assert!(session.is_ready());
        assert_eq!(session.client_id(), Some("abc-123".to_string()));

        session.clear();
        assert!(!session.is_ready());
    }

    #[tokio::test]
    async fn wait_ready_resolves_after_set() {
        let session = Arc::new(Session::new());

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_ready().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        session.set_client_id("client-7");

        let id = waiter.await.unwrap();
        assert_eq!(id, "client-7");
    }

    #[tokio::test]
    async fn wait_ready_returns_immediately_when_already_set() {
        let session = Session::new();
        session.set_client_id("early");
        assert_eq!(session.wait_ready().await, "early");
    }
}
