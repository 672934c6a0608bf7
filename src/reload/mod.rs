//! Live-reload event channel.
//!
//! The watch loop publishes [`WatchEvent`]s on a broadcast channel; a
//! transport (websocket, SSE, ...) subscribes and forwards them. Rendered
//! page caches are cleared through the [`RenderCache`] hook.
//!
//! ```text
//! watch loop ──emit──▶ EventHub ──broadcast──▶ transport ──▶ client
//!      └──invalidate──▶ RenderCache
//! ```

mod message;

pub use message::{RefreshPolicy, WatchEvent};

use tokio::sync::broadcast;

/// Events buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Fan-out of watch events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<WatchEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn emit(&self, event: WatchEvent) -> usize {
        crate::debug!("reload"; "{}", event.to_json());
        // No subscribers is not an error: nobody is connected yet
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Server-render cache owned by the page layer.
pub trait RenderCache: Send + Sync {
    /// Drop rendered output for `route`, or everything when `None`.
    fn invalidate(&self, route: Option<&str>);
}

/// Render cache for engines without a page layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenderCache;

impl RenderCache for NoopRenderCache {
    fn invalidate(&self, _route: Option<&str>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Specifier;

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        let event = WatchEvent::remove(Specifier::new("/pages/a.tsx"));
        assert_eq!(hub.emit(event.clone()), 2);

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let hub = EventHub::new();
        assert_eq!(hub.emit(WatchEvent::remove(Specifier::new("/a.ts"))), 0);
    }
}
