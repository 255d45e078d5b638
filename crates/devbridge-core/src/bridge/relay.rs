//! In-process relay between the two endpoints.
//!
//! The relay is a pair of typed channels. Each endpoint receives one
//! [`RelayLink`] at construction: it publishes its own event type and
//! consumes the other side's, so the endpoints never reference each other.

use tokio::sync::mpsc;
use tracing::debug;

/// Unwrapped CDP payload travelling from the debug endpoint to the inspector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdpMessage(pub Vec<u8>);

/// Raw inspector frame travelling to the debug endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyMessage(pub Vec<u8>);

/// One endpoint's view of the relay.
pub struct RelayLink<Out, In> {
    publisher: RelayPublisher<Out>,
    inbox: mpsc::UnboundedReceiver<In>,
}

/// Publishing half of a [`RelayLink`].
pub struct RelayPublisher<T> {
    tx: mpsc::UnboundedSender<T>,
    kind: &'static str,
}

impl<T> Clone for RelayPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            kind: self.kind,
        }
    }
}

impl<T> RelayPublisher<T> {
    /// Publish an event. Returns `false` once the consuming side is gone.
    pub fn publish(&self, event: T) -> bool {
        if self.tx.send(event).is_err() {
            debug!("Relay {} has no subscriber, event dropped", self.kind);
            return false;
        }
        true
    }
}

impl<Out, In> RelayLink<Out, In> {
    pub fn publisher(&self) -> RelayPublisher<Out> {
        self.publisher.clone()
    }

    pub fn into_parts(self) -> (RelayPublisher<Out>, mpsc::UnboundedReceiver<In>) {
        (self.publisher, self.inbox)
    }
}

/// Link used by the debug endpoint.
pub type DebugLink = RelayLink<CdpMessage, ProxyMessage>;
/// Link used by the inspector endpoint.
pub type InspectorLink = RelayLink<ProxyMessage, CdpMessage>;

/// Create the relay and return the two endpoint links.
pub fn relay() -> (DebugLink, InspectorLink) {
    let (cdp_tx, cdp_rx) = mpsc::unbounded_channel();
    let (proxy_tx, proxy_rx) = mpsc::unbounded_channel();

    let debug = RelayLink {
        publisher: RelayPublisher {
            tx: cdp_tx,
            kind: "cdpmessage",
        },
        inbox: proxy_rx,
    };
    let inspector = RelayLink {
        publisher: RelayPublisher {
            tx: proxy_tx,
            kind: "proxymessage",
        },
        inbox: cdp_rx,
    };
    (debug, inspector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_cross_over() {
        let (debug, inspector) = relay();
        let (debug_pub, mut debug_inbox) = debug.into_parts();
        let (inspector_pub, mut inspector_inbox) = inspector.into_parts();

        assert!(debug_pub.publish(CdpMessage(b"from runtime".to_vec())));
        assert!(inspector_pub.publish(ProxyMessage(b"from inspector".to_vec())));

        assert_eq!(
            inspector_inbox.try_recv().unwrap(),
            CdpMessage(b"from runtime".to_vec())
        );
        assert_eq!(
            debug_inbox.try_recv().unwrap(),
            ProxyMessage(b"from inspector".to_vec())
        );
    }

    #[test]
    fn test_order_preserved() {
        let (debug, inspector) = relay();
        let publisher = debug.publisher();
        let (_, mut inbox) = inspector.into_parts();
        for i in 0..5u8 {
            publisher.publish(CdpMessage(vec![i]));
        }
        for i in 0..5u8 {
            assert_eq!(inbox.try_recv().unwrap(), CdpMessage(vec![i]));
        }
    }

    #[test]
    fn test_publish_without_subscriber() {
        let (debug, inspector) = relay();
        let publisher = debug.publisher();
        drop(inspector);
        assert!(!publisher.publish(CdpMessage(vec![1])));
    }
}
