//! Inspector endpoint: plain CDP frames in both directions.

use std::sync::Arc;

use async_tungstenite::tungstenite::Message;
use tokio::net::TcpListener;
use tracing::trace;

use super::connection::{ConnectionId, ConnectionSet, Endpoint, FrameHandler};
use super::relay::{CdpMessage, InspectorLink, ProxyMessage, RelayPublisher};
use crate::error::Result;

pub const INSPECTOR_ENDPOINT: &str = "inspector";

pub struct InspectorHub {
    connections: Arc<ConnectionSet>,
}

impl InspectorHub {
    pub fn new(connections: Arc<ConnectionSet>) -> Self {
        Self { connections }
    }

    /// Send a CDP payload unchanged to every open inspector connection.
    pub fn forward(&self, message: &CdpMessage) -> usize {
        let frame = to_frame(&message.0);
        self.connections.send_each(|_| frame.clone())
    }
}

/// CDP is JSON text; anything that is not UTF-8 goes out as binary.
fn to_frame(payload: &[u8]) -> Message {
    match std::str::from_utf8(payload) {
        Ok(text) => Message::Text(text.to_string()),
        Err(_) => Message::Binary(payload.to_vec()),
    }
}

struct InspectorInbound {
    publisher: RelayPublisher<ProxyMessage>,
}

impl FrameHandler for InspectorInbound {
    fn on_frame(&self, connection: ConnectionId, frame: Vec<u8>) {
        trace!(
            "[{}] connection {} frame of {} bytes",
            INSPECTOR_ENDPOINT,
            connection,
            frame.len()
        );
        self.publisher.publish(ProxyMessage(frame));
    }
}

pub(crate) fn spawn_inspector_endpoint(
    listener: TcpListener,
    link: InspectorLink,
) -> Result<(Endpoint, Arc<InspectorHub>)> {
    let connections = Arc::new(ConnectionSet::new(INSPECTOR_ENDPOINT));
    let hub = Arc::new(InspectorHub::new(connections.clone()));
    let (publisher, mut inbox) = link.into_parts();

    let dispatch_hub = hub.clone();
    let dispatch = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let sent = dispatch_hub.forward(&message);
            trace!("[{}] forwarded CDP message to {} clients", INSPECTOR_ENDPOINT, sent);
        }
    });

    let handler = Arc::new(InspectorInbound { publisher });
    let endpoint = Endpoint::spawn(INSPECTOR_ENDPOINT, listener, handler, connections, dispatch)?;
    Ok((endpoint, hub))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::relay::relay;
    use tokio::sync::mpsc;

    #[test]
    fn test_forward_is_verbatim() {
        let connections = Arc::new(ConnectionSet::new(INSPECTOR_ENDPOINT));
        let hub = InspectorHub::new(connections.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = connections.register(tx);
        connections.mark_open(id);

        let payload = br#"{"method":"Runtime.executionContextCreated","params":{}}"#;
        assert_eq!(hub.forward(&CdpMessage(payload.to_vec())), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            Message::Text(String::from_utf8(payload.to_vec()).unwrap())
        );
    }

    #[test]
    fn test_non_utf8_goes_out_as_binary() {
        assert_eq!(to_frame(&[0xff, 0x00]), Message::Binary(vec![0xff, 0x00]));
    }

    #[test]
    fn test_inbound_frames_become_proxy_messages() {
        let (debug_link, inspector_link) = relay();
        let (_, mut debug_inbox) = debug_link.into_parts();
        let inbound = InspectorInbound {
            publisher: inspector_link.publisher(),
        };

        inbound.on_frame(1, b"raw".to_vec());
        assert_eq!(debug_inbox.try_recv().unwrap(), ProxyMessage(b"raw".to_vec()));
    }
}
