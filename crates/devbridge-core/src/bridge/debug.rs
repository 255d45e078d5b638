//! Debug endpoint: faces the instrumented runtime and speaks envelopes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_tungstenite::tungstenite::Message;
use tokio::net::TcpListener;
use tracing::{debug, error, trace};

use super::connection::{ConnectionId, ConnectionSet, Endpoint, FrameHandler};
use super::relay::{CdpMessage, DebugLink, ProxyMessage, RelayPublisher};
use crate::codec::{Category, CodecError, PayloadCodec, hex_preview};
use crate::error::Result;

pub const DEBUG_ENDPOINT: &str = "debug";

/// Category of the envelopes sent to the runtime.
pub const OUTBOUND_CATEGORY: Category = Category::ChromeDevtools;

fn sequence_after(sequence: u32) -> u32 {
    sequence.checked_add(1).unwrap_or(1)
}

/// Envelope handling shared by the inbound and outbound paths.
pub struct DebugHub {
    connections: Arc<ConnectionSet>,
    codec: Arc<dyn PayloadCodec>,
    sequence: AtomicU32,
}

impl DebugHub {
    pub fn new(connections: Arc<ConnectionSet>, codec: Arc<dyn PayloadCodec>) -> Self {
        Self {
            connections,
            codec,
            sequence: AtomicU32::new(0),
        }
    }

    /// Sequence numbers run from 1 to `u32::MAX`, then wrap back to 1.
    fn next_sequence(&self) -> u32 {
        let previous = self
            .sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| Some(sequence_after(s)))
            .unwrap_or_else(|s| s);
        sequence_after(previous)
    }

    /// Sequence number of the most recent outbound envelope, 0 if none.
    pub fn last_sequence(&self) -> u32 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Decode an inbound frame and decide whether it goes to the inspector.
    ///
    /// Only `chromeDevtoolsResult` envelopes are relayed; every other
    /// category is accepted and ignored.
    pub fn classify(&self, frame: &[u8]) -> std::result::Result<Option<CdpMessage>, CodecError> {
        let envelope = self.codec.decode_envelope(frame)?;
        if envelope.category != Category::ChromeDevtoolsResult {
            debug!(
                "[{}] ignoring envelope seq={} category={}",
                DEBUG_ENDPOINT, envelope.sequence, envelope.category
            );
            return Ok(None);
        }
        let payload = self.codec.unwrap_payload(&envelope)?;
        Ok(Some(CdpMessage(payload)))
    }

    /// Wrap an inspector frame and send it to every open runtime connection.
    ///
    /// Each connection gets its own envelope with the next sequence number.
    pub fn broadcast(&self, message: &ProxyMessage) -> usize {
        self.connections.send_each(|_| {
            let sequence = self.next_sequence();
            let envelope = self
                .codec
                .wrap_payload(&message.0, sequence)
                .into_envelope(sequence, OUTBOUND_CATEGORY);
            Message::Binary(self.codec.encode_envelope(&envelope))
        })
    }
}

struct DebugInbound {
    hub: Arc<DebugHub>,
    publisher: RelayPublisher<CdpMessage>,
}

impl FrameHandler for DebugInbound {
    fn on_frame(&self, connection: ConnectionId, frame: Vec<u8>) {
        trace!(
            "[{}] connection {} raw frame: {}",
            DEBUG_ENDPOINT,
            connection,
            hex_preview(&frame, 256)
        );
        match self.hub.classify(&frame) {
            Ok(Some(message)) => {
                self.publisher.publish(message);
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    "[{}] dropping undecodable frame from connection {}: {}",
                    DEBUG_ENDPOINT, connection, e
                );
            }
        }
    }
}

/// Start the debug endpoint on an already bound listener.
pub(crate) fn spawn_debug_endpoint(
    listener: TcpListener,
    codec: Arc<dyn PayloadCodec>,
    link: DebugLink,
) -> Result<(Endpoint, Arc<DebugHub>)> {
    let connections = Arc::new(ConnectionSet::new(DEBUG_ENDPOINT));
    let hub = Arc::new(DebugHub::new(connections.clone(), codec));
    let (publisher, mut inbox) = link.into_parts();

    let dispatch_hub = hub.clone();
    let dispatch = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let sent = dispatch_hub.broadcast(&message);
            trace!("[{}] proxied inspector frame to {} clients", DEBUG_ENDPOINT, sent);
        }
    });

    let handler = Arc::new(DebugInbound {
        hub: hub.clone(),
        publisher,
    });
    let endpoint = Endpoint::spawn(DEBUG_ENDPOINT, listener, handler, connections, dispatch)?;
    Ok((endpoint, hub))
}
