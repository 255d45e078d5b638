//! Protocol bridge between the instrumented runtime and a CDP inspector.
//!
//! Two WebSocket endpoints joined by the [`relay`]:
//!
//! - the debug endpoint accepts runtime clients and speaks protobuf envelopes
//! - the inspector endpoint accepts DevTools clients and speaks plain CDP
//!
//! Runtime results are unwrapped and forwarded to every inspector; inspector
//! commands are wrapped with a fresh sequence number and sent to every
//! runtime client.

mod connection;
mod debug;
mod inspector;
pub mod relay;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::codec::PayloadCodec;
use crate::error::{Error, Result};

pub use connection::{ConnectionId, ConnectionSet, Endpoint, HANDSHAKE_TIMEOUT};
pub use debug::{DEBUG_ENDPOINT, DebugHub, OUTBOUND_CATEGORY};
pub use inspector::{INSPECTOR_ENDPOINT, InspectorHub};

/// Port the instrumented runtime connects to. Not configurable on the
/// runtime side.
pub const DEBUG_PORT: u16 = 9421;

/// Default port for DevTools.
pub const DEFAULT_CDP_PORT: u16 = 62000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub debug_addr: SocketAddr,
    pub inspector_addr: SocketAddr,
}

impl BridgeConfig {
    pub fn with_cdp_port(cdp_port: u16) -> Self {
        Self {
            inspector_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, cdp_port)),
            ..Self::default()
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            debug_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEBUG_PORT)),
            inspector_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_CDP_PORT)),
        }
    }
}

/// Both endpoints, running.
pub struct Bridge {
    debug: Endpoint,
    inspector: Endpoint,
    debug_hub: Arc<DebugHub>,
}

impl Bridge {
    /// Bind both listeners, then start serving.
    ///
    /// Nothing is spawned unless both binds succeed.
    pub async fn bind(config: &BridgeConfig, codec: Arc<dyn PayloadCodec>) -> Result<Self> {
        let debug_listener = TcpListener::bind(config.debug_addr).await?;
        let inspector_listener = TcpListener::bind(config.inspector_addr).await?;

        let (debug_link, inspector_link) = relay::relay();
        let (debug, debug_hub) = debug::spawn_debug_endpoint(debug_listener, codec, debug_link)?;
        let (inspector, _) = inspector::spawn_inspector_endpoint(inspector_listener, inspector_link)?;

        info!(
            "Bridge running. DevTools: devtools://devtools/bundled/inspector.html?ws={}",
            inspector.local_addr()
        );

        Ok(Self {
            debug,
            inspector,
            debug_hub,
        })
    }

    pub fn debug(&self) -> &Endpoint {
        &self.debug
    }

    pub fn inspector(&self) -> &Endpoint {
        &self.inspector
    }

    /// Sequence number of the most recent envelope sent to the runtime.
    pub fn last_sequence(&self) -> u32 {
        self.debug_hub.last_sequence()
    }

    /// Force-close every connection on both endpoints.
    pub fn terminate_connections(&self) -> usize {
        self.debug.terminate_connections() + self.inspector.terminate_connections()
    }

    /// Close both endpoints concurrently, returning the failures.
    pub async fn close(&mut self, timeout: Duration) -> Vec<Error> {
        let (debug, inspector) = tokio::join!(
            self.debug.close(timeout),
            self.inspector.close(timeout)
        );

        let mut failures = Vec::new();
        for (name, result) in [(DEBUG_ENDPOINT, debug), (INSPECTOR_ENDPOINT, inspector)] {
            if let Err(e) = result {
                error!("Error closing {} endpoint: {}", name, e);
                failures.push(e);
            }
        }
        failures
    }

    pub fn is_closed(&self) -> bool {
        self.debug.is_closed() && self.inspector.is_closed()
    }
}
