//! WebSocket listener and connection bookkeeping shared by both endpoints.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_tungstenite::tungstenite::{Error as WsError, Message};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

pub type ConnectionId = u64;

/// How long a client may take to complete the WebSocket handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives every data frame read from an endpoint's connections.
pub(crate) trait FrameHandler: Send + Sync + 'static {
    fn on_frame(&self, connection: ConnectionId, frame: Vec<u8>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Handshaking,
    Open,
}

struct Connection {
    state: ConnectionState,
    tx: mpsc::UnboundedSender<Message>,
    task: Option<AbortHandle>,
}

/// The live connections of one endpoint.
pub struct ConnectionSet {
    endpoint: &'static str,
    next_id: AtomicU64,
    connections: Mutex<BTreeMap<ConnectionId, Connection>>,
}

impl ConnectionSet {
    pub fn new(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            next_id: AtomicU64::new(0),
            connections: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection that has not finished its handshake yet.
    pub fn register(&self, tx: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock().insert(
            id,
            Connection {
                state: ConnectionState::Handshaking,
                tx,
                task: None,
            },
        );
        id
    }

    pub fn set_task(&self, id: ConnectionId, task: AbortHandle) {
        if let Some(connection) = self.lock().get_mut(&id) {
            connection.task = Some(task);
        }
    }

    pub fn mark_open(&self, id: ConnectionId) {
        if let Some(connection) = self.lock().get_mut(&id) {
            connection.state = ConnectionState::Open;
        }
    }

    pub fn remove(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Number of connections that are open and still being served.
    pub fn open_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|c| c.state == ConnectionState::Open && !c.tx.is_closed())
            .count()
    }

    /// Queue one message per open connection, built by `make`.
    ///
    /// `make` is only called for connections that will receive the message.
    /// Connections whose task has gone away are pruned. Returns the number
    /// of messages queued.
    pub fn send_each(&self, mut make: impl FnMut(ConnectionId) -> Message) -> usize {
        let mut connections = self.lock();
        let mut sent = 0;
        let mut dead = Vec::new();

        for (id, connection) in connections.iter() {
            if connection.tx.is_closed() {
                dead.push(*id);
                continue;
            }
            if connection.state != ConnectionState::Open {
                continue;
            }
            if connection.tx.send(make(*id)).is_ok() {
                sent += 1;
            } else {
                dead.push(*id);
            }
        }

        for id in dead {
            debug!("[{}] pruning closed connection {}", self.endpoint, id);
            connections.remove(&id);
        }
        sent
    }

    /// Abort every connection task and forget the connections.
    pub fn terminate_all(&self) -> usize {
        let connections = std::mem::take(&mut *self.lock());
        let count = connections.len();
        for (_, connection) in connections {
            if let Some(task) = connection.task {
                task.abort();
            }
        }
        count
    }
}

/// Accept connections until `closing` flips to `true`.
pub(crate) async fn accept_loop<H: FrameHandler>(
    name: &'static str,
    listener: TcpListener,
    handler: Arc<H>,
    connections: Arc<ConnectionSet>,
    handshake_timeout: Duration,
    mut closing: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = closing.changed() => {
                if changed.is_err() || *closing.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let id = connections.register(tx);
                    let task = tokio::spawn(serve_connection(
                        name,
                        id,
                        peer,
                        stream,
                        rx,
                        handler.clone(),
                        connections.clone(),
                        handshake_timeout,
                    ));
                    connections.set_task(id, task.abort_handle());
                }
                Err(e) => {
                    warn!("[{}] accept failed: {}", name, e);
                }
            }
        }
    }
    info!("[{}] stopped accepting connections", name);
}

/// Errors after which the socket cannot be read any further.
fn is_terminal(error: &WsError) -> bool {
    !matches!(error, WsError::Utf8)
}

async fn serve_connection<H: FrameHandler>(
    name: &'static str,
    id: ConnectionId,
    peer: SocketAddr,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    handler: Arc<H>,
    connections: Arc<ConnectionSet>,
    handshake_timeout: Duration,
) {
    let handshake = async_tungstenite::tokio::accept_async(stream);
    let ws = match tokio::time::timeout(handshake_timeout, handshake).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("[{}] handshake with {} failed: {}", name, peer, e);
            connections.remove(id);
            return;
        }
        Err(_) => {
            warn!(
                "[{}] handshake with {} timed out after {:?}",
                name, peer, handshake_timeout
            );
            connections.remove(id);
            return;
        }
    };
    connections.mark_open(id);
    info!("[{}] client {} connected (connection {})", name, peer, id);

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = sink.send(message).await {
                    error!("[{}] send to connection {} failed: {}", name, id, e);
                    if is_terminal(&e) {
                        break;
                    }
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Binary(data))) => handler.on_frame(id, data),
                Some(Ok(Message::Text(text))) => handler.on_frame(id, text.into_bytes()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("[{}] connection {} error: {}", name, id, e);
                    if is_terminal(&e) {
                        break;
                    }
                }
            }
        }
    }

    connections.remove(id);
    info!("[{}] client {} disconnected (connection {})", name, peer, id);
}

/// A listening endpoint: accept loop, relay dispatch task and connections.
pub struct Endpoint {
    name: &'static str,
    local_addr: SocketAddr,
    connections: Arc<ConnectionSet>,
    closing: watch::Sender<bool>,
    listener_task: Option<JoinHandle<()>>,
    dispatch_task: Option<JoinHandle<()>>,
}

impl Endpoint {
    pub(crate) fn spawn<H: FrameHandler>(
        name: &'static str,
        listener: TcpListener,
        handler: Arc<H>,
        connections: Arc<ConnectionSet>,
        dispatch_task: JoinHandle<()>,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let (closing, closing_rx) = watch::channel(false);
        let listener_task = tokio::spawn(accept_loop(
            name,
            listener,
            handler,
            connections.clone(),
            HANDSHAKE_TIMEOUT,
            closing_rx,
        ));
        info!("[{}] listening on ws://{}", name, local_addr);

        Ok(Self {
            name,
            local_addr,
            connections,
            closing,
            listener_task: Some(listener_task),
            dispatch_task: Some(dispatch_task),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.connections.open_count()
    }

    /// Force-close every connection without a close handshake.
    pub fn terminate_connections(&self) -> usize {
        let count = self.connections.terminate_all();
        if count > 0 {
            info!("[{}] terminated {} connections", self.name, count);
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.listener_task.is_none()
    }

    /// Stop listening and wait for the accept loop to finish.
    ///
    /// The endpoint counts as closed afterwards even when this fails.
    pub async fn close(&mut self, timeout: Duration) -> Result<()> {
        let Some(mut listener_task) = self.listener_task.take() else {
            return Ok(());
        };
        if let Some(dispatch_task) = self.dispatch_task.take() {
            dispatch_task.abort();
        }
        let _ = self.closing.send(true);

        match tokio::time::timeout(timeout, &mut listener_task).await {
            Ok(Ok(())) => {
                info!("[{}] endpoint closed", self.name);
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Io(std::io::Error::other(format!(
                "{} listener task failed: {}",
                self.name, e
            )))),
            Err(_) => {
                listener_task.abort();
                Err(Error::Timeout {
                    step: format!("closing {} endpoint", self.name),
                    timeout,
                })
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
        }
        self.connections.terminate_all();
    }
}
