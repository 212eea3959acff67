//! The persistent connection to the directory service.
//!
//! A [`Connection`] is an owned handle: a sender for outbound events and a
//! receiver for inbound ones. Dropping it closes the underlying transport.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::{ClientEvent, ServerEvent};
use crate::error::DirectoryError;

pub struct Connection {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.outbound.is_closed())
            .finish()
    }
}

impl Connection {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientEvent>,
        inbound: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
        }
    }

    fn with_tasks(mut self, tasks: Vec<JoinHandle<()>>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn send(&self, event: ClientEvent) -> Result<(), DirectoryError> {
        self.outbound.send(event).map_err(|_| DirectoryError::Closed)
    }

    /// Next inbound event, `None` once the connection is closed
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Opens connections to the directory
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, DirectoryError>;
}

/// Newline-delimited JSON events over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Connection, DirectoryError> {
        tracing::debug!("connecting to directory at {}", self.addr);
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            tracing::error!("failed to connect to directory at {}: {}", self.addr, e);
            DirectoryError::Connect(e.to_string())
        })?;
        let (read_half, mut write_half) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerEvent>();

        let writer = tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let mut line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!("failed to encode directory event: {}", e);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    tracing::warn!("directory write failed: {}", e);
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<ServerEvent>(&line) {
                        Ok(event) => {
                            if in_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("ignoring undecodable directory event: {}", e),
                    },
                    Ok(None) => {
                        tracing::info!("directory closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("directory read failed: {}", e);
                        break;
                    }
                }
            }
        });

        tracing::info!("connected to directory at {}", self.addr);
        Ok(Connection::new(out_tx, in_rx).with_tasks(vec![writer, reader]))
    }
}

/// The directory side of an in-memory connection
#[derive(Debug)]
pub struct ServerEnd {
    incoming: mpsc::UnboundedReceiver<ClientEvent>,
    outgoing: mpsc::UnboundedSender<ServerEvent>,
}

impl ServerEnd {
    /// Push an event to the client. Returns false if the client has gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.outgoing.send(event).is_ok()
    }

    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.incoming.recv().await
    }

    /// Everything the client has sent so far
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.incoming.try_recv() {
            events.push(event);
        }
        events
    }

    /// True once the client side has been dropped
    pub fn is_closed(&self) -> bool {
        self.outgoing.is_closed()
    }
}

/// A connected client/server pair over in-process channels
pub fn memory_pair() -> (Connection, ServerEnd) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        Connection::new(out_tx, in_rx),
        ServerEnd {
            incoming: out_rx,
            outgoing: in_tx,
        },
    )
}

/// Hands out in-memory connections, one per `connect` call
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    servers: Arc<Mutex<Vec<ServerEnd>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections opened so far
    pub fn connections(&self) -> usize {
        self.servers.lock().len()
    }

    /// Take the server end of the most recent connection
    pub fn take_latest(&self) -> Option<ServerEnd> {
        self.servers.lock().pop()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Connection, DirectoryError> {
        let (connection, server) = memory_pair();
        self.servers.lock().push(server);
        Ok(connection)
    }
}
