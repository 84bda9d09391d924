//! In-process transport.
//!
//! [`MemoryConnector`] hands every connection attempt to the paired
//! [`MemoryServer`] as a [`MemoryPeer`].  The server side decides what to
//! send, when to drop the connection, and whether to refuse new ones, which
//! makes reconnect behaviour reproducible without sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use armlink_types::ArmError;
use tokio::sync::mpsc;

use crate::transport::{Connector, Transport};

/// Client half: plug into a [`ReconnectingStream`][crate::ReconnectingStream].
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refusing: Arc<AtomicBool>,
}

/// Server half: accepts [`MemoryPeer`]s.
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    refusing: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Create a connected client/server pair.
    pub fn pair() -> (MemoryConnector, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let refusing = Arc::new(AtomicBool::new(false));
        (
            MemoryConnector {
                accept_tx,
                refusing: Arc::clone(&refusing),
            },
            MemoryServer { accept_rx, refusing },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ArmError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(ArmError::Transport(format!("connection to {url} refused")));
        }
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            to_client: Some(to_client),
            from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| ArmError::Transport(format!("no server listening for {url}")))?;
        Ok(Box::new(MemoryTransport { inbound, outbound }))
    }
}

impl MemoryServer {
    /// Wait for the next connection attempt.  Returns `None` once every
    /// [`MemoryConnector`] clone has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// While `refuse` is set, connection attempts fail with
    /// [`ArmError::Transport`].
    pub fn refuse_connections(&self, refuse: bool) {
        self.refusing.store(refuse, Ordering::SeqCst);
    }
}

/// Server-side view of one in-process connection.
pub struct MemoryPeer {
    url: String,
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// The URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push a frame to the client.  Fails once either side has closed.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ArmError> {
        self.to_client
            .as_ref()
            .ok_or(ArmError::Closed)?
            .send(text.into())
            .map_err(|_| ArmError::Closed)
    }

    /// Wait for the next frame written by the client.  `None` once the
    /// client dropped the connection.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Drop the connection from the server side.
    pub fn disconnect(&mut self) {
        self.to_client = None;
    }

    /// `true` once the client has closed or dropped this connection.
    pub fn is_closed(&self) -> bool {
        self.to_client.as_ref().is_none_or(|tx| tx.is_closed())
    }
}

struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn recv(&mut self) -> Option<Result<String, ArmError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn send(&mut self, text: String) -> Result<(), ArmError> {
        self.outbound
            .send(text)
            .map_err(|_| ArmError::Transport("peer has gone away".to_string()))
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (connector, mut server) = MemoryConnector::pair();
        let mut transport = connector.connect("mem://robot").await.unwrap();
        let mut peer = server.accept().await.unwrap();
        assert_eq!(peer.url(), "mem://robot");

        peer.send("hello").unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "hello");

        transport.send("ack".to_string()).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), "ack");
    }

    #[tokio::test]
    async fn refused_connection_errors() {
        let (connector, server) = MemoryConnector::pair();
        server.refuse_connections(true);
        let result = connector.connect("mem://robot").await;
        assert!(matches!(result, Err(ArmError::Transport(_))));
    }

    #[tokio::test]
    async fn server_disconnect_ends_client_stream() {
        let (connector, mut server) = MemoryConnector::pair();
        let mut transport = connector.connect("mem://robot").await.unwrap();
        let mut peer = server.accept().await.unwrap();
        peer.disconnect();
        assert!(transport.recv().await.is_none());
        assert!(peer.send("late").is_err());
    }

    #[tokio::test]
    async fn client_close_is_visible_to_peer() {
        let (connector, mut server) = MemoryConnector::pair();
        let mut transport = connector.connect("mem://robot").await.unwrap();
        let peer = server.accept().await.unwrap();
        assert!(!peer.is_closed());
        transport.close().await;
        assert!(peer.is_closed());
    }
}
