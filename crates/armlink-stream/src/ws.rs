//! WebSocket transport built on `tokio-tungstenite`.

use async_trait::async_trait;
use armlink_types::ArmError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;

use crate::transport::{Connector, Transport};

/// [`Connector`] that opens `ws://` / `wss://` connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ArmError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| ArmError::Transport(format!("ws connect to {url}: {e}")))?;
        debug!(url = %url, status = %response.status(), "ws handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<Result<String, ArmError>> {
        loop {
            match self.stream.next().await {
                None | Some(Ok(Message::Close(_))) => return None,
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|e| {
                        ArmError::Parse(format!("binary frame is not UTF-8: {e}"))
                    }));
                }
                // Ping / pong are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(ArmError::Transport(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), ArmError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ArmError::Transport(format!("ws send: {e}")))
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn local_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn text_frames_flow_both_ways() {
        let (listener, url) = local_server().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::Text("state".into())).await.unwrap();
            match ws.next().await {
                Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                other => panic!("unexpected frame: {other:?}"),
            }
        });

        let mut transport = WsConnector.connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "state");
        transport.send("ack".to_string()).await.unwrap();
        assert_eq!(server.await.unwrap(), "ack");
    }

    #[tokio::test]
    async fn non_utf8_binary_frame_is_a_parse_error() {
        let (listener, url) = local_server().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::Binary(vec![0xff, 0xfe].into())).await.unwrap();
            let _ = ws.next().await;
        });

        let mut transport = WsConnector.connect(&url).await.unwrap();
        assert!(matches!(transport.recv().await, Some(Err(ArmError::Parse(_)))));
    }

    #[tokio::test]
    async fn server_close_ends_the_transport() {
        let (listener, url) = local_server().await;
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut transport = WsConnector.connect(&url).await.unwrap();
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let (listener, url) = local_server().await;
        drop(listener);
        assert!(matches!(
            WsConnector.connect(&url).await,
            Err(ArmError::Transport(_))
        ));
    }
}
