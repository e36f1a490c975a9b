//! Push channel transports.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;

use crate::invalidation::messages::PushMessage;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("connect failed: {0}")]
    Connect(String),

    /// One frame could not be decoded. The connection stays usable.
    #[error("undecodable push message: {0}")]
    Decode(String),

    #[error("push channel failed: {0}")]
    Transport(String),
}

/// Messages of one connection. The stream ends when the connection drops.
pub type PushStream = BoxStream<'static, Result<PushMessage, PushError>>;

#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> Result<PushStream, PushError>;
}

/// JSON text frames over a WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(&self) -> Result<PushStream, PushError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| PushError::Connect(e.to_string()))?;

        let stream = socket.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(
                    serde_json::from_str::<PushMessage>(text.as_str())
                        .map_err(|e| PushError::Decode(e.to_string())),
                ),
                Ok(Message::Close(_)) => None,
                Ok(_) => None,
                Err(err) => Some(Err(PushError::Transport(err.to_string()))),
            }
        });
        Ok(stream.boxed())
    }
}

/// In-process transport: every [`ChannelHandle::open`] creates one connection.
pub struct ChannelTransport {
    connections: Mutex<mpsc::UnboundedReceiver<mpsc::UnboundedReceiver<PushMessage>>>,
}

/// Producer side of a [`ChannelTransport`].
#[derive(Clone)]
pub struct ChannelHandle {
    connections: mpsc::UnboundedSender<mpsc::UnboundedReceiver<PushMessage>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, ChannelHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                connections: Mutex::new(rx),
            },
            ChannelHandle { connections: tx },
        )
    }
}

impl ChannelHandle {
    /// Accept the next connection. Dropping the returned sender drops it.
    pub fn open(&self) -> Option<mpsc::UnboundedSender<PushMessage>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.send(rx).ok()?;
        Some(tx)
    }
}

#[async_trait]
impl PushTransport for ChannelTransport {
    async fn connect(&self) -> Result<PushStream, PushError> {
        let next = self.connections.lock().await.recv().await;
        match next {
            Some(rx) => Ok(UnboundedReceiverStream::new(rx).map(Ok).boxed()),
            None => Err(PushError::Connect("channel closed".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::messages::CacheDirective;

    #[tokio::test]
    async fn test_channel_connection_ends_when_sender_dropped() {
        let (transport, handle) = ChannelTransport::new();
        let tx = handle.open().unwrap();
        tx.send(PushMessage::CacheDirective(CacheDirective::default()))
            .unwrap();
        drop(tx);

        let mut stream = transport.connect().await.unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Ok(PushMessage::CacheDirective(_)))
        ));
        assert!(stream.next().await.is_none());

        drop(handle);
        assert!(matches!(
            transport.connect().await,
            Err(PushError::Connect(_))
        ));
    }
}
