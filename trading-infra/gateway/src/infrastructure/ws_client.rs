use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::domain::{Transport, TransportChannels, WireMessage};
use crate::error::TransportError;

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Connection(err.to_string())
    }
}

/// WebSocket transport
/// Infrastructure component - handles WebSocket communication
#[derive(Debug, Clone)]
pub struct WsTransport {
    buffer: usize,
}

impl Default for WsTransport {
    fn default() -> Self {
        WsTransport { buffer: 1024 }
    }
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for WsTransport {
    /// Connect and return channels for sending and receiving frames
    async fn connect(&self, url: &str) -> Result<TransportChannels, TransportError> {
        Url::parse(url).map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<WireMessage>(self.buffer);
        let (in_tx, in_rx) = mpsc::channel::<WireMessage>(self.buffer);

        // Outgoing frames
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let frame = match message {
                    WireMessage::Text(text) => Message::Text(text.into()),
                    WireMessage::Ping(payload) => Message::Ping(payload.into()),
                    WireMessage::Pong(payload) => Message::Pong(payload.into()),
                    WireMessage::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = write.send(frame).await {
                    tracing::debug!("WebSocket write failed: {}", e);
                    break;
                }
            }
        });

        // Incoming frames; dropping in_tx tells the owner the socket is gone
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let wire = match message {
                    Ok(Message::Text(text)) => WireMessage::Text(text.as_str().to_string()),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => WireMessage::Text(text),
                        Err(_) => {
                            tracing::trace!("Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Ping(payload)) => WireMessage::Ping(payload.to_vec()),
                    Ok(Message::Pong(payload)) => WireMessage::Pong(payload.to_vec()),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!("WebSocket closed by peer: {:?}", frame);
                        break;
                    }
                    Ok(Message::Frame(_)) => continue,
                    Err(e) => {
                        tracing::debug!("WebSocket read failed: {}", e);
                        break;
                    }
                };
                if in_tx.send(wire).await.is_err() {
                    break;
                }
            }
        });

        Ok(TransportChannels {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
