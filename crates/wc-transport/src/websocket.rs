/// Websocket relay connector (tokio-tungstenite).
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::redact_url;
use crate::{Connector, Link, TransportError};

/// Opens websocket links to a relay server.
///
/// Each link runs two tasks: a writer draining `Link::outbound` into the
/// socket and a reader pushing text frames into `Link::inbound`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    buffer: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self { buffer: 256 }
    }

    /// Channel capacity per direction (default: 256).
    pub fn buffer(mut self, capacity: usize) -> Self {
        self.buffer = capacity;
        self
    }
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (stream, _response) = connect_async(url).await.map_err(|e| {
            tracing::debug!("websocket connect failed: {e}");
            TransportError::Unavailable {
                url: redact_url(url),
            }
        })?;
        tracing::info!("websocket connected to {}", redact_url(url));

        let (mut write, mut read) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.buffer);
        let (in_tx, in_rx) = mpsc::channel::<String>(self.buffer);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::warn!("websocket write failed: {e}");
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("websocket read failed: {e}");
                        break;
                    }
                }
            }
            tracing::debug!("websocket reader finished");
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
