/// Relay reliability layer.
///
/// The [`Relayer`] owns the relay link inside a single task that
/// multiplexes inbound frames, caller commands, heartbeat pulses and the
/// reconnect timer. Publisher, Subscriber and MessageTracker state live in
/// that task only, so pulses and caller operations never race on them.
mod r#loop;
pub mod publisher;
pub mod subscriber;
pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use wc_transport::relay_api::IRN;
use wc_transport::Connector;

pub use publisher::{PublishJob, PublishOptions, Publisher};
pub use subscriber::Subscriber;
pub use tracker::MessageTracker;

use crate::WalletConnectError;

// ── Configuration ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RelayerOptions {
    /// Full relay URL including auth query parameters.
    pub rpc_url: String,
    /// Relay protocol name; method names derive from it.
    pub protocol: String,
    /// Delay before reconnecting after the link drops.
    pub reconnect_delay: Duration,
}

impl RelayerOptions {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            protocol: IRN.to_string(),
            reconnect_delay: Duration::from_secs(1),
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// A raw message received on a subscribed topic (still encrypted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub topic: String,
    pub message: String,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayerEvent {
    Connected,
    Disconnected,
    Error { description: String },
}

// ── Commands (handle → loop) ─────────────────────────────────────────

pub(crate) enum RelayerCommand {
    Publish {
        topic: String,
        message: String,
        opts: PublishOptions,
        reply: oneshot::Sender<Result<(), WalletConnectError>>,
    },
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<String, WalletConnectError>>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<Result<(), WalletConnectError>>,
    },
    IsSubscribed {
        topic: String,
        reply: oneshot::Sender<bool>,
    },
    PendingPublishes {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

// ── Relayer (handle) ─────────────────────────────────────────────────

/// Handle to a running relayer task.
///
/// Cheap to clone. Inbound messages are delivered on the receiver returned
/// by [`Relayer::connect`].
#[derive(Clone)]
pub struct Relayer {
    cmd_tx: mpsc::Sender<RelayerCommand>,
    event_tx: broadcast::Sender<RelayerEvent>,
}

impl Relayer {
    /// Open the first link and spawn the relayer task.
    ///
    /// `pulses` drives publish retries. Failure to open the first link is
    /// returned; later disconnects are retried in the background.
    pub async fn connect(
        options: RelayerOptions,
        connector: Arc<dyn Connector>,
        pulses: broadcast::Receiver<()>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MessageEvent>), WalletConnectError> {
        let link = connector.connect(&options.rpc_url).await?;
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(64);

        let relayer_loop = r#loop::RelayerLoop::new(
            options,
            connector,
            link,
            message_tx,
            event_tx.clone(),
        );
        tokio::spawn(relayer_loop.run(cmd_rx, pulses));
        tracing::info!("relayer connected");

        Ok((Self { cmd_tx, event_tx }, message_rx))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RelayerCommand,
    ) -> Result<T, WalletConnectError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| WalletConnectError::Shutdown)?;
        rx.await.map_err(|_| WalletConnectError::Shutdown)
    }

    /// Queue a message and send it. Returns once queued and handed to the
    /// link; retries on pulses continue until the relay acknowledges.
    pub async fn publish(
        &self,
        topic: &str,
        message: &str,
        opts: PublishOptions,
    ) -> Result<(), WalletConnectError> {
        self.request(|reply| RelayerCommand::Publish {
            topic: topic.to_string(),
            message: message.to_string(),
            opts,
            reply,
        })
        .await?
    }

    /// Subscribe to a topic and return the relay subscription id.
    pub async fn subscribe(&self, topic: &str) -> Result<String, WalletConnectError> {
        self.request(|reply| RelayerCommand::Subscribe {
            topic: topic.to_string(),
            reply,
        })
        .await?
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), WalletConnectError> {
        self.request(|reply| RelayerCommand::Unsubscribe {
            topic: topic.to_string(),
            reply,
        })
        .await?
    }

    pub async fn is_subscribed(&self, topic: &str) -> bool {
        self.request(|reply| RelayerCommand::IsSubscribed {
            topic: topic.to_string(),
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Publish jobs still awaiting a relay acknowledgement.
    pub async fn pending_publishes(&self) -> usize {
        self.request(|reply| RelayerCommand::PendingPublishes { reply })
            .await
            .unwrap_or(0)
    }

    pub fn events(&self) -> broadcast::Receiver<RelayerEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the relayer task and close the link.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RelayerCommand::Shutdown).await;
    }
}
