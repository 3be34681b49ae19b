/// The engine event loop.
///
/// Consumes relayer messages one at a time and runs the expiry sweep on
/// every heartbeat pulse, until cancelled.
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Engine;
use crate::relay::MessageEvent;

impl Engine {
    pub(crate) fn spawn_loop(
        &self,
        messages: mpsc::UnboundedReceiver<MessageEvent>,
        pulses: broadcast::Receiver<()>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(run(self.clone(), messages, pulses, cancel))
    }
}

async fn run(
    engine: Engine,
    mut messages: mpsc::UnboundedReceiver<MessageEvent>,
    mut pulses: broadcast::Receiver<()>,
    cancel: CancellationToken,
) {
    let mut pulses_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            // ── 1. Inbound messages ─────────────────────────────────
            msg = messages.recv() => {
                match msg {
                    Some(event) => engine.on_message(event).await,
                    None => {
                        tracing::info!("engine: relayer gone");
                        break;
                    }
                }
            }

            // ── 2. Heartbeat: expiry sweep ──────────────────────────
            pulse = pulses.recv(), if pulses_open => {
                match pulse {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Err(e) = engine.expire_due().await {
                            tracing::warn!("engine: expiry sweep failed: {e}");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        pulses_open = false;
                    }
                }
            }
        }
    }

    tracing::debug!("engine loop stopped");
}
