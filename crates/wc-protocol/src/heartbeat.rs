/// Periodic pulse source.
///
/// Drives publish retries in the relayer and the expiry sweep in the
/// engine. Pulses are broadcast; a slow listener sees `Lagged` and simply
/// treats it as one pulse.
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

pub struct HeartBeat {
    interval: Duration,
    pulse_tx: broadcast::Sender<()>,
    cancel: CancellationToken,
}

impl HeartBeat {
    /// Spawn the pulse task. Must be called inside a tokio runtime.
    pub fn start(interval: Duration) -> Self {
        let (pulse_tx, _) = broadcast::channel(16);
        let cancel = CancellationToken::new();

        let tx = pulse_tx.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip first immediate tick

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // No receivers is fine.
                        let _ = tx.send(());
                    }
                }
            }
            tracing::debug!("heartbeat stopped");
        });

        Self {
            interval,
            pulse_tx,
            cancel,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.pulse_tx.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for HeartBeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pulses_every_interval() {
        let heartbeat = HeartBeat::start(Duration::from_secs(5));
        let mut pulses = heartbeat.subscribe();

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert!(pulses.try_recv().is_ok());
        assert!(pulses.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(pulses.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_channel() {
        let heartbeat = HeartBeat::start(Duration::from_secs(1));
        let mut pulses = heartbeat.subscribe();
        heartbeat.stop();
        assert!(heartbeat.is_stopped());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(pulses.try_recv().is_err());
    }
}
