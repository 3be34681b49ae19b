/// The relayer event loop.
///
/// A single task owning the link, the publish queue, the subscription set
/// and the dedup tracker.
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use wc_transport::relay_api::{
    PublishParams, RelayMethods, RelayOperation, SubscribeParams, SubscriptionParams,
    UnsubscribeParams,
};
use wc_transport::{
    Connector, ErrorPayload, JsonRpcPayload, JsonRpcRequest, JsonRpcResult, Link, RpcId,
    TransportError,
};

use super::{
    MessageEvent, MessageTracker, PublishOptions, Publisher, RelayerCommand, RelayerEvent,
    RelayerOptions, Subscriber,
};
use crate::WalletConnectError;

/// An outbound relay RPC awaiting its response.
enum PendingRpc {
    Publish {
        hash: String,
    },
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<String, WalletConnectError>>,
    },
    Resubscribe {
        topic: String,
    },
    Unsubscribe {
        reply: oneshot::Sender<Result<(), WalletConnectError>>,
    },
}

pub(super) struct RelayerLoop {
    options: RelayerOptions,
    methods: RelayMethods,
    connector: Arc<dyn Connector>,
    link: Option<Link>,
    publisher: Publisher,
    subscriber: Subscriber,
    tracker: MessageTracker,
    pending: HashMap<RpcId, PendingRpc>,
    message_tx: mpsc::UnboundedSender<MessageEvent>,
    event_tx: broadcast::Sender<RelayerEvent>,
    reconnect_at: Option<Instant>,
}

impl RelayerLoop {
    pub(super) fn new(
        options: RelayerOptions,
        connector: Arc<dyn Connector>,
        link: Link,
        message_tx: mpsc::UnboundedSender<MessageEvent>,
        event_tx: broadcast::Sender<RelayerEvent>,
    ) -> Self {
        let methods = RelayMethods::for_protocol(&options.protocol);
        Self {
            options,
            methods,
            connector,
            link: Some(link),
            publisher: Publisher::new(),
            subscriber: Subscriber::new(),
            tracker: MessageTracker::new(),
            pending: HashMap::new(),
            message_tx,
            event_tx,
            reconnect_at: None,
        }
    }

    pub(super) async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<RelayerCommand>,
        mut pulses: broadcast::Receiver<()>,
    ) {
        let mut pulses_open = true;

        loop {
            tokio::select! {
                // ── 1. Inbound frames ───────────────────────────────
                frame = recv_frame(&mut self.link) => {
                    match frame {
                        Some(text) => self.handle_frame(&text).await,
                        None => self.on_link_closed(),
                    }
                }

                // ── 2. Commands from handles ────────────────────────
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(RelayerCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }

                // ── 3. Heartbeat: retry unacknowledged publishes ────
                pulse = pulses.recv(), if pulses_open => {
                    match pulse {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            self.republish_all().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("relayer: heartbeat stopped");
                            pulses_open = false;
                        }
                    }
                }

                // ── 4. Reconnect timer ──────────────────────────────
                () = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.reconnect().await;
                }
            }
        }

        self.fail_pending();
        tracing::info!("relayer stopped");
    }

    // ── Inbound ──────────────────────────────────────────────────────

    async fn handle_frame(&mut self, text: &str) {
        let payload = match JsonRpcPayload::parse(text) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!("relayer: bad frame: {e}");
                return;
            }
        };

        match payload {
            JsonRpcPayload::Request(request) => {
                if RelayOperation::from_method(&request.method) != Some(RelayOperation::Subscription) {
                    tracing::debug!("relayer: ignoring relay request {}", request.method);
                    return;
                }
                let ack = JsonRpcResult::new(request.id, Value::Bool(true));
                if let Err(e) = self.send(&ack).await {
                    tracing::warn!("relayer: failed to ack subscription: {e}");
                }
                match serde_json::from_value::<SubscriptionParams>(request.params) {
                    Ok(params) => self.on_message(params.data.topic, params.data.message),
                    Err(e) => tracing::warn!("relayer: bad subscription params: {e}"),
                }
            }
            JsonRpcPayload::Result(response) => self.on_response(response.id, Ok(response.result)),
            JsonRpcPayload::Error(response) => self.on_response(response.id, Err(response.error)),
        }
    }

    fn on_message(&mut self, topic: String, message: String) {
        if !self.subscriber.is_subscribed(&topic) {
            tracing::debug!("relayer: dropping message for unsubscribed topic {topic}");
            return;
        }
        if !self.tracker.set(&topic, &message) {
            tracing::debug!("relayer: duplicate message on {topic}");
            return;
        }
        if self.message_tx.send(MessageEvent { topic, message }).is_err() {
            tracing::debug!("relayer: message receiver dropped");
        }
    }

    fn on_response(&mut self, id: RpcId, outcome: Result<Value, ErrorPayload>) {
        let Some(pending) = self.pending.remove(&id) else {
            tracing::debug!("relayer: response for unknown id {id}");
            return;
        };

        match (pending, outcome) {
            (PendingRpc::Publish { hash }, Ok(_)) => {
                if self.publisher.acknowledge(&hash) {
                    tracing::debug!("relayer: publish {hash} acknowledged");
                }
                self.drop_pending_publishes(&hash);
            }
            (PendingRpc::Publish { hash }, Err(e)) => {
                tracing::warn!("relayer: publish {hash} rejected ({}), will retry", e.message);
            }
            (PendingRpc::Subscribe { topic, reply }, Ok(result)) => {
                let id = subscription_id(result);
                self.subscriber.activate(&topic, id.clone());
                let _ = reply.send(Ok(id));
            }
            (PendingRpc::Subscribe { topic, reply }, Err(e)) => {
                self.subscriber.remove(&topic);
                let _ = reply.send(Err(rpc_error(e)));
            }
            (PendingRpc::Resubscribe { topic }, Ok(result)) => {
                self.subscriber.activate(&topic, subscription_id(result));
            }
            (PendingRpc::Resubscribe { topic }, Err(e)) => {
                tracing::warn!("relayer: resubscribe to {topic} failed: {}", e.message);
            }
            (PendingRpc::Unsubscribe { reply }, Ok(_)) => {
                let _ = reply.send(Ok(()));
            }
            (PendingRpc::Unsubscribe { reply }, Err(e)) => {
                let _ = reply.send(Err(rpc_error(e)));
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: RelayerCommand) {
        match cmd {
            RelayerCommand::Publish {
                topic,
                message,
                opts,
                reply,
            } => {
                let hash = self
                    .publisher
                    .enqueue(&topic, &message, opts, &self.options.protocol);
                self.tracker.set(&topic, &message);
                if self.link.is_some() {
                    self.send_publish(&hash).await;
                }
                let _ = reply.send(Ok(()));
            }
            RelayerCommand::Subscribe { topic, reply } => {
                if let Some(id) = self.subscriber.subscription_id(&topic) {
                    let _ = reply.send(Ok(id.to_string()));
                    return;
                }
                if self.link.is_none() {
                    let _ = reply.send(Err(TransportError::Closed.into()));
                    return;
                }
                self.subscriber.mark_pending(&topic);
                let request = JsonRpcRequest::new(
                    self.methods.subscribe.clone(),
                    SubscribeParams {
                        topic: topic.clone(),
                    },
                );
                match self.send(&request).await {
                    Ok(()) => {
                        self.pending
                            .insert(request.id, PendingRpc::Subscribe { topic, reply });
                    }
                    Err(e) => {
                        self.subscriber.remove(&topic);
                        let _ = reply.send(Err(e));
                    }
                }
            }
            RelayerCommand::Unsubscribe { topic, reply } => {
                self.tracker.forget(&topic);
                let Some(id) = self.subscriber.remove(&topic) else {
                    let _ = reply.send(Ok(()));
                    return;
                };
                if self.link.is_none() {
                    // The relay dropped our subscriptions with the link.
                    let _ = reply.send(Ok(()));
                    return;
                }
                let request = JsonRpcRequest::new(
                    self.methods.unsubscribe.clone(),
                    UnsubscribeParams { topic, id },
                );
                match self.send(&request).await {
                    Ok(()) => {
                        self.pending
                            .insert(request.id, PendingRpc::Unsubscribe { reply });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            RelayerCommand::IsSubscribed { topic, reply } => {
                let _ = reply.send(self.subscriber.is_subscribed(&topic));
            }
            RelayerCommand::PendingPublishes { reply } => {
                let _ = reply.send(self.publisher.len());
            }
            RelayerCommand::Shutdown => {}
        }
    }

    // ── Outbound ─────────────────────────────────────────────────────

    async fn send<T: Serialize>(&self, payload: &T) -> Result<(), WalletConnectError> {
        match &self.link {
            Some(link) => link.send(payload).await.map_err(Into::into),
            None => Err(TransportError::Closed.into()),
        }
    }

    async fn send_publish(&mut self, hash: &str) {
        let Some(job) = self.publisher.get(hash) else {
            return;
        };
        let PublishOptions { ttl, tag, prompt } = job.opts;
        let request = JsonRpcRequest::new(
            self.methods.publish.clone(),
            PublishParams {
                topic: job.topic.clone(),
                message: job.message.clone(),
                ttl,
                tag,
                prompt,
            },
        );
        self.drop_pending_publishes(hash);
        match self.send(&request).await {
            Ok(()) => {
                self.pending.insert(
                    request.id,
                    PendingRpc::Publish {
                        hash: hash.to_string(),
                    },
                );
            }
            Err(e) => tracing::debug!("relayer: publish {hash} not sent: {e}"),
        }
    }

    async fn republish_all(&mut self) {
        if self.link.is_none() || self.publisher.is_empty() {
            return;
        }
        let hashes = self.publisher.pending();
        tracing::debug!("relayer: retrying {} unacknowledged publishes", hashes.len());
        for hash in hashes {
            self.send_publish(&hash).await;
        }
    }

    /// Only the latest RPC per job is tracked.
    fn drop_pending_publishes(&mut self, hash: &str) {
        self.pending
            .retain(|_, rpc| !matches!(rpc, PendingRpc::Publish { hash: h } if h == hash));
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    fn on_link_closed(&mut self) {
        tracing::warn!(
            "relayer: link closed, reconnecting in {:?}",
            self.options.reconnect_delay
        );
        self.link = None;
        self.fail_pending();
        let _ = self.event_tx.send(RelayerEvent::Disconnected);
        self.reconnect_at = Some(Instant::now() + self.options.reconnect_delay);
    }

    async fn reconnect(&mut self) {
        match self.connector.connect(&self.options.rpc_url).await {
            Ok(link) => {
                self.link = Some(link);
                tracing::info!("relayer: reconnected");
                let _ = self.event_tx.send(RelayerEvent::Connected);
                self.resubscribe_all().await;
                self.republish_all().await;
            }
            Err(e) => {
                tracing::warn!("relayer: reconnect failed: {e}");
                let _ = self.event_tx.send(RelayerEvent::Error {
                    description: e.to_string(),
                });
                self.reconnect_at = Some(Instant::now() + self.options.reconnect_delay);
            }
        }
    }

    async fn resubscribe_all(&mut self) {
        for topic in self.subscriber.topics() {
            let request = JsonRpcRequest::new(
                self.methods.subscribe.clone(),
                SubscribeParams {
                    topic: topic.clone(),
                },
            );
            match self.send(&request).await {
                Ok(()) => {
                    self.pending
                        .insert(request.id, PendingRpc::Resubscribe { topic });
                }
                Err(e) => tracing::warn!("relayer: resubscribe to {topic} not sent: {e}"),
            }
        }
    }

    /// Resolve every in-flight RPC after the link is gone.
    ///
    /// Publish jobs stay queued; failed first-time subscriptions are forgotten.
    fn fail_pending(&mut self) {
        for (_, rpc) in self.pending.drain() {
            match rpc {
                PendingRpc::Subscribe { topic, reply } => {
                    self.subscriber.remove(&topic);
                    let _ = reply.send(Err(TransportError::Closed.into()));
                }
                PendingRpc::Unsubscribe { reply } => {
                    let _ = reply.send(Ok(()));
                }
                PendingRpc::Publish { .. } | PendingRpc::Resubscribe { .. } => {}
            }
        }
    }
}

async fn recv_frame(link: &mut Option<Link>) -> Option<String> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn subscription_id(result: Value) -> String {
    match result {
        Value::String(id) => id,
        other => other.to_string(),
    }
}

fn rpc_error(e: ErrorPayload) -> WalletConnectError {
    TransportError::Rpc {
        code: e.code,
        message: e.message,
    }
    .into()
}
