/// Application events and response waiters.
///
/// Events fan out over a per-client broadcast channel. Waiters are
/// one-shot slots keyed by what they wait for; they must be registered
/// before the request that answers them is published.
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{ready, Context, Poll};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use wc_transport::RpcId;

use crate::engine::models::{
    EventArguments, Namespaces, ProposalStruct, RequestArguments, SessionStruct,
};
use crate::WalletConnectError;

#[derive(Debug, Clone, PartialEq)]
pub enum SignEvent {
    SessionProposal { id: RpcId, proposal: ProposalStruct },
    SessionConnect { session: SessionStruct },
    SessionUpdate { topic: String, namespaces: Namespaces },
    SessionExtend { topic: String },
    SessionPing { topic: String },
    SessionDelete { topic: String },
    SessionExpire { topic: String },
    SessionRequest { topic: String, id: RpcId, chain_id: String, request: RequestArguments },
    SessionEvent { topic: String, chain_id: String, event: EventArguments },
    PairingPing { topic: String },
    PairingDelete { topic: String },
    PairingExpire { topic: String },
    ProposalExpire { id: RpcId },
}

impl SignEvent {
    /// Wire-style event name (`session_connect`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            SignEvent::SessionProposal { .. } => "session_proposal",
            SignEvent::SessionConnect { .. } => "session_connect",
            SignEvent::SessionUpdate { .. } => "session_update",
            SignEvent::SessionExtend { .. } => "session_extend",
            SignEvent::SessionPing { .. } => "session_ping",
            SignEvent::SessionDelete { .. } => "session_delete",
            SignEvent::SessionExpire { .. } => "session_expire",
            SignEvent::SessionRequest { .. } => "session_request",
            SignEvent::SessionEvent { .. } => "session_event",
            SignEvent::PairingPing { .. } => "pairing_ping",
            SignEvent::PairingDelete { .. } => "pairing_delete",
            SignEvent::PairingExpire { .. } => "pairing_expire",
            SignEvent::ProposalExpire { .. } => "proposal_expire",
        }
    }
}

/// What a waiter is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// The response to request `id`.
    Response(RpcId),
    /// A settled session for the proposal `id`.
    SessionConnect(RpcId),
}

type Waiter = oneshot::Sender<Result<Value, WalletConnectError>>;

pub struct EventBus {
    tx: broadcast::Sender<SignEvent>,
    waiters: Mutex<HashMap<EventKey, Waiter>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn emit(&self, event: SignEvent) {
        tracing::debug!("event: {}", event.name());
        // No listeners is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignEvent> {
        self.tx.subscribe()
    }

    /// Register a waiter for `key`, replacing any previous one.
    pub fn register<T: DeserializeOwned>(&self, key: EventKey) -> Pending<T> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.insert(key, tx);
        }
        Pending::new(rx)
    }

    /// Complete the waiter for `key`. Returns `false` if nobody waited.
    pub fn resolve(&self, key: EventKey, outcome: Result<Value, WalletConnectError>) -> bool {
        let waiter = match self.waiters.lock() {
            Ok(mut waiters) => waiters.remove(&key),
            Err(_) => None,
        };
        match waiter {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn is_waiting(&self, key: EventKey) -> bool {
        self.waiters
            .lock()
            .map(|waiters| waiters.contains_key(&key))
            .unwrap_or(false)
    }

    /// Drop a waiter; its future resolves with `Shutdown`.
    pub fn cancel(&self, key: EventKey) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(&key);
        }
    }

    /// Drop every waiter.
    pub fn cancel_all(&self) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.clear();
        }
    }
}

/// Future resolving once a peer answers.
///
/// The answer is deserialized into `T`; acknowledgements resolve with
/// `null`, so `Pending<()>` works for them.
#[must_use = "a pending response does nothing unless awaited"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<Value, WalletConnectError>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

impl<T> Pending<T> {
    fn new(rx: oneshot::Receiver<Result<Value, WalletConnectError>>) -> Self {
        Self {
            rx,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Future for Pending<T> {
    type Output = Result<T, WalletConnectError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = ready!(Pin::new(&mut self.rx).poll(cx));
        Poll::Ready(match outcome {
            Ok(Ok(value)) => serde_json::from_value(value).map_err(Into::into),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WalletConnectError::Shutdown),
        })
    }
}
