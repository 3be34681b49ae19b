/// Pairing/session protocol engine.
///
/// Drives proposal → settlement → active session → termination on top of
/// the crypto store and the relayer. All records live in [`EngineState`]
/// behind one async mutex; caller operations and inbound handlers take it
/// for the whole of a state transition.
///
/// Every outbound request is recorded in the JSON-RPC history before it is
/// published, and its waiter is registered before the publish call, so a
/// fast peer answer is never lost.
mod handlers;
mod r#loop;
pub mod methods;
pub mod models;
pub mod uri;
pub mod validation;

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use wc_transport::{JsonRpcError, JsonRpcRequest, JsonRpcResult, RpcId};

use crate::crypto::{generate_random_key, Crypto, EncodeOptions};
use crate::error::{ErrorResponse, SdkError};
use crate::events::{EventBus, EventKey, Pending, SignEvent};
use crate::expirer::{Expirer, ExpirerTarget};
use crate::history::JsonRpcHistory;
use crate::relay::Relayer;
use crate::storage::KeyValueStorage;
use crate::store::Store;
use crate::types::{calc_expiry, is_expired, now_secs, FIVE_MINUTES, SEVEN_DAYS, THIRTY_DAYS};
use crate::WalletConnectError;

use methods::Method;
use models::{
    EventArguments, Metadata, Namespaces, PairingPingParams, PairingStruct, Participant,
    ProposalStruct, RelayProtocolOptions, RequestArguments, RequiredNamespaces,
    SessionEventParams, SessionExtendParams, SessionPingParams, SessionProposeParams,
    SessionRequestParams, SessionSettleParams, SessionStruct, SessionUpdateParams,
};
use uri::PairingUri;

pub const PAIRING_NAME: &str = "pairing";
pub const SESSION_NAME: &str = "session";
pub const PROPOSAL_NAME: &str = "proposal";

const EVENT_CAPACITY: usize = 256;

// ── Operation params / results ───────────────────────────────────────

/// Arguments of [`Engine::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub required_namespaces: RequiredNamespaces,
    /// Reuse an active pairing instead of creating one.
    pub pairing_topic: Option<String>,
    pub relays: Option<Vec<RelayProtocolOptions>>,
    /// Proposal lifetime in seconds; five minutes if unset.
    pub expiry: Option<u64>,
}

impl ConnectParams {
    pub fn new(required_namespaces: RequiredNamespaces) -> Self {
        Self {
            required_namespaces,
            ..Self::default()
        }
    }

    pub fn pairing_topic(mut self, topic: impl Into<String>) -> Self {
        self.pairing_topic = Some(topic.into());
        self
    }

    pub fn relays(mut self, relays: Vec<RelayProtocolOptions>) -> Self {
        self.relays = Some(relays);
        self
    }

    pub fn expiry(mut self, ttl_secs: u64) -> Self {
        self.expiry = Some(ttl_secs);
        self
    }
}

#[derive(Debug)]
pub struct ConnectData {
    /// Pairing URI to hand to the wallet; `None` when a pairing was reused.
    pub uri: Option<String>,
    pub pairing_topic: String,
    /// Resolves with the settled session or the peer's rejection.
    pub approval: Pending<SessionStruct>,
}

#[derive(Debug)]
pub struct ApproveData {
    pub topic: String,
    /// Resolves once the peer acknowledges the settlement.
    pub acknowledged: Pending<SessionStruct>,
}

// ── State ────────────────────────────────────────────────────────────

pub(crate) struct EngineState {
    pairings: Store<String, PairingStruct>,
    sessions: Store<String, SessionStruct>,
    proposals: Store<RpcId, ProposalStruct>,
    history: JsonRpcHistory,
    expirer: Expirer,
    /// Session topic derived from a proposal response → that proposal id.
    pending_settlements: HashMap<String, RpcId>,
}

impl EngineState {
    fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            pairings: Store::new(storage.clone(), PAIRING_NAME),
            sessions: Store::new(storage.clone(), SESSION_NAME),
            proposals: Store::new(storage.clone(), PROPOSAL_NAME),
            history: JsonRpcHistory::new(storage.clone()),
            expirer: Expirer::new(storage),
            pending_settlements: HashMap::new(),
        }
    }
}

struct EngineInner {
    crypto: Arc<Crypto>,
    relayer: Relayer,
    metadata: Metadata,
    state: Mutex<EngineState>,
    events: EventBus,
}

/// Handle to the protocol engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        crypto: Arc<Crypto>,
        relayer: Relayer,
        storage: Arc<dyn KeyValueStorage>,
        metadata: Metadata,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                crypto,
                relayer,
                metadata,
                state: Mutex::new(EngineState::new(storage)),
                events: EventBus::new(EVENT_CAPACITY),
            }),
        }
    }

    /// Restore records, drop anything stale and resubscribe survivors.
    pub async fn init(&self) -> Result<(), WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        state.pairings.init().await?;
        state.sessions.init().await?;
        state.proposals.init().await?;
        state.history.init().await?;
        state.expirer.init().await?;

        self.cleanup(&mut state).await?;

        let topics: Vec<String> = state
            .pairings
            .keys()
            .into_iter()
            .chain(state.sessions.keys())
            .collect();
        for topic in &topics {
            self.inner.relayer.subscribe(topic).await?;
        }
        tracing::info!(
            "engine initialized: {} pairings, {} sessions, {} proposals",
            state.pairings.len(),
            state.sessions.len(),
            state.proposals.len()
        );
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<SignEvent> {
        self.inner.events.subscribe()
    }

    /// Fail every outstanding response future with `Shutdown`.
    pub(crate) fn cancel_pending(&self) {
        self.inner.events.cancel_all();
    }

    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    // ── Pairing ──────────────────────────────────────────────────────

    /// Propose a session to a wallet.
    pub async fn connect(&self, params: ConnectParams) -> Result<ConnectData, WalletConnectError> {
        validation::validate_required_namespaces(&params.required_namespaces, "connect()")?;
        let mut state = self.inner.state.lock().await;

        let (pairing_topic, uri) = match &params.pairing_topic {
            Some(topic) => {
                let pairing = self.valid_pairing(&mut state, topic).await?;
                if !pairing.active {
                    return Err(WalletConnectError::missing(format!(
                        "connect() pairing topic {topic} is not active"
                    )));
                }
                (pairing.topic, None)
            }
            None => {
                let (pairing, uri) = self.create_pairing(&mut state).await?;
                (pairing.topic, Some(uri))
            }
        };

        let public_key = self.inner.crypto.generate_key_pair().await?;
        let relays = params
            .relays
            .unwrap_or_else(|| vec![RelayProtocolOptions::default()]);
        let proposer = Participant {
            public_key,
            metadata: self.inner.metadata.clone(),
        };
        let request = JsonRpcRequest::new(
            Method::SessionPropose.as_str(),
            SessionProposeParams {
                relays: relays.clone(),
                proposer: proposer.clone(),
                required_namespaces: params.required_namespaces.clone(),
            },
        );
        let proposal = ProposalStruct {
            id: request.id,
            expiry: calc_expiry(params.expiry.unwrap_or(FIVE_MINUTES)),
            relays,
            proposer,
            required_namespaces: params.required_namespaces,
            pairing_topic: pairing_topic.clone(),
        };
        self.set_proposal(&mut state, proposal).await?;

        let key = EventKey::SessionConnect(request.id);
        let approval = self.inner.events.register(key);
        if let Err(e) = self
            .publish_request(&mut state, &pairing_topic, Method::SessionPropose, &request, None)
            .await
        {
            self.inner.events.cancel(key);
            return Err(e);
        }
        tracing::info!("proposed session {} on pairing {pairing_topic}", request.id);

        Ok(ConnectData {
            uri,
            pairing_topic,
            approval,
        })
    }

    /// Register a pairing from a `wc:` URI and start listening on it.
    pub async fn pair(&self, uri: &str) -> Result<PairingStruct, WalletConnectError> {
        let uri = PairingUri::parse(uri)?;
        let mut state = self.inner.state.lock().await;
        if let Ok(existing) = state.pairings.get(&uri.topic) {
            if existing.active {
                return Err(WalletConnectError::RecordAlreadyExists {
                    context: format!("pair() active pairing with topic: {}", uri.topic),
                });
            }
        }

        self.inner
            .crypto
            .set_sym_key(&uri.sym_key, Some(&uri.topic))
            .await?;
        let pairing = PairingStruct {
            topic: uri.topic.clone(),
            expiry: calc_expiry(FIVE_MINUTES),
            relay: uri.relay,
            active: false,
            peer_metadata: None,
        };
        self.set_pairing(&mut state, pairing.clone()).await?;
        self.inner.relayer.subscribe(&pairing.topic).await?;
        tracing::info!("paired on topic {}", pairing.topic);
        Ok(pairing)
    }

    async fn create_pairing(
        &self,
        state: &mut EngineState,
    ) -> Result<(PairingStruct, String), WalletConnectError> {
        let sym_key = generate_random_key();
        let topic = self.inner.crypto.set_sym_key(&sym_key, None).await?;
        let pairing = PairingStruct {
            topic: topic.clone(),
            expiry: calc_expiry(FIVE_MINUTES),
            relay: RelayProtocolOptions::default(),
            active: false,
            peer_metadata: None,
        };
        let uri = PairingUri::new(&topic, &sym_key, pairing.relay.clone()).format();
        self.set_pairing(state, pairing.clone()).await?;
        self.inner.relayer.subscribe(&topic).await?;
        tracing::debug!("created pairing {topic}");
        Ok((pairing, uri))
    }

    // ── Proposal answers ─────────────────────────────────────────────

    /// Accept a proposal with the given namespaces.
    pub async fn approve(
        &self,
        id: RpcId,
        namespaces: Namespaces,
        relay_protocol: Option<String>,
    ) -> Result<ApproveData, WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        let proposal = self.valid_proposal(&mut state, id).await?;
        validation::validate_namespaces(&namespaces, "approve()")?;
        validation::validate_conformance(&proposal.required_namespaces, &namespaces, "approve()")?;

        let crypto = &self.inner.crypto;
        let self_public_key = crypto.generate_key_pair().await?;
        let session_topic = crypto
            .generate_shared_key(&self_public_key, &proposal.proposer.public_key, None)
            .await?;
        self.inner.relayer.subscribe(&session_topic).await?;

        let relay = RelayProtocolOptions {
            protocol: relay_protocol
                .unwrap_or_else(|| RelayProtocolOptions::default().protocol),
            data: None,
        };
        let self_participant = Participant {
            public_key: self_public_key.clone(),
            metadata: self.inner.metadata.clone(),
        };
        let expiry = calc_expiry(SEVEN_DAYS);
        let session = SessionStruct {
            topic: session_topic.clone(),
            relay: relay.clone(),
            expiry,
            acknowledged: false,
            controller: self_public_key.clone(),
            namespaces: namespaces.clone(),
            required_namespaces: proposal.required_namespaces.clone(),
            self_: self_participant.clone(),
            peer: proposal.proposer.clone(),
        };
        self.set_session(&mut state, session).await?;

        let settle = JsonRpcRequest::new(
            Method::SessionSettle.as_str(),
            SessionSettleParams {
                relay: relay.clone(),
                namespaces,
                required_namespaces: proposal.required_namespaces.clone(),
                controller: self_participant,
                expiry,
            },
        );
        let key = EventKey::Response(settle.id);
        let acknowledged = self.inner.events.register(key);
        if let Err(e) = self
            .publish_request(&mut state, &session_topic, Method::SessionSettle, &settle, None)
            .await
        {
            self.inner.events.cancel(key);
            return Err(e);
        }

        let accepted = models::SessionProposeResponse {
            relay,
            responder_public_key: self_public_key,
        };
        self.publish_result(&proposal.pairing_topic, Method::SessionPropose, id, &accepted)
            .await?;
        state
            .history
            .answer(id, serde_json::to_value(&accepted)?)
            .await?;

        self.delete_proposal(&mut state, id).await?;
        self.activate_pairing(
            &mut state,
            &proposal.pairing_topic,
            Some(proposal.proposer.metadata.clone()),
        )
        .await?;
        tracing::info!("approved proposal {id}, session {session_topic}");

        Ok(ApproveData {
            topic: session_topic,
            acknowledged,
        })
    }

    /// Decline a proposal; the proposer's `connect` future fails with `reason`.
    pub async fn reject(&self, id: RpcId, reason: ErrorResponse) -> Result<(), WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        let proposal = self.valid_proposal(&mut state, id).await?;
        let answer = serde_json::to_value(&reason)?;
        self.publish_error(&proposal.pairing_topic, Some(Method::SessionPropose), id, reason)
            .await?;
        state.history.answer(id, answer).await?;
        self.delete_proposal(&mut state, id).await?;
        tracing::info!("rejected proposal {id}");
        Ok(())
    }

    // ── Session mutations ────────────────────────────────────────────

    /// Replace the session namespaces locally and notify the peer.
    pub async fn update(
        &self,
        topic: &str,
        namespaces: Namespaces,
    ) -> Result<Pending<()>, WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        let session = self.valid_controller_session(&mut state, topic, SdkError::UnauthorizedUpdateRequest).await?;
        validation::validate_namespaces(&namespaces, "update()")?;
        validation::validate_conformance(&session.required_namespaces, &namespaces, "update()")?;

        let pending = self
            .send_awaited(
                &mut state,
                topic,
                Method::SessionUpdate,
                SessionUpdateParams {
                    namespaces: namespaces.clone(),
                },
                None,
            )
            .await?;
        state
            .sessions
            .update(&topic.to_string(), session.with_namespaces(namespaces))
            .await?;
        Ok(pending)
    }

    /// Push the session expiry out by seven days.
    pub async fn extend(&self, topic: &str) -> Result<Pending<()>, WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        let session = self.valid_controller_session(&mut state, topic, SdkError::UnauthorizedExtendRequest).await?;
        let expiry = calc_expiry(SEVEN_DAYS);

        let pending = self
            .send_awaited(
                &mut state,
                topic,
                Method::SessionExtend,
                SessionExtendParams { expiry },
                None,
            )
            .await?;
        self.set_session(&mut state, session.with_expiry(expiry)).await?;
        Ok(pending)
    }

    /// Ping the peer on a session or pairing topic and wait for its ack.
    pub async fn ping(&self, topic: &str) -> Result<(), WalletConnectError> {
        let pending: Pending<()> = {
            let mut state = self.inner.state.lock().await;
            if state.sessions.has(&topic.to_string()) {
                self.valid_session(&mut state, topic).await?;
                self.send_awaited(&mut state, topic, Method::SessionPing, SessionPingParams {}, None)
                    .await?
            } else if state.pairings.has(&topic.to_string()) {
                self.valid_pairing(&mut state, topic).await?;
                self.send_awaited(&mut state, topic, Method::PairingPing, PairingPingParams {}, None)
                    .await?
            } else {
                return Err(WalletConnectError::NoMatchingTopic {
                    context: "session or pairing".into(),
                    topic: topic.to_string(),
                });
            }
        };
        pending.await
    }

    /// Tell the peer and drop the session or pairing locally.
    ///
    /// The delete request is not awaited, and failing to send it does not
    /// keep the record.
    pub async fn disconnect(&self, topic: &str, reason: ErrorResponse) -> Result<(), WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        if state.sessions.has(&topic.to_string()) {
            let request = JsonRpcRequest::new(Method::SessionDelete.as_str(), reason);
            if let Err(e) = self
                .publish_request(&mut state, topic, Method::SessionDelete, &request, None)
                .await
            {
                tracing::warn!("failed to notify peer of session delete on {topic}: {e}");
            }
            self.delete_session(&mut state, topic).await?;
        } else if state.pairings.has(&topic.to_string()) {
            let request = JsonRpcRequest::new(Method::PairingDelete.as_str(), reason);
            if let Err(e) = self
                .publish_request(&mut state, topic, Method::PairingDelete, &request, None)
                .await
            {
                tracing::warn!("failed to notify peer of pairing delete on {topic}: {e}");
            }
            self.delete_pairing(&mut state, topic).await?;
        } else {
            return Err(WalletConnectError::NoMatchingTopic {
                context: "session or pairing".into(),
                topic: topic.to_string(),
            });
        }
        tracing::info!("disconnected {topic}");
        Ok(())
    }

    // ── Session traffic ──────────────────────────────────────────────

    /// Send an application request to the wallet and await its answer.
    pub async fn request(
        &self,
        topic: &str,
        chain_id: &str,
        request: RequestArguments,
    ) -> Result<Pending<Value>, WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        let session = self.valid_session(&mut state, topic).await?;
        if !validation::is_authorized_chain(&session.namespaces, chain_id) {
            return Err(SdkError::UnsupportedChains
                .with_context(format!("request() chain {chain_id} not in session {topic}")));
        }
        if !validation::is_authorized_method(&session.namespaces, chain_id, &request.method) {
            return Err(SdkError::UnauthorizedMethod.with_context(format!(
                "request() method {} on {chain_id}",
                request.method
            )));
        }
        self.send_awaited(
            &mut state,
            topic,
            Method::SessionRequest,
            SessionRequestParams {
                request,
                chain_id: chain_id.to_string(),
            },
            Some(chain_id),
        )
        .await
    }

    /// Answer a `session_request` received from the peer.
    ///
    /// Each request is answered once; unknown or already answered ids fail
    /// with `NoMatchingId`.
    pub async fn respond(
        &self,
        topic: &str,
        id: RpcId,
        response: Result<Value, ErrorResponse>,
    ) -> Result<(), WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        self.valid_session(&mut state, topic).await?;
        let record = state.history.pending_inbound(topic, id)?;
        if record.request.method != Method::SessionRequest.as_str() {
            return Err(WalletConnectError::NoMatchingId {
                context: format!("session request on {topic}"),
                id,
            });
        }
        let answer = match response {
            Ok(result) => {
                self.publish_result(topic, Method::SessionRequest, id, &result)
                    .await?;
                result
            }
            Err(error) => {
                let answer = serde_json::to_value(&error)?;
                self.publish_error(topic, Some(Method::SessionRequest), id, error)
                    .await?;
                answer
            }
        };
        state.history.answer(id, answer).await
    }

    /// Emit an application event to the peer. Not awaited.
    pub async fn emit(
        &self,
        topic: &str,
        chain_id: &str,
        event: EventArguments,
    ) -> Result<(), WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        let session = self.valid_session(&mut state, topic).await?;
        if !validation::is_authorized_event(&session.namespaces, chain_id, &event.name) {
            return Err(SdkError::UnauthorizedEvent
                .with_context(format!("emit() event {} on {chain_id}", event.name)));
        }
        let request = JsonRpcRequest::new(
            Method::SessionEvent.as_str(),
            SessionEventParams {
                event,
                chain_id: chain_id.to_string(),
            },
        );
        self.publish_request(&mut state, topic, Method::SessionEvent, &request, Some(chain_id))
            .await
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Acknowledged, unexpired sessions granting at least `required`.
    pub async fn find(&self, required: &RequiredNamespaces) -> Vec<SessionStruct> {
        let state = self.inner.state.lock().await;
        state
            .sessions
            .values()
            .into_iter()
            .filter(|s| s.acknowledged && !is_expired(s.expiry))
            .filter(|s| validation::is_superset(&s.namespaces, required))
            .collect()
    }

    pub async fn pairings(&self) -> Vec<PairingStruct> {
        self.inner.state.lock().await.pairings.values()
    }

    pub async fn sessions(&self) -> Vec<SessionStruct> {
        self.inner.state.lock().await.sessions.values()
    }

    pub async fn proposals(&self) -> Vec<ProposalStruct> {
        self.inner.state.lock().await.proposals.values()
    }

    pub async fn pending_requests(&self, topic: &str) -> Vec<crate::history::JsonRpcRecord> {
        self.inner.state.lock().await.history.pending(topic)
    }

    // ── Publishing ───────────────────────────────────────────────────

    async fn publish_request<T: Serialize>(
        &self,
        state: &mut EngineState,
        topic: &str,
        method: Method,
        request: &JsonRpcRequest<T>,
        chain_id: Option<&str>,
    ) -> Result<(), WalletConnectError> {
        state.history.set(topic, request, chain_id).await?;
        let message = self
            .inner
            .crypto
            .encode(topic, request, EncodeOptions::default())
            .await?;
        tracing::debug!("-> {method} {} on {topic}", request.id);
        self.inner
            .relayer
            .publish(topic, &message, method.request_opts())
            .await
    }

    /// Build a request, register its waiter, then publish it.
    async fn send_awaited<T: Serialize, R: DeserializeOwned>(
        &self,
        state: &mut EngineState,
        topic: &str,
        method: Method,
        params: T,
        chain_id: Option<&str>,
    ) -> Result<Pending<R>, WalletConnectError> {
        let request = JsonRpcRequest::new(method.as_str(), params);
        let key = EventKey::Response(request.id);
        let pending = self.inner.events.register(key);
        if let Err(e) = self
            .publish_request(state, topic, method, &request, chain_id)
            .await
        {
            self.inner.events.cancel(key);
            return Err(e);
        }
        Ok(pending)
    }

    async fn publish_result<T: Serialize>(
        &self,
        topic: &str,
        method: Method,
        id: RpcId,
        result: T,
    ) -> Result<(), WalletConnectError> {
        let response = JsonRpcResult::new(id, result);
        let message = self
            .inner
            .crypto
            .encode(topic, &response, EncodeOptions::default())
            .await?;
        tracing::debug!("-> {method} result {id} on {topic}");
        self.inner
            .relayer
            .publish(topic, &message, method.response_opts())
            .await
    }

    async fn publish_error(
        &self,
        topic: &str,
        method: Option<Method>,
        id: RpcId,
        error: ErrorResponse,
    ) -> Result<(), WalletConnectError> {
        let opts = method.map(Method::response_opts).unwrap_or_default();
        let response = JsonRpcError::new(id, error);
        let message = self
            .inner
            .crypto
            .encode(topic, &response, EncodeOptions::default())
            .await?;
        tracing::debug!("-> error {id} on {topic}: {}", response.error.message);
        self.inner.relayer.publish(topic, &message, opts).await
    }

    // ── Record validation ────────────────────────────────────────────

    async fn valid_session(
        &self,
        state: &mut EngineState,
        topic: &str,
    ) -> Result<SessionStruct, WalletConnectError> {
        let Ok(session) = state.sessions.get(&topic.to_string()) else {
            return Err(WalletConnectError::NoMatchingTopic {
                context: "session".into(),
                topic: topic.to_string(),
            });
        };
        if is_expired(session.expiry) {
            self.delete_session(state, topic).await?;
            return Err(WalletConnectError::Expired {
                context: format!("session topic: {topic}"),
            });
        }
        Ok(session)
    }

    async fn valid_controller_session(
        &self,
        state: &mut EngineState,
        topic: &str,
        unauthorized: SdkError,
    ) -> Result<SessionStruct, WalletConnectError> {
        let session = self.valid_session(state, topic).await?;
        if !session.is_controller() {
            return Err(unauthorized.with_context(format!("session {topic}: not the controller")));
        }
        Ok(session)
    }

    async fn valid_pairing(
        &self,
        state: &mut EngineState,
        topic: &str,
    ) -> Result<PairingStruct, WalletConnectError> {
        let Ok(pairing) = state.pairings.get(&topic.to_string()) else {
            return Err(WalletConnectError::NoMatchingTopic {
                context: "pairing".into(),
                topic: topic.to_string(),
            });
        };
        if is_expired(pairing.expiry) {
            self.delete_pairing(state, topic).await?;
            return Err(WalletConnectError::Expired {
                context: format!("pairing topic: {topic}"),
            });
        }
        Ok(pairing)
    }

    async fn valid_proposal(
        &self,
        state: &mut EngineState,
        id: RpcId,
    ) -> Result<ProposalStruct, WalletConnectError> {
        let Ok(proposal) = state.proposals.get(&id) else {
            return Err(WalletConnectError::NoMatchingId {
                context: "proposal".into(),
                id,
            });
        };
        if is_expired(proposal.expiry) {
            self.delete_proposal(state, id).await?;
            return Err(WalletConnectError::Expired {
                context: format!("proposal id: {id}"),
            });
        }
        Ok(proposal)
    }

    // ── Record bookkeeping ───────────────────────────────────────────

    async fn set_pairing(
        &self,
        state: &mut EngineState,
        pairing: PairingStruct,
    ) -> Result<(), WalletConnectError> {
        state
            .expirer
            .set(&ExpirerTarget::Topic(pairing.topic.clone()), pairing.expiry)
            .await?;
        state.pairings.set(pairing.topic.clone(), pairing).await
    }

    async fn set_session(
        &self,
        state: &mut EngineState,
        session: SessionStruct,
    ) -> Result<(), WalletConnectError> {
        state
            .expirer
            .set(&ExpirerTarget::Topic(session.topic.clone()), session.expiry)
            .await?;
        state.sessions.set(session.topic.clone(), session).await
    }

    async fn set_proposal(
        &self,
        state: &mut EngineState,
        proposal: ProposalStruct,
    ) -> Result<(), WalletConnectError> {
        state
            .expirer
            .set(&ExpirerTarget::Id(proposal.id), proposal.expiry)
            .await?;
        state.proposals.set(proposal.id, proposal).await
    }

    /// Mark a pairing active after a settlement and extend it to thirty days.
    async fn activate_pairing(
        &self,
        state: &mut EngineState,
        topic: &str,
        peer_metadata: Option<Metadata>,
    ) -> Result<(), WalletConnectError> {
        let Ok(pairing) = state.pairings.get(&topic.to_string()) else {
            tracing::debug!("activate: pairing {topic} is gone");
            return Ok(());
        };
        let mut active = pairing.activated(calc_expiry(THIRTY_DAYS));
        if peer_metadata.is_some() {
            active.peer_metadata = peer_metadata;
        }
        self.set_pairing(state, active).await
    }

    async fn delete_session(&self, state: &mut EngineState, topic: &str) -> Result<(), WalletConnectError> {
        let key = topic.to_string();
        let self_public_key = state.sessions.get(&key).ok().map(|s| s.self_.public_key);
        state.sessions.delete(&key).await?;
        state.expirer.delete(&ExpirerTarget::Topic(key)).await?;
        state.history.delete_topic(topic).await?;
        state.pending_settlements.remove(topic);
        self.forget_keys(topic, self_public_key.as_deref()).await;
        self.leave_topic(topic).await;
        tracing::debug!("deleted session {topic}");
        Ok(())
    }

    async fn delete_pairing(&self, state: &mut EngineState, topic: &str) -> Result<(), WalletConnectError> {
        let key = topic.to_string();
        state.pairings.delete(&key).await?;
        state.expirer.delete(&ExpirerTarget::Topic(key)).await?;
        state.history.delete_topic(topic).await?;
        for proposal in state.proposals.values() {
            if proposal.pairing_topic == topic {
                self.delete_proposal(state, proposal.id).await?;
            }
        }
        self.forget_keys(topic, None).await;
        self.leave_topic(topic).await;
        tracing::debug!("deleted pairing {topic}");
        Ok(())
    }

    /// Unsubscribe from a topic whose record is already gone. Messages still
    /// arriving for it cannot be decrypted any more.
    async fn leave_topic(&self, topic: &str) {
        if let Err(e) = self.inner.relayer.unsubscribe(topic).await {
            tracing::warn!("failed to unsubscribe from {topic}: {e}");
        }
    }

    async fn delete_proposal(&self, state: &mut EngineState, id: RpcId) -> Result<(), WalletConnectError> {
        state.proposals.delete(&id).await?;
        state.expirer.delete(&ExpirerTarget::Id(id)).await
    }

    /// Drop the symmetric key (and own key pair) of a closed topic.
    async fn forget_keys(&self, topic: &str, self_public_key: Option<&str>) {
        let crypto = &self.inner.crypto;
        if let Err(e) = crypto.delete_sym_key(topic).await {
            tracing::debug!("no symmetric key to drop for {topic}: {e}");
        }
        if let Some(public_key) = self_public_key {
            if let Err(e) = crypto.delete_key_pair(public_key).await {
                tracing::debug!("no key pair to drop for {topic}: {e}");
            }
        }
    }

    // ── Expiry ───────────────────────────────────────────────────────

    /// Drop expired and orphaned records restored from storage.
    async fn cleanup(&self, state: &mut EngineState) -> Result<(), WalletConnectError> {
        let mut removed = 0usize;
        for session in state.sessions.values() {
            let target = ExpirerTarget::Topic(session.topic.clone());
            if !state.expirer.has(&target) || is_expired(session.expiry) {
                self.delete_session(state, &session.topic).await?;
                removed += 1;
            }
        }
        for pairing in state.pairings.values() {
            let target = ExpirerTarget::Topic(pairing.topic.clone());
            if !state.expirer.has(&target) || is_expired(pairing.expiry) {
                self.delete_pairing(state, &pairing.topic).await?;
                removed += 1;
            }
        }
        for proposal in state.proposals.values() {
            let target = ExpirerTarget::Id(proposal.id);
            if !state.expirer.has(&target) || is_expired(proposal.expiry) {
                self.delete_proposal(state, proposal.id).await?;
                removed += 1;
            }
        }

        // Expirations whose record is gone.
        for expiration in state.expirer.values() {
            match ExpirerTarget::parse(&expiration.target) {
                Ok(target) if !has_record(state, &target) => state.expirer.delete(&target).await?,
                Ok(_) => {}
                Err(e) => tracing::warn!("cleanup: {e}"),
            }
        }

        for record in state.history.records() {
            if !state.sessions.has(&record.topic) && !state.pairings.has(&record.topic) {
                state.history.delete(record.id).await?;
            }
        }

        if removed > 0 {
            tracing::info!("cleanup removed {removed} stale records");
        }
        Ok(())
    }

    /// Delete every record whose expiry has passed and emit one
    /// `*_expire` event per target.
    pub(crate) async fn expire_due(&self) -> Result<(), WalletConnectError> {
        let mut state = self.inner.state.lock().await;
        let expired = state.expirer.sweep(now_secs()).await?;
        for target in expired {
            if let Err(e) = self.expire(&mut state, &target).await {
                tracing::warn!("failed to expire {target}: {e}");
            }
        }
        Ok(())
    }

    async fn expire(&self, state: &mut EngineState, target: &ExpirerTarget) -> Result<(), WalletConnectError> {
        match target {
            ExpirerTarget::Topic(topic) => {
                if state.sessions.has(topic) {
                    self.delete_session(state, topic).await?;
                    self.inner.events.emit(SignEvent::SessionExpire {
                        topic: topic.clone(),
                    });
                } else if state.pairings.has(topic) {
                    self.delete_pairing(state, topic).await?;
                    self.inner.events.emit(SignEvent::PairingExpire {
                        topic: topic.clone(),
                    });
                }
            }
            ExpirerTarget::Id(id) => {
                if state.proposals.has(id) {
                    self.delete_proposal(state, *id).await?;
                    self.inner.events.emit(SignEvent::ProposalExpire { id: *id });
                    self.inner.events.resolve(
                        EventKey::SessionConnect(*id),
                        Err(WalletConnectError::Expired {
                            context: format!("proposal id: {id}"),
                        }),
                    );
                }
            }
        }
        Ok(())
    }
}

fn has_record(state: &EngineState, target: &ExpirerTarget) -> bool {
    match target {
        ExpirerTarget::Topic(topic) => state.sessions.has(topic) || state.pairings.has(topic),
        ExpirerTarget::Id(id) => state.proposals.has(id),
    }
}
