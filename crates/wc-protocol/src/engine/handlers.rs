/// Inbound message handling.
///
/// Requests are dispatched by method name. Responses carry no method, so
/// they are routed through the JSON-RPC history record of the request
/// they answer. A failure while handling a peer request is always turned
/// into an error response: the peer gets an answer either way.
use serde::de::DeserializeOwned;
use serde_json::Value;
use wc_transport::{JsonRpcPayload, JsonRpcRequest, RpcId};

use super::methods::Method;
use super::models::{
    PairingDeleteParams, ProposalStruct, SessionDeleteParams, SessionEventParams,
    SessionExtendParams, SessionProposeParams, SessionProposeResponse, SessionRequestParams,
    SessionSettleParams, SessionStruct, SessionUpdateParams,
};
use super::{validation, Engine, EngineState};
use crate::crypto::DecodeOptions;
use crate::error::SdkError;
use crate::events::{EventKey, SignEvent};
use crate::history::JsonRpcRecord;
use crate::relay::MessageEvent;
use crate::types::{calc_expiry, now_secs, FIVE_MINUTES, SEVEN_DAYS};
use crate::WalletConnectError;

/// Tolerated clock difference on a peer-chosen expiry.
const MAX_EXPIRY_SKEW: u64 = FIVE_MINUTES;

impl Engine {
    /// Decode and dispatch one message delivered by the relayer.
    pub(crate) async fn on_message(&self, event: MessageEvent) {
        let MessageEvent { topic, message } = event;
        let value: Value = match self
            .inner
            .crypto
            .decode(&topic, &message, DecodeOptions::default())
            .await
        {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("dropping undecodable message on {topic}: {e}");
                return;
            }
        };
        let payload = match JsonRpcPayload::from_value(value) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("dropping non json-rpc message on {topic}: {e}");
                return;
            }
        };

        match payload {
            JsonRpcPayload::Request(request) => self.on_request(&topic, request).await,
            response => self.on_response(&topic, response).await,
        }
    }

    // ── Requests ─────────────────────────────────────────────────────

    async fn on_request(&self, topic: &str, request: JsonRpcRequest) {
        let id = request.id;
        let Some(method) = Method::from_name(&request.method) else {
            tracing::warn!("unsupported method {} on {topic}", request.method);
            let error = SdkError::WcMethodUnsupported.to_response();
            if let Err(e) = self.publish_error(topic, None, id, error).await {
                tracing::warn!("failed to answer {id}: {e}");
            }
            return;
        };
        tracing::debug!("<- {method} {id} on {topic}");

        let mut state = self.inner.state.lock().await;
        // Our own request echoed back, or a peer request replayed by the
        // relay mailbox after a restart.
        if state.history.has(id) {
            tracing::debug!("ignoring already seen request {id} on {topic}");
            return;
        }
        let chain_id = request
            .params
            .get("chainId")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Err(e) = state
            .history
            .set_inbound(topic, &request, chain_id.as_deref())
            .await
        {
            tracing::warn!("failed to record request {id} on {topic}: {e}");
        }

        let outcome = match method {
            Method::SessionPropose => self.on_session_propose(&mut state, topic, request).await,
            Method::SessionSettle => self.on_session_settle(&mut state, topic, request).await,
            Method::SessionUpdate => self.on_session_update(&mut state, topic, request).await,
            Method::SessionExtend => self.on_session_extend(&mut state, topic, request).await,
            Method::SessionRequest => self.on_session_request(&mut state, topic, request).await,
            Method::SessionEvent => self.on_session_event(&mut state, topic, request).await,
            Method::SessionDelete => self.on_session_delete(&mut state, topic, request).await,
            Method::SessionPing => self.on_session_ping(&mut state, topic, request).await,
            Method::PairingDelete => self.on_pairing_delete(&mut state, topic, request).await,
            Method::PairingPing => self.on_pairing_ping(&mut state, topic, request).await,
        };

        let answer = match outcome {
            // Answered later by approve/reject or respond.
            Ok(()) if matches!(method, Method::SessionPropose | Method::SessionRequest) => return,
            Ok(()) => Value::Bool(true),
            Err(e) => {
                tracing::warn!("{method} {id} on {topic} failed: {e}");
                let error = e.to_response();
                if let Err(e) = self
                    .publish_error(topic, Some(method), id, error.clone())
                    .await
                {
                    tracing::warn!("failed to answer {id}: {e}");
                }
                serde_json::to_value(&error).unwrap_or(Value::Null)
            }
        };
        if let Err(e) = state.history.answer(id, answer).await {
            tracing::warn!("failed to record answer to {id}: {e}");
        }
    }

    async fn on_session_propose(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        let params: SessionProposeParams = params(request.params)?;
        self.valid_pairing(state, topic).await?;
        validation::validate_required_namespaces(&params.required_namespaces, "session proposal")?;

        let proposal = ProposalStruct {
            id: request.id,
            expiry: calc_expiry(FIVE_MINUTES),
            relays: params.relays,
            proposer: params.proposer,
            required_namespaces: params.required_namespaces,
            pairing_topic: topic.to_string(),
        };
        self.set_proposal(state, proposal.clone()).await?;
        self.inner.events.emit(SignEvent::SessionProposal {
            id: request.id,
            proposal,
        });
        Ok(())
    }

    async fn on_session_settle(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        let params: SessionSettleParams = params(request.params)?;
        let Some(proposal_id) = state.pending_settlements.get(topic).copied() else {
            return Err(SdkError::InvalidSessionSettleRequest
                .with_context(format!("no pending proposal for session topic {topic}")));
        };
        let proposal = state.proposals.get(&proposal_id)?;
        validation::validate_namespaces(&params.namespaces, "session settle")
            .map_err(|e| SdkError::InvalidSessionSettleRequest.with_context(e.to_string()))?;
        if params.expiry <= now_secs() {
            return Err(WalletConnectError::Expired {
                context: format!("session settle expiry {}", params.expiry),
            });
        }

        let session = SessionStruct {
            topic: topic.to_string(),
            relay: params.relay,
            expiry: params.expiry,
            acknowledged: true,
            controller: params.controller.public_key.clone(),
            namespaces: params.namespaces,
            required_namespaces: params.required_namespaces,
            self_: proposal.proposer.clone(),
            peer: params.controller,
        };
        self.set_session(state, session.clone()).await?;
        state.pending_settlements.remove(topic);
        self.publish_result(topic, Method::SessionSettle, request.id, true)
            .await?;

        self.delete_proposal(state, proposal_id).await?;
        self.activate_pairing(
            state,
            &proposal.pairing_topic,
            Some(session.peer.metadata.clone()),
        )
        .await?;
        tracing::info!("session {topic} settled");

        self.inner.events.emit(SignEvent::SessionConnect {
            session: session.clone(),
        });
        self.inner.events.resolve(
            EventKey::SessionConnect(proposal_id),
            serde_json::to_value(&session).map_err(Into::into),
        );
        Ok(())
    }

    async fn on_session_update(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        let params: SessionUpdateParams = params(request.params)?;
        let session = self.valid_session(state, topic).await?;
        if session.is_controller() {
            return Err(SdkError::UnauthorizedUpdateRequest
                .with_context(format!("update from non-controller on {topic}")));
        }
        validation::validate_namespaces(&params.namespaces, "session update")
            .map_err(|e| SdkError::InvalidUpdateRequest.with_context(e.to_string()))?;

        state
            .sessions
            .update(&topic.to_string(), session.with_namespaces(params.namespaces.clone()))
            .await?;
        self.publish_result(topic, Method::SessionUpdate, request.id, true)
            .await?;
        self.inner.events.emit(SignEvent::SessionUpdate {
            topic: topic.to_string(),
            namespaces: params.namespaces,
        });
        Ok(())
    }

    async fn on_session_extend(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        let params: SessionExtendParams = params(request.params)?;
        let session = self.valid_session(state, topic).await?;
        if session.is_controller() {
            return Err(SdkError::UnauthorizedExtendRequest
                .with_context(format!("extend from non-controller on {topic}")));
        }
        if params.expiry < session.expiry || params.expiry > calc_expiry(SEVEN_DAYS) + MAX_EXPIRY_SKEW {
            return Err(SdkError::InvalidExtendRequest
                .with_context(format!("expiry {} out of range", params.expiry)));
        }

        self.set_session(state, session.with_expiry(params.expiry))
            .await?;
        self.publish_result(topic, Method::SessionExtend, request.id, true)
            .await?;
        self.inner.events.emit(SignEvent::SessionExtend {
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn on_session_request(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        let params: SessionRequestParams = params(request.params)?;
        let session = self.valid_session(state, topic).await?;
        if !validation::is_authorized_method(
            &session.namespaces,
            &params.chain_id,
            &params.request.method,
        ) {
            return Err(SdkError::UnauthorizedMethod.with_context(format!(
                "{} on {}",
                params.request.method, params.chain_id
            )));
        }
        // Answered later by the application through `respond`.
        self.inner.events.emit(SignEvent::SessionRequest {
            topic: topic.to_string(),
            id: request.id,
            chain_id: params.chain_id,
            request: params.request,
        });
        Ok(())
    }

    async fn on_session_event(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        let params: SessionEventParams = params(request.params)?;
        let session = self.valid_session(state, topic).await?;
        if !validation::is_authorized_event(&session.namespaces, &params.chain_id, &params.event.name) {
            return Err(SdkError::UnauthorizedEvent.with_context(format!(
                "{} on {}",
                params.event.name, params.chain_id
            )));
        }
        self.publish_result(topic, Method::SessionEvent, request.id, true)
            .await?;
        self.inner.events.emit(SignEvent::SessionEvent {
            topic: topic.to_string(),
            chain_id: params.chain_id,
            event: params.event,
        });
        Ok(())
    }

    async fn on_session_delete(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        let reason: SessionDeleteParams = params(request.params)?;
        self.valid_session(state, topic).await?;
        // Answer while the topic key still exists.
        self.publish_result(topic, Method::SessionDelete, request.id, true)
            .await?;
        self.delete_session(state, topic).await?;
        tracing::info!("peer deleted session {topic}: {}", reason.message);
        self.inner.events.emit(SignEvent::SessionDelete {
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn on_session_ping(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        self.valid_session(state, topic).await?;
        self.publish_result(topic, Method::SessionPing, request.id, true)
            .await?;
        self.inner.events.emit(SignEvent::SessionPing {
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn on_pairing_delete(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        let reason: PairingDeleteParams = params(request.params)?;
        self.valid_pairing(state, topic).await?;
        self.publish_result(topic, Method::PairingDelete, request.id, true)
            .await?;
        self.delete_pairing(state, topic).await?;
        tracing::info!("peer deleted pairing {topic}: {}", reason.message);
        self.inner.events.emit(SignEvent::PairingDelete {
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn on_pairing_ping(
        &self,
        state: &mut EngineState,
        topic: &str,
        request: JsonRpcRequest,
    ) -> Result<(), WalletConnectError> {
        self.valid_pairing(state, topic).await?;
        self.publish_result(topic, Method::PairingPing, request.id, true)
            .await?;
        self.inner.events.emit(SignEvent::PairingPing {
            topic: topic.to_string(),
        });
        Ok(())
    }

    // ── Responses ────────────────────────────────────────────────────

    async fn on_response(&self, topic: &str, response: JsonRpcPayload) {
        let mut state = self.inner.state.lock().await;
        let record = match state.history.resolve(topic, &response).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!("ignoring response {} on {topic}", response.id());
                return;
            }
            Err(e) => {
                tracing::warn!("response {} on {topic}: {e}", response.id());
                return;
            }
        };
        let Some(method) = Method::from_name(&record.request.method) else {
            tracing::warn!("response to unknown method {}", record.request.method);
            return;
        };
        tracing::debug!("<- {method} response {} on {topic}", record.id);

        let outcome = match method {
            Method::SessionPropose => {
                self.on_session_propose_response(&mut state, &record, response)
                    .await
            }
            Method::SessionSettle => {
                self.on_session_settle_response(&mut state, topic, &record, response)
                    .await
            }
            Method::SessionRequest => {
                self.resolve_response(record.id, response, |value| value);
                Ok(())
            }
            // Everything else is a plain acknowledgement.
            _ => {
                self.resolve_response(record.id, response, |_| Value::Null);
                Ok(())
            }
        };
        if let Err(e) = outcome {
            tracing::warn!("handling {method} response {} failed: {e}", record.id);
        }
    }

    async fn on_session_propose_response(
        &self,
        state: &mut EngineState,
        record: &JsonRpcRecord,
        response: JsonRpcPayload,
    ) -> Result<(), WalletConnectError> {
        let id = record.id;
        let result = match response {
            JsonRpcPayload::Result(result) => result.result,
            JsonRpcPayload::Error(error) => {
                self.delete_proposal(state, id).await?;
                tracing::info!("proposal {id} rejected: {}", error.error.message);
                self.inner
                    .events
                    .resolve(EventKey::SessionConnect(id), Err(error.error.into()));
                return Ok(());
            }
            JsonRpcPayload::Request(_) => return Ok(()),
        };

        let accepted: SessionProposeResponse = params(result)?;
        let proposal = state.proposals.get(&id)?;
        let session_topic = self
            .inner
            .crypto
            .generate_shared_key(
                &proposal.proposer.public_key,
                &accepted.responder_public_key,
                None,
            )
            .await?;
        state.pending_settlements.insert(session_topic.clone(), id);
        self.inner.relayer.subscribe(&session_topic).await?;
        tracing::debug!("proposal {id} accepted, awaiting settlement on {session_topic}");
        Ok(())
    }

    async fn on_session_settle_response(
        &self,
        state: &mut EngineState,
        topic: &str,
        record: &JsonRpcRecord,
        response: JsonRpcPayload,
    ) -> Result<(), WalletConnectError> {
        let key = EventKey::Response(record.id);
        match response {
            JsonRpcPayload::Result(_) => {
                let session = state
                    .sessions
                    .get(&topic.to_string())?
                    .acknowledge()
                    .with_expiry(calc_expiry(SEVEN_DAYS));
                self.set_session(state, session.clone()).await?;
                tracing::info!("session {topic} acknowledged");
                self.inner
                    .events
                    .resolve(key, serde_json::to_value(&session).map_err(Into::into));
            }
            JsonRpcPayload::Error(error) => {
                self.delete_session(state, topic).await?;
                self.inner.events.resolve(key, Err(error.error.into()));
            }
            JsonRpcPayload::Request(_) => {}
        }
        Ok(())
    }

    fn resolve_response(&self, id: RpcId, response: JsonRpcPayload, on_result: impl FnOnce(Value) -> Value) {
        let outcome = match response {
            JsonRpcPayload::Result(result) => Ok(on_result(result.result)),
            JsonRpcPayload::Error(error) => Err(error.error.into()),
            JsonRpcPayload::Request(_) => return,
        };
        self.inner.events.resolve(EventKey::Response(id), outcome);
    }
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T, WalletConnectError> {
    serde_json::from_value(value)
        .map_err(|e| WalletConnectError::missing(format!("request params: {e}")))
}
