//! Client (wallet) side of a signing session.
//!
//! The client answers a session offer with the accounts returned by an
//! [`AccountResolver`], then serves `algo_signTxn` calls. Each call is
//! decoded, checked against the local accounts by [`SignerGuard`], and only
//! then handed to the host's [`SigningHandler`]. Every request gets an
//! answer: a signing outcome or a rejection.

use std::sync::Arc;

use algo_txn::{Address, KeyPair};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::protocol::{
    encode_outcome, CodecError, SignTxnParams, Signers, SigningOutcome, SigningRequest,
    SigningTransaction, SIGN_TXN_METHOD,
};
use crate::security::SignerGuard;
use crate::session::{
    check_exempt_slots, EventEmitter, SessionError, SessionState, SessionStatus, StateCell,
};
use crate::transport::{
    JsonRpcRequest, PeerMeta, SessionApproval, SessionProposal, Transport, TransportEvent,
};

/// Failure reported by a host-supplied handler or resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Produces signatures for an accepted batch.
///
/// Called only after every record was found exempt or eligible. The outcome
/// must have one slot per record, and exempt slots must stay `None`.
#[async_trait]
pub trait SigningHandler: Send + Sync {
    async fn sign(
        &self,
        txns: &[SigningTransaction],
        message: Option<&str>,
    ) -> Result<SigningOutcome, HandlerError>;
}

/// Decides which accounts to expose when a session is offered.
#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn accounts(
        &self,
        chain_id: u64,
        peer: Option<&PeerMeta>,
    ) -> Result<Vec<Address>, HandlerError>;
}

/// Resolver exposing a fixed account list.
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts(pub Vec<Address>);

#[async_trait]
impl AccountResolver for StaticAccounts {
    async fn accounts(
        &self,
        _chain_id: u64,
        _peer: Option<&PeerMeta>,
    ) -> Result<Vec<Address>, HandlerError> {
        Ok(self.0.clone())
    }
}

/// Handler signing every required record with a single key pair.
#[derive(Debug, Clone)]
pub struct KeyPairSigner {
    keypair: KeyPair,
}

impl KeyPairSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }
}

#[async_trait]
impl SigningHandler for KeyPairSigner {
    async fn sign(
        &self,
        txns: &[SigningTransaction],
        _message: Option<&str>,
    ) -> Result<SigningOutcome, HandlerError> {
        let mut outcome = Vec::with_capacity(txns.len());

        for (index, txn) in txns.iter().enumerate() {
            if !txn.must_sign() {
                outcome.push(None);
                continue;
            }

            let expected = match &txn.signers {
                Signers::Required(list) => list.first().copied().unwrap_or(txn.declared_signer()),
                _ => txn.declared_signer(),
            };
            if expected != self.keypair.address() {
                return Err(HandlerError(format!(
                    "no key for signer {} of transaction {}",
                    expected, index
                )));
            }

            let signed = self
                .keypair
                .sign_transaction(&txn.txn)
                .map_err(|e| HandlerError(e.to_string()))?;
            outcome.push(Some(signed));
        }

        Ok(outcome)
    }
}

/// Notifications delivered to the host.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Local account set changed and was pushed to the peer
    Updated { accounts: Vec<Address> },
    /// Transport failure or unanswerable request
    Error(Arc<SessionError>),
    /// Session torn down
    Disconnected { message: Option<String> },
}

/// Wallet side of a signing session.
pub struct ClientSession {
    transport: Arc<dyn Transport>,
    state: Arc<StateCell>,
    events: Arc<EventEmitter<ClientEvent>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl ClientSession {
    pub fn new(transport: Arc<dyn Transport>, config: &SessionConfig) -> Self {
        Self {
            transport,
            state: Arc::new(StateCell::new()),
            events: Arc::new(EventEmitter::with_capacity(config.event_capacity)),
            dispatcher: None,
        }
    }

    /// Current session snapshot.
    pub fn state(&self) -> Arc<SessionState> {
        self.state.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Join the offered session and start serving signing requests.
    ///
    /// Returns the accounts advertised to the peer. If the resolver fails the
    /// session is rejected and this returns [`SessionError::SessionRejected`].
    pub async fn connect(
        &mut self,
        resolver: &dyn AccountResolver,
        handler: Arc<dyn SigningHandler>,
    ) -> Result<Vec<Address>, SessionError> {
        if self.dispatcher.is_some() {
            return Err(SessionError::AlreadyStarted);
        }

        let mut rx = self.transport.subscribe();
        self.transport.create_session(None).await?;

        let proposal = self.await_session_request(&mut rx).await?;
        info!(
            "Session requested by {} on chain {}",
            proposal.peer_id, proposal.chain_id
        );
        self.state
            .replace(self.state.get().with_status(SessionStatus::AwaitingApproval));

        let accounts = match resolver
            .accounts(proposal.chain_id, proposal.peer_meta.as_ref())
            .await
        {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!("Account resolution failed, rejecting session: {}", e);
                self.state
                    .replace(self.state.get().with_status(SessionStatus::Terminated));
                if let Err(reject) = self.transport.reject_session("Client rejected session").await {
                    error!("Failed to reject session: {}", reject);
                }
                return Err(SessionError::SessionRejected(e.to_string()));
            }
        };

        self.transport
            .approve_session(SessionApproval {
                chain_id: proposal.chain_id,
                accounts: accounts.clone(),
            })
            .await?;

        self.state.replace(SessionState {
            status: SessionStatus::Active,
            peer_id: Some(proposal.peer_id),
            peer_meta: proposal.peer_meta,
            accounts: Some(accounts.clone()),
        });
        info!("Session approved with {} account(s)", accounts.len());

        self.dispatcher = Some(tokio::spawn(dispatch(
            rx,
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            Arc::clone(&self.events),
            handler,
        )));

        Ok(accounts)
    }

    /// Replace the advertised account set.
    pub async fn update_accounts(&self, accounts: Vec<Address>) -> Result<(), SessionError> {
        let current = self.state.get();
        if !current.is_active() {
            return Err(SessionError::NotConnected);
        }

        self.transport.update_session(accounts.clone()).await?;
        self.state.replace(current.with_accounts(accounts.clone()));
        self.events.emit(ClientEvent::Updated { accounts });
        Ok(())
    }

    /// Kill the session for both peers.
    pub async fn close(&self) -> Result<(), SessionError> {
        let current = self.state.get();
        if current.is_closed() {
            return Ok(());
        }

        self.state
            .replace(current.with_status(SessionStatus::Terminated));
        self.transport.kill_session().await?;
        Ok(())
    }

    async fn await_session_request(
        &self,
        rx: &mut broadcast::Receiver<TransportEvent>,
    ) -> Result<SessionProposal, SessionError> {
        loop {
            match rx.recv().await {
                Ok(TransportEvent::SessionRequest(proposal)) => return Ok(proposal),
                Ok(TransportEvent::Disconnect { message }) => {
                    self.state
                        .replace(self.state.get().with_status(SessionStatus::Disconnected));
                    self.events.emit(ClientEvent::Disconnected { message });
                    return Err(SessionError::Disconnected);
                }
                Ok(TransportEvent::Error(e)) => {
                    error!("Transport error while awaiting session: {}", e);
                    self.events
                        .emit(ClientEvent::Error(Arc::new(SessionError::Transport(e))));
                }
                Ok(other) => debug!("Ignoring event before session request: {:?}", other),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} transport events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SessionError::Disconnected),
            }
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

async fn dispatch(
    mut rx: broadcast::Receiver<TransportEvent>,
    transport: Arc<dyn Transport>,
    state: Arc<StateCell>,
    events: Arc<EventEmitter<ClientEvent>>,
    handler: Arc<dyn SigningHandler>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Missed {} transport events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            TransportEvent::CallRequest(request) => {
                let accounts = state.get().accounts.clone().unwrap_or_default();
                let transport = Arc::clone(&transport);
                let handler = Arc::clone(&handler);
                let events = Arc::clone(&events);
                tokio::spawn(async move {
                    if let Err(e) =
                        handle_call_request(transport.as_ref(), handler.as_ref(), accounts, request)
                            .await
                    {
                        error!("Call request failed: {}", e);
                        events.emit(ClientEvent::Error(Arc::new(e)));
                    }
                });
            }
            TransportEvent::Disconnect { message } => {
                let current = state.get();
                if current.status != SessionStatus::Terminated {
                    state.replace(current.with_status(SessionStatus::Disconnected));
                }
                info!("Session disconnected: {:?}", message);
                events.emit(ClientEvent::Disconnected { message });
                break;
            }
            TransportEvent::Error(e) => {
                error!("Transport error: {}", e);
                events.emit(ClientEvent::Error(Arc::new(SessionError::Transport(e))));
            }
            TransportEvent::SessionUpdate { accounts } => {
                debug!("Peer session update with {} account(s)", accounts.len());
            }
            other => debug!("Ignoring event: {:?}", other),
        }
    }
}

/// Answer one inbound call.
///
/// Failures that were turned into a rejection for the peer are not returned.
async fn handle_call_request(
    transport: &dyn Transport,
    handler: &dyn SigningHandler,
    accounts: Vec<Address>,
    request: JsonRpcRequest,
) -> Result<(), SessionError> {
    debug!("Call request {} ({})", request.id, request.method);
    if request.method != SIGN_TXN_METHOD {
        return Err(SessionError::UnknownMethod(request.method));
    }

    match sign_request(handler, accounts, &request.params).await {
        Ok(outcome) => {
            let result = serde_json::to_value(encode_outcome(&outcome)).map_err(CodecError::from)?;
            transport.approve_request(request.id, result).await?;
            debug!("Answered request {} with {} slot(s)", request.id, outcome.len());
            Ok(())
        }
        Err(e) => {
            warn!("Rejecting request {}: {}", request.id, e);
            let message = match &e {
                SessionError::BatchRejected(rejected) => {
                    format!("Request rejected by wallet: {}", rejected)
                }
                _ => "Request rejected by wallet.".to_string(),
            };
            transport.reject_request(request.id, &message).await?;
            Ok(())
        }
    }
}

async fn sign_request(
    handler: &dyn SigningHandler,
    accounts: Vec<Address>,
    params: &Value,
) -> Result<SigningOutcome, SessionError> {
    let params: SignTxnParams = serde_json::from_value(params.clone())
        .map_err(|e| SessionError::InvalidParams(e.to_string()))?;
    let request = SigningRequest::decode(&params)?;
    debug!("Signing request with {} record(s)", request.txns.len());

    SignerGuard::new(accounts).check_batch(&request.txns)?;

    let outcome = handler
        .sign(&request.txns, request.message.as_deref())
        .await?;
    if outcome.len() != request.txns.len() {
        return Err(CodecError::LengthMismatch {
            expected: request.txns.len(),
            actual: outcome.len(),
        }
        .into());
    }
    check_exempt_slots(request.txns.iter().map(SigningTransaction::must_sign), &outcome)?;

    Ok(outcome)
}
