//! Server (requesting) side of a signing session.
//!
//! The server offers a session, waits for a wallet to approve it, and then
//! sends signing requests built from [`TransactionIntent`]s. Outcomes are
//! checked against the request before they reach the caller: one slot per
//! intent, and no signature where none was asked for.

use std::sync::Arc;

use algo_txn::Address;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::protocol::{
    decode_outcome, encode_request, CodecError, SigningOutcome, TransactionIntent,
    SIGN_TXN_METHOD,
};
use crate::session::{
    check_exempt_slots, EventEmitter, SessionError, SessionState, SessionStatus, StateCell,
};
use crate::transport::{ConnectInfo, JsonRpcRequest, Transport, TransportError, TransportEvent};

/// Notifications delivered to the host.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A wallet approved the session
    Connected(ConnectInfo),
    /// The wallet changed its account set
    Updated { accounts: Vec<Address> },
    /// Session torn down
    Disconnected { message: Option<String> },
    /// Transport failure
    Error(TransportError),
}

/// Requesting side of a signing session.
pub struct ServerSession {
    transport: Arc<dyn Transport>,
    state: Arc<StateCell>,
    events: Arc<EventEmitter<ServerEvent>>,
    listener: JoinHandle<()>,
}

impl ServerSession {
    /// Offer a session and start tracking its lifecycle.
    pub async fn listen(
        transport: Arc<dyn Transport>,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let state = Arc::new(StateCell::new());
        let events = Arc::new(EventEmitter::with_capacity(config.event_capacity));

        let rx = transport.subscribe();
        let listener = tokio::spawn(listen_events(rx, Arc::clone(&state), Arc::clone(&events)));

        if let Err(e) = transport.create_session(Some(config.chain_id)).await {
            listener.abort();
            return Err(e.into());
        }
        info!("Session offered on chain {}", config.chain_id);

        Ok(Self {
            transport,
            state,
            events,
            listener,
        })
    }

    /// Pairing URI for the wallet.
    pub fn uri(&self) -> String {
        self.transport.uri()
    }

    /// Current session snapshot.
    pub fn state(&self) -> Arc<SessionState> {
        self.state.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Request a signature for a single transaction.
    ///
    /// Fails with [`SessionError::UnsignedResult`] if the wallet returned no
    /// signature for it.
    pub async fn sign_transaction(
        &self,
        intent: TransactionIntent,
        message: Option<&str>,
    ) -> Result<Vec<u8>, SessionError> {
        let outcome = self
            .sign_transaction_group(std::slice::from_ref(&intent), message)
            .await?;
        outcome
            .into_iter()
            .next()
            .flatten()
            .ok_or(SessionError::UnsignedResult)
    }

    /// Request signatures for a group of transactions.
    ///
    /// The outcome has one slot per intent, in order. Fails if the session
    /// is torn down before the wallet answers.
    pub async fn sign_transaction_group(
        &self,
        intents: &[TransactionIntent],
        message: Option<&str>,
    ) -> Result<SigningOutcome, SessionError> {
        if !self.state.get().is_active() {
            return Err(SessionError::NotConnected);
        }

        let params = encode_request(intents, message)?;
        let params = serde_json::to_value(&params).map_err(CodecError::from)?;
        let request = JsonRpcRequest::new(SIGN_TXN_METHOD, params);
        let id = request.id;
        debug!("Sending signing request {} with {} record(s)", id, intents.len());

        let closed = self.state.closed();
        let result = tokio::select! {
            result = self.transport.send_custom_request(request) => result?,
            _ = closed => {
                warn!("Session closed while request {} was pending", id);
                return Err(SessionError::Disconnected);
            }
        };

        let slots: Vec<Option<String>> = serde_json::from_value(result).map_err(CodecError::from)?;
        let outcome = decode_outcome(slots, intents.len())?;
        check_exempt_slots(
            intents.iter().map(|intent| intent.signers().is_required()),
            &outcome,
        )?;

        debug!("Request {} answered", id);
        Ok(outcome)
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
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen_events(
    mut rx: broadcast::Receiver<TransportEvent>,
    state: Arc<StateCell>,
    events: Arc<EventEmitter<ServerEvent>>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if !handle_event(event, &state, &events) {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Missed {} transport events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Apply one transport event. Returns false once the session is over.
fn handle_event(
    event: TransportEvent,
    state: &StateCell,
    events: &EventEmitter<ServerEvent>,
) -> bool {
    match event {
        TransportEvent::Connect(info) => {
            let current = state.get();
            if current.status != SessionStatus::Pending {
                warn!(
                    "Ignoring connect from {} in {:?} session",
                    info.peer_id, current.status
                );
                return true;
            }
            info!(
                "Wallet {} connected with {} account(s)",
                info.peer_id,
                info.accounts.len()
            );
            state.replace(SessionState {
                status: SessionStatus::Active,
                peer_id: Some(info.peer_id.clone()),
                peer_meta: info.peer_meta.clone(),
                accounts: Some(info.accounts.clone()),
            });
            events.emit(ServerEvent::Connected(info));
        }
        TransportEvent::SessionUpdate { accounts } => {
            debug!("Wallet accounts updated: {} account(s)", accounts.len());
            state.replace(state.get().with_accounts(accounts.clone()));
            events.emit(ServerEvent::Updated { accounts });
        }
        TransportEvent::Disconnect { message } => {
            let current = state.get();
            if current.status != SessionStatus::Terminated {
                state.replace(current.with_status(SessionStatus::Disconnected));
            }
            info!("Session disconnected: {:?}", message);
            events.emit(ServerEvent::Disconnected { message });
            return false;
        }
        TransportEvent::Error(e) => {
            error!("Transport error: {}", e);
            events.emit(ServerEvent::Error(e));
        }
        TransportEvent::CallRequest(request) => {
            warn!(
                "Ignoring call request {} ({}) sent to the requesting side",
                request.id, request.method
            );
        }
        TransportEvent::SessionRequest(proposal) => {
            debug!("Ignoring session request from {}", proposal.peer_id);
        }
    }
    true
}
