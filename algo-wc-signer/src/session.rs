//! Session state and notification fan-out shared by both roles.
//!
//! Session state is an immutable snapshot replaced wholesale on every
//! lifecycle transition, so readers never observe a half-updated peer or
//! account set. Notifications go through a broadcast channel: every current
//! subscriber sees each event once, late subscribers see nothing earlier.

use std::sync::Arc;

use algo_txn::Address;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::client::HandlerError;
use crate::protocol::CodecError;
use crate::security::BatchRejected;
use crate::transport::{PeerMeta, TransportError};

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unknown request type: {0}")]
    UnknownMethod(String),

    #[error("Batch rejected: {0}")]
    BatchRejected(#[from] BatchRejected),

    #[error("Signing handler failed: {0}")]
    Handler(#[from] HandlerError),

    #[error("Transaction was returned unsigned")]
    UnsignedResult,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Signature returned for exempt transaction {index}")]
    UnexpectedSignature { index: usize },

    #[error("Invalid request params: {0}")]
    InvalidParams(String),

    #[error("Session rejected: {0}")]
    SessionRejected(String),

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Session is not active")]
    NotConnected,

    #[error("Session disconnected")]
    Disconnected,
}

/// Lifecycle position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created; waiting for the peer (server) or for a session request (client)
    Pending,
    /// Client only: session request received, account resolution running
    AwaitingApproval,
    /// Signing requests may flow
    Active,
    /// Torn down by the peer or the transport
    Disconnected,
    /// Closed locally or rejected
    Terminated,
}

/// Snapshot of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub status: SessionStatus,
    pub peer_id: Option<String>,
    pub peer_meta: Option<PeerMeta>,
    pub accounts: Option<Vec<Address>>,
}

impl SessionState {
    pub fn pending() -> Self {
        Self {
            status: SessionStatus::Pending,
            peer_id: None,
            peer_meta: None,
            accounts: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Disconnected | SessionStatus::Terminated
        )
    }

    /// Copy with a different status.
    pub fn with_status(&self, status: SessionStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Copy with a different account set.
    pub fn with_accounts(&self, accounts: Vec<Address>) -> Self {
        Self {
            accounts: Some(accounts),
            ..self.clone()
        }
    }
}

/// Holder of the current [`SessionState`] snapshot.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<Arc<SessionState>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(SessionState::pending()));
        Self { tx }
    }

    pub(crate) fn get(&self) -> Arc<SessionState> {
        Arc::clone(&self.tx.borrow())
    }

    pub(crate) fn replace(&self, state: SessionState) {
        self.tx.send_replace(Arc::new(state));
    }

    /// Resolves once the session is disconnected or terminated.
    pub(crate) fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            // A dropped sender means the session is gone as well
            let _ = rx.wait_for(|state| state.is_closed()).await;
        }
    }
}

/// Default broadcast capacity for session notifications.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Broadcast-based notification emitter.
///
/// `emit` never blocks; a subscriber that falls behind by more than the
/// capacity loses the oldest events.
#[derive(Debug)]
pub struct EventEmitter<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventEmitter<E> {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver to all current subscribers. Returns how many received it.
    pub fn emit(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<E: Clone> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

/// Fail if a slot the requester marked exempt came back signed.
pub(crate) fn check_exempt_slots(
    must_sign: impl IntoIterator<Item = bool>,
    outcome: &[Option<Vec<u8>>],
) -> Result<(), SessionError> {
    for (index, (must_sign, slot)) in must_sign.into_iter().zip(outcome).enumerate() {
        if !must_sign && slot.is_some() {
            return Err(SessionError::UnexpectedSignature { index });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_state_replaced_wholesale() {
        let cell = StateCell::new();
        let before = cell.get();

        cell.replace(before.with_accounts(vec![Address::new([1u8; 32])]));

        assert_eq!(before.accounts, None);
        assert_eq!(cell.get().accounts, Some(vec![Address::new([1u8; 32])]));
    }

    #[test]
    fn test_closed_states() {
        let state = SessionState::pending();
        assert!(!state.is_closed());
        assert!(!state.with_status(SessionStatus::Active).is_closed());
        assert!(state.with_status(SessionStatus::Disconnected).is_closed());
        assert!(state.with_status(SessionStatus::Terminated).is_closed());
    }

    #[tokio::test]
    async fn test_closed_future_resolves_on_disconnect() {
        let cell = Arc::new(StateCell::new());
        let closed = cell.closed();

        let writer = Arc::clone(&cell);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.replace(SessionState::pending().with_status(SessionStatus::Disconnected));
        });

        tokio::time::timeout(Duration::from_secs(1), closed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_future_pending_while_active() {
        let cell = StateCell::new();
        cell.replace(SessionState::pending().with_status(SessionStatus::Active));

        let result = tokio::time::timeout(Duration::from_millis(20), cell.closed()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_emitter_fans_out_without_replay() {
        let emitter: EventEmitter<u32> = EventEmitter::with_capacity(4);
        assert_eq!(emitter.emit(1), 0);

        let mut a = emitter.subscribe();
        let mut b = emitter.subscribe();
        assert_eq!(emitter.subscriber_count(), 2);
        assert_eq!(emitter.emit(2), 2);

        assert_eq!(a.recv().await.unwrap(), 2);
        assert_eq!(b.recv().await.unwrap(), 2);
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn test_signed_exempt_slot_rejected() {
        let outcome = vec![None, Some(vec![1, 2, 3])];
        assert!(check_exempt_slots([false, true], &outcome).is_ok());

        let err = check_exempt_slots([true, false], &outcome).unwrap_err();
        assert!(matches!(err, SessionError::UnexpectedSignature { index: 1 }));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let emitter: EventEmitter<u32> = EventEmitter::with_capacity(0);
        let _rx = emitter.subscribe();
        assert_eq!(emitter.emit(7), 1);
    }
}
