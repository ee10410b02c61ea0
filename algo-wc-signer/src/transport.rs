//! Session transport contract.
//!
//! Session establishment, encryption and relaying happen behind
//! [`Transport`]. The signing sessions only rely on the operations and
//! events declared here, and assume at most one response per request.

use algo_txn::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

/// Descriptive metadata a peer advertises about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMeta {
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
    pub name: String,
}

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    /// Create a request with a fresh id.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: generate_request_id(),
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Generate a request id from the current time and a random component.
fn generate_request_id() -> u64 {
    use rand::Rng;
    use std::time::{SystemTime, UNIX_EPOCH};
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let random: u64 = rand::thread_rng().gen_range(0..1000);
    millis * 1000 + random
}

/// A session offered by the requesting peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProposal {
    pub peer_id: String,
    pub peer_meta: Option<PeerMeta>,
    pub chain_id: u64,
}

/// Answer to a [`SessionProposal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionApproval {
    pub chain_id: u64,
    pub accounts: Vec<Address>,
}

/// Details delivered to the requesting peer once the session is approved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub peer_id: String,
    /// Chain id the wallet approved
    pub chain_id: u64,
    pub peer_meta: Option<PeerMeta>,
    pub accounts: Vec<Address>,
}

/// Events pushed by the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A peer offers a session (received by the answering side)
    SessionRequest(SessionProposal),
    /// The peer approved our session
    Connect(ConnectInfo),
    /// The peer issued an RPC call
    CallRequest(JsonRpcRequest),
    /// The peer changed its account set
    SessionUpdate { accounts: Vec<Address> },
    /// The session was torn down
    Disconnect { message: Option<String> },
    /// Connection, encryption or relay failure
    Error(TransportError),
}

/// Errors reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Session disconnected")]
    Disconnected,

    #[error("Request rejected by peer: {0}")]
    RequestRejected(String),

    #[error("No pending request with id {0}")]
    UnknownRequest(u64),

    #[error("Request id {0} is already pending")]
    DuplicateRequest(u64),

    #[error("No session has been offered")]
    NoSessionOffered,

    #[error("Relay error: {0}")]
    Relay(String),
}

/// Encrypted, relayed session channel between the two peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Pairing URI for the answering peer.
    fn uri(&self) -> String;

    /// Subscribe to transport events. Only events after this call are seen.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Offer a session (requesting side) or join the offered one (answering
    /// side, which then receives a [`TransportEvent::SessionRequest`]).
    async fn create_session(&self, chain_id: Option<u64>) -> Result<(), TransportError>;

    async fn approve_session(&self, approval: SessionApproval) -> Result<(), TransportError>;

    async fn reject_session(&self, message: &str) -> Result<(), TransportError>;

    /// Advertise a new account set to the peer.
    async fn update_session(&self, accounts: Vec<Address>) -> Result<(), TransportError>;

    /// Send an RPC request and wait for the peer's correlated answer.
    async fn send_custom_request(&self, request: JsonRpcRequest) -> Result<Value, TransportError>;

    async fn approve_request(&self, id: u64, result: Value) -> Result<(), TransportError>;

    async fn reject_request(&self, id: u64, message: &str) -> Result<(), TransportError>;

    /// Tear the session down for both peers.
    async fn kill_session(&self) -> Result<(), TransportError>;
}
