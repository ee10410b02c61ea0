//! In-process relay connecting two [`Transport`] endpoints.
//!
//! Stands in for the encrypted bridge when both peers live in one process:
//! tests, demos, and hosts embedding both roles. Request correlation works
//! the same way a relay does it, by JSON-RPC id, and a torn-down session
//! fails every request still waiting for an answer.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use algo_txn::Address;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};

use crate::session::DEFAULT_EVENT_CAPACITY;
use crate::transport::{
    ConnectInfo, JsonRpcRequest, PeerMeta, SessionApproval, SessionProposal, Transport,
    TransportError, TransportEvent,
};

type PendingReply = oneshot::Sender<Result<Value, TransportError>>;

#[derive(Default)]
struct BridgeState {
    proposal: Option<SessionProposal>,
    connected: bool,
    pending: HashMap<u64, PendingReply>,
}

struct Bridge {
    topic: String,
    bridge_url: String,
    state: Mutex<BridgeState>,
}

impl Bridge {
    fn lock(&self) -> MutexGuard<'_, BridgeState> {
        // State stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Builder for a connected pair of loopback endpoints.
#[derive(Debug, Clone)]
pub struct LoopbackBridge {
    bridge_url: String,
    capacity: usize,
}

impl LoopbackBridge {
    pub fn new(bridge_url: impl Into<String>) -> Self {
        Self {
            bridge_url: bridge_url.into(),
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Event buffer size of each endpoint.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Create the requesting (server) and answering (client) endpoints.
    pub fn pair(
        &self,
        server_meta: Option<PeerMeta>,
        client_meta: Option<PeerMeta>,
    ) -> (LoopbackTransport, LoopbackTransport) {
        let bridge = Arc::new(Bridge {
            topic: random_id(),
            bridge_url: self.bridge_url.clone(),
            state: Mutex::new(BridgeState::default()),
        });
        let (server_tx, _) = broadcast::channel(self.capacity);
        let (client_tx, _) = broadcast::channel(self.capacity);

        let server = LoopbackTransport {
            peer_id: random_id(),
            meta: server_meta,
            bridge: Arc::clone(&bridge),
            events: server_tx.clone(),
            peer_events: client_tx.clone(),
        };
        let client = LoopbackTransport {
            peer_id: random_id(),
            meta: client_meta,
            bridge,
            events: client_tx,
            peer_events: server_tx,
        };
        (server, client)
    }
}

fn random_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// One side of a loopback session.
pub struct LoopbackTransport {
    peer_id: String,
    meta: Option<PeerMeta>,
    bridge: Arc<Bridge>,
    events: broadcast::Sender<TransportEvent>,
    peer_events: broadcast::Sender<TransportEvent>,
}

impl LoopbackTransport {
    /// Identifier this endpoint presents to its peer.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Deliver an event to this endpoint's subscribers as if the relay sent it.
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Requests sent but not yet answered.
    pub fn pending_requests(&self) -> usize {
        self.bridge.lock().pending.len()
    }

    fn to_peer(&self, event: TransportEvent) {
        let _ = self.peer_events.send(event);
    }

    fn require_connected(&self) -> Result<(), TransportError> {
        if self.bridge.lock().connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn take_pending(&self, id: u64) -> Result<PendingReply, TransportError> {
        self.bridge
            .lock()
            .pending
            .remove(&id)
            .ok_or(TransportError::UnknownRequest(id))
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("peer_id", &self.peer_id)
            .field("topic", &self.bridge.topic)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn uri(&self) -> String {
        format!("wc:{}@1?bridge={}", self.bridge.topic, self.bridge.bridge_url)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn create_session(&self, chain_id: Option<u64>) -> Result<(), TransportError> {
        let offered = self.bridge.lock().proposal.clone();
        match (offered, chain_id) {
            // Joining a session offered by the other endpoint
            (Some(proposal), _) if proposal.peer_id != self.peer_id => {
                debug!("Joining session offered by {}", proposal.peer_id);
                let _ = self.events.send(TransportEvent::SessionRequest(proposal));
                Ok(())
            }
            (Some(_), _) => Ok(()),
            (None, Some(chain_id)) => {
                self.bridge.lock().proposal = Some(SessionProposal {
                    peer_id: self.peer_id.clone(),
                    peer_meta: self.meta.clone(),
                    chain_id,
                });
                info!("Offered session on topic {}", self.bridge.topic);
                Ok(())
            }
            (None, None) => Err(TransportError::NoSessionOffered),
        }
    }

    async fn approve_session(&self, approval: SessionApproval) -> Result<(), TransportError> {
        {
            let mut state = self.bridge.lock();
            if state.proposal.is_none() {
                return Err(TransportError::NoSessionOffered);
            }
            state.connected = true;
        }
        self.to_peer(TransportEvent::Connect(ConnectInfo {
            peer_id: self.peer_id.clone(),
            chain_id: approval.chain_id,
            peer_meta: self.meta.clone(),
            accounts: approval.accounts,
        }));
        Ok(())
    }

    async fn reject_session(&self, message: &str) -> Result<(), TransportError> {
        {
            let mut state = self.bridge.lock();
            state.proposal = None;
            state.connected = false;
        }
        self.to_peer(TransportEvent::Disconnect {
            message: Some(message.to_string()),
        });
        Ok(())
    }

    async fn update_session(&self, accounts: Vec<Address>) -> Result<(), TransportError> {
        self.require_connected()?;
        self.to_peer(TransportEvent::SessionUpdate { accounts });
        Ok(())
    }

    async fn send_custom_request(&self, request: JsonRpcRequest) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.bridge.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            match state.pending.entry(request.id) {
                Entry::Occupied(_) => return Err(TransportError::DuplicateRequest(request.id)),
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                }
            }
        }
        debug!("Relaying request {} ({})", request.id, request.method);
        self.to_peer(TransportEvent::CallRequest(request));

        // The sender is dropped when the session is killed
        rx.await.unwrap_or(Err(TransportError::Disconnected))
    }

    async fn approve_request(&self, id: u64, result: Value) -> Result<(), TransportError> {
        let _ = self.take_pending(id)?.send(Ok(result));
        Ok(())
    }

    async fn reject_request(&self, id: u64, message: &str) -> Result<(), TransportError> {
        let _ = self
            .take_pending(id)?
            .send(Err(TransportError::RequestRejected(message.to_string())));
        Ok(())
    }

    async fn kill_session(&self) -> Result<(), TransportError> {
        {
            let mut state = self.bridge.lock();
            state.connected = false;
            state.proposal = None;
            state.pending.clear();
        }
        info!("Session on topic {} killed", self.bridge.topic);
        let event = TransportEvent::Disconnect {
            message: Some("Session disconnected".to_string()),
        };
        let _ = self.events.send(event.clone());
        self.to_peer(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ALGORAND_CHAIN_ID;
    use serde_json::json;

    async fn connected_pair() -> (Arc<LoopbackTransport>, Arc<LoopbackTransport>) {
        let (server, client) = LoopbackBridge::new("https://bridge.example").pair(None, None);
        server.create_session(Some(ALGORAND_CHAIN_ID)).await.unwrap();
        client.create_session(None).await.unwrap();
        client
            .approve_session(SessionApproval {
                chain_id: ALGORAND_CHAIN_ID,
                accounts: vec![],
            })
            .await
            .unwrap();
        (Arc::new(server), Arc::new(client))
    }

    #[tokio::test]
    async fn test_join_delivers_session_request() {
        let meta = PeerMeta {
            name: "Test Server".to_string(),
            ..PeerMeta::default()
        };
        let (server, client) = LoopbackBridge::new("https://bridge.example").pair(Some(meta.clone()), None);
        let mut client_events = client.subscribe();

        server.create_session(Some(ALGORAND_CHAIN_ID)).await.unwrap();
        client.create_session(None).await.unwrap();

        match client_events.recv().await.unwrap() {
            TransportEvent::SessionRequest(proposal) => {
                assert_eq!(proposal.peer_id, server.peer_id());
                assert_eq!(proposal.peer_meta, Some(meta));
                assert_eq!(proposal.chain_id, ALGORAND_CHAIN_ID);
            }
            other => panic!("Expected SessionRequest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_without_offer_fails() {
        let (_server, client) = LoopbackBridge::new("x").pair(None, None);
        assert_eq!(
            client.create_session(None).await,
            Err(TransportError::NoSessionOffered)
        );
    }

    #[tokio::test]
    async fn test_approve_sends_connect_to_server() {
        let (server, client) = LoopbackBridge::new("x").pair(None, None);
        let mut server_events = server.subscribe();

        server.create_session(Some(ALGORAND_CHAIN_ID)).await.unwrap();
        client.create_session(None).await.unwrap();
        client
            .approve_session(SessionApproval {
                chain_id: ALGORAND_CHAIN_ID,
                accounts: vec![Address::new([1u8; 32])],
            })
            .await
            .unwrap();

        match server_events.recv().await.unwrap() {
            TransportEvent::Connect(info) => {
                assert_eq!(info.peer_id, client.peer_id());
                assert_eq!(info.accounts, vec![Address::new([1u8; 32])]);
            }
            other => panic!("Expected Connect, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_correlated_by_id() {
        let (server, client) = connected_pair().await;
        let mut client_events = client.subscribe();
        let request = JsonRpcRequest::new("algo_signTxn", json!([[]]));
        let id = request.id;

        let answer = tokio::spawn(async move {
            loop {
                if let TransportEvent::CallRequest(req) = client_events.recv().await.unwrap() {
                    client.approve_request(req.id, json!(["AQID"])).await.unwrap();
                    return req.id;
                }
            }
        });

        let result = server.send_custom_request(request).await.unwrap();
        assert_eq!(result, json!(["AQID"]));
        assert_eq!(answer.await.unwrap(), id);
        assert_eq!(server.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_id_refused() {
        let (server, client) = connected_pair().await;
        let mut client_events = client.subscribe();

        let mut first = JsonRpcRequest::new("algo_signTxn", json!([["batch-a"]]));
        first.id = 7;
        let mut second = JsonRpcRequest::new("algo_signTxn", json!([["batch-b"]]));
        second.id = 7;

        let pending = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.send_custom_request(first).await }
        });
        match client_events.recv().await.unwrap() {
            TransportEvent::CallRequest(req) => assert_eq!(req.params, json!([["batch-a"]])),
            other => panic!("Expected CallRequest, got {:?}", other),
        }

        // The first request keeps its correlation
        assert_eq!(
            server.send_custom_request(second).await,
            Err(TransportError::DuplicateRequest(7))
        );
        assert_eq!(server.pending_requests(), 1);

        client.approve_request(7, json!("batch-a")).await.unwrap();
        assert_eq!(pending.await.unwrap(), Ok(json!("batch-a")));
        assert!(client_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_before_connect_fails() {
        let (server, _client) = LoopbackBridge::new("x").pair(None, None);
        let result = server
            .send_custom_request(JsonRpcRequest::new("algo_signTxn", json!([[]])))
            .await;
        assert_eq!(result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_rejection_reaches_requester() {
        let (server, client) = connected_pair().await;
        let mut client_events = client.subscribe();
        tokio::spawn(async move {
            if let Ok(TransportEvent::CallRequest(req)) = client_events.recv().await {
                client.reject_request(req.id, "no").await.unwrap();
            }
        });

        let result = server
            .send_custom_request(JsonRpcRequest::new("algo_signTxn", json!([[]])))
            .await;
        assert_eq!(result, Err(TransportError::RequestRejected("no".to_string())));
    }

    #[tokio::test]
    async fn test_kill_fails_pending_request() {
        let (server, client) = connected_pair().await;
        let mut server_events = server.subscribe();
        let mut client_events = client.subscribe();
        tokio::spawn(async move {
            if let Ok(TransportEvent::CallRequest(_)) = client_events.recv().await {
                client.kill_session().await.unwrap();
            }
        });

        let result = server
            .send_custom_request(JsonRpcRequest::new("algo_signTxn", json!([[]])))
            .await;
        assert_eq!(result, Err(TransportError::Disconnected));
        assert!(matches!(
            server_events.recv().await.unwrap(),
            TransportEvent::Disconnect { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_request_id() {
        let (_server, client) = LoopbackBridge::new("x").pair(None, None);
        assert_eq!(
            client.approve_request(42, Value::Null).await,
            Err(TransportError::UnknownRequest(42))
        );
    }

    #[test]
    fn test_uri_names_bridge() {
        let (server, client) = LoopbackBridge::new("https://bridge.example").pair(None, None);
        assert!(server.uri().starts_with("wc:"));
        assert!(server.uri().ends_with("bridge=https://bridge.example"));
        assert_eq!(server.uri(), client.uri());
    }
}
