//! Algorand transaction signing over a WalletConnect-style session.
//!
//! A dapp (the server side) asks a wallet (the client side) to sign groups
//! of Algorand transactions through an encrypted, relayed session. This
//! crate implements the signing protocol on top of an abstract
//! [`Transport`]: the `algo_signTxn` codec, the wallet's signer eligibility
//! rules, and both session roles.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      algo_signTxn       ┌─────────────────┐
//! │  ServerSession  │ ──────────────────────► │  ClientSession  │
//! │     (dapp)      │ ◄────────────────────── │    (wallet)     │
//! └─────────────────┘   base64 txns | null    └─────────────────┘
//!          │                                           │
//!          └──────────────── Transport ────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Tri-state signers**: absent (infer), empty (exempt), populated (explicit)
//! - **Atomic batches**: one multisig or foreign record rejects the whole group
//! - **No hanging calls**: a torn-down session fails every pending request
//!
//! ## Usage
//!
//! Run a dapp and a wallet against each other in one process:
//! ```bash
//! RUST_LOG=debug algo-wc-loopback --group-size 2 --message "Pay for the swap"
//! ```

pub mod client;
pub mod config;
pub mod loopback;
pub mod protocol;
pub mod security;
pub mod server;
pub mod session;
pub mod transport;

pub use client::{
    AccountResolver, ClientEvent, ClientSession, HandlerError, KeyPairSigner, SigningHandler,
    StaticAccounts,
};
pub use config::{ConfigError, SessionConfig};
pub use loopback::{LoopbackBridge, LoopbackTransport};
pub use protocol::{
    CodecError, MultisigMetadata, SignTxnParams, Signers, SigningOutcome, SigningRequest,
    SigningTransaction, TransactionIntent, WalletTransaction, ALGORAND_CHAIN_ID, SIGN_TXN_METHOD,
};
pub use security::{BatchRejected, Eligibility, RejectReason, SignerGuard};
pub use server::{ServerEvent, ServerSession};
pub use session::{EventEmitter, SessionError, SessionState, SessionStatus};
pub use transport::{PeerMeta, Transport, TransportError, TransportEvent};
