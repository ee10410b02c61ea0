//! Unsigned and signed transactions.
//!
//! The canonical encoding of a transaction is its `bincode` serialization.
//! Signatures cover the encoding prefixed with the `TX` domain tag, and the
//! transaction id is the unpadded base32 SHA-512/256 digest of those bytes.

use data_encoding::BASE32_NOPAD;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};

use crate::{Address, Error};

/// Domain separation tag for transaction signatures and ids.
pub const TX_TAG: &[u8] = b"TX";

/// Validity window used when building transactions from suggested params.
pub const DEFAULT_VALIDITY_ROUNDS: u64 = 1000;

/// Minimum network fee in microAlgos.
pub const MIN_FEE: u64 = 1000;

/// Network parameters needed to build a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedParams {
    pub fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
    /// Base64 genesis hash, as reported by the node
    pub genesis_hash: String,
}

impl SuggestedParams {
    /// Params valid from `first_valid` for the default window, at minimum fee.
    pub fn new(genesis_id: impl Into<String>, genesis_hash: impl Into<String>, first_valid: u64) -> Self {
        Self {
            fee: MIN_FEE,
            first_valid,
            last_valid: first_valid + DEFAULT_VALIDITY_ROUNDS,
            genesis_id: genesis_id.into(),
            genesis_hash: genesis_hash.into(),
        }
    }
}

/// Type-specific transaction fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Algo payment
    Payment {
        receiver: Address,
        amount: u64,
        close_remainder_to: Option<Address>,
    },
    /// Asset transfer
    AssetTransfer {
        asset_id: u64,
        receiver: Address,
        amount: u64,
    },
}

/// An unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Declared sender; the signer unless the account is rekeyed
    pub sender: Address,
    pub fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
    pub genesis_hash: String,
    pub note: Vec<u8>,
    pub kind: TransactionKind,
}

impl Transaction {
    /// Build a payment transaction.
    pub fn payment(sender: Address, receiver: Address, amount: u64, params: &SuggestedParams) -> Self {
        Self::with_params(
            sender,
            params,
            TransactionKind::Payment {
                receiver,
                amount,
                close_remainder_to: None,
            },
        )
    }

    /// Build an asset transfer transaction.
    pub fn asset_transfer(
        sender: Address,
        receiver: Address,
        asset_id: u64,
        amount: u64,
        params: &SuggestedParams,
    ) -> Self {
        Self::with_params(
            sender,
            params,
            TransactionKind::AssetTransfer {
                asset_id,
                receiver,
                amount,
            },
        )
    }

    fn with_params(sender: Address, params: &SuggestedParams, kind: TransactionKind) -> Self {
        Self {
            sender,
            fee: params.fee,
            first_valid: params.first_valid,
            last_valid: params.last_valid,
            genesis_id: params.genesis_id.clone(),
            genesis_hash: params.genesis_hash.clone(),
            note: Vec::new(),
            kind,
        }
    }

    /// Attach a note.
    pub fn with_note(mut self, note: impl Into<Vec<u8>>) -> Self {
        self.note = note.into();
        self
    }

    /// Canonical unsigned encoding.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a canonical unsigned encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Bytes covered by a signature: `TX` || encoding.
    pub fn bytes_to_sign(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = TX_TAG.to_vec();
        bytes.extend_from_slice(&self.encode()?);
        Ok(bytes)
    }

    /// Transaction id.
    pub fn id(&self) -> Result<String, Error> {
        let digest = Sha512_256::digest(self.bytes_to_sign()?);
        Ok(BASE32_NOPAD.encode(&digest))
    }
}

/// A transaction together with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// ed25519 signature (64 bytes)
    pub sig: Vec<u8>,
    pub txn: Transaction,
    /// Signing address when it differs from the sender (rekeyed account)
    pub auth_addr: Option<Address>,
}

impl SignedTransaction {
    /// Canonical encoding of the signed transaction.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode signed transaction bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// The address whose key produced the signature.
    pub fn signer(&self) -> Address {
        self.auth_addr.unwrap_or(self.txn.sender)
    }

    /// Verify the signature against the signing address.
    pub fn verify(&self) -> Result<(), Error> {
        let key = VerifyingKey::from_bytes(self.signer().as_bytes())
            .map_err(|e| Error::Signature(e.to_string()))?;
        let sig = Signature::from_slice(&self.sig).map_err(|e| Error::Signature(e.to_string()))?;
        key.verify(&self.txn.bytes_to_sign()?, &sig)
            .map_err(|e| Error::Signature(e.to_string()))
    }
}
