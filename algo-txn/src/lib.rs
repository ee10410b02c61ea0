//! Algorand transaction primitives.
//!
//! Addresses, the unsigned transaction model with its canonical encoding,
//! transaction ids, and ed25519 key pairs that produce signed transaction
//! bytes. The signing protocol in `algo-wc-signer` treats everything here as
//! an opaque collaborator: it only needs to encode, decode, name the sender
//! and sign.

pub mod address;
pub mod keypair;
pub mod transaction;

pub use address::Address;
pub use keypair::KeyPair;
pub use transaction::{SignedTransaction, SuggestedParams, Transaction, TransactionKind};

/// Error type for address, transaction and signature handling.
#[derive(Debug)]
pub enum Error {
    /// Address text was not valid base32 or had the wrong length
    InvalidAddress(String),
    /// Address checksum did not match the public key
    ChecksumMismatch,
    /// Canonical (de)serialization failed
    Encoding(bincode::Error),
    /// Signature bytes or public key were malformed, or verification failed
    Signature(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidAddress(s) => write!(f, "Invalid address: {}", s),
            Error::ChecksumMismatch => write!(f, "Address checksum mismatch"),
            Error::Encoding(e) => write!(f, "Encoding error: {}", e),
            Error::Signature(s) => write!(f, "Signature error: {}", s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Encoding(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Encoding(e)
    }
}
