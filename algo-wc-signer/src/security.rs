//! Signer eligibility for inbound signing requests.
//!
//! Every record of a request is classified against the local accounts:
//!
//! - **Exempt**: no signature requested (`signers: []`), the slot stays null
//! - **Eligible**: exactly one expected signer, and it is a local account
//! - **Multisig**: several expected signers, or multisig metadata present
//! - **Unknown signer**: exactly one expected signer that is not local
//!
//! When `signers` is absent the expected signer is inferred from the
//! transaction: its authorizing address if rekeyed, otherwise its sender.
//!
//! ## Batch policy
//!
//! A batch is accepted only if every record is exempt or eligible. One
//! multisig or unknown-signer record rejects the whole batch and nothing is
//! signed. Records are checked in order, so the reported record is always the
//! first offending one.

use crate::protocol::{Signers, SigningTransaction};
use algo_txn::Address;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a batch was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("requires multisig")]
    Multisig,

    #[error("has unknown signer {signer}")]
    UnknownSigner { signer: Address },
}

/// A batch containing at least one record that cannot be signed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transaction {index} {reason}")]
pub struct BatchRejected {
    /// Position of the first offending record
    pub index: usize,
    pub reason: RejectReason,
}

/// Classification of a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// No signature contributed
    Exempt,
    /// Must be signed by this local account
    Eligible { signer: Address },
    /// Single-key signing cannot satisfy it
    IneligibleMultisig,
    /// The one expected signer is not a local account
    UnknownSigner { signer: Address },
}

impl Eligibility {
    fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Eligibility::Exempt | Eligibility::Eligible { .. } => None,
            Eligibility::IneligibleMultisig => Some(RejectReason::Multisig),
            Eligibility::UnknownSigner { signer } => {
                Some(RejectReason::UnknownSigner { signer: *signer })
            }
        }
    }
}

/// Decides which records the local accounts are obliged to sign.
#[derive(Debug, Clone, Default)]
pub struct SignerGuard {
    accounts: Vec<Address>,
}

impl SignerGuard {
    /// Create a guard for the given local accounts.
    pub fn new(accounts: Vec<Address>) -> Self {
        Self { accounts }
    }

    /// Classify one record.
    pub fn classify(&self, txn: &SigningTransaction) -> Eligibility {
        if !txn.must_sign() {
            return Eligibility::Exempt;
        }

        let signer = match &txn.signers {
            Signers::Required(list) if list.len() > 1 => return Eligibility::IneligibleMultisig,
            _ if txn.msig.is_some() => return Eligibility::IneligibleMultisig,
            Signers::Required(list) => match list.first() {
                Some(signer) => *signer,
                None => txn.declared_signer(),
            },
            Signers::Inferred | Signers::NotRequired => txn.declared_signer(),
        };

        if self.accounts.contains(&signer) {
            Eligibility::Eligible { signer }
        } else {
            Eligibility::UnknownSigner { signer }
        }
    }

    /// Classify a whole batch, failing on the first unsatisfiable record.
    pub fn check_batch(&self, txns: &[SigningTransaction]) -> Result<Vec<Eligibility>, BatchRejected> {
        let mut classes = Vec::with_capacity(txns.len());

        for (index, txn) in txns.iter().enumerate() {
            let class = self.classify(txn);
            if let Some(reason) = class.reject_reason() {
                warn!("Rejecting signing batch: transaction {} {}", index, reason);
                return Err(BatchRejected { index, reason });
            }
            debug!("Transaction {} classified as {:?}", index, class);
            classes.push(class);
        }

        Ok(classes)
    }
}
