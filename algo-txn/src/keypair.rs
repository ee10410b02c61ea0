//! ed25519 key pairs for transaction signing.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use crate::{Address, Error, SignedTransaction, Transaction};

/// Account key pair.
///
/// Signs transactions on behalf of its own address. When the transaction's
/// sender differs (a rekeyed account), the signed transaction records this
/// key's address as the authorizing address.
pub struct KeyPair {
    signing_key: SigningKey,
    address: Address,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Create a key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::new(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            address,
        }
    }

    /// The account address (public key).
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign raw bytes.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Sign a transaction and return the encoded signed transaction.
    pub fn sign_transaction(&self, txn: &Transaction) -> Result<Vec<u8>, Error> {
        let sig = self.sign(&txn.bytes_to_sign()?);
        let auth_addr = (txn.sender != self.address).then_some(self.address);
        SignedTransaction {
            sig: sig.to_vec(),
            txn: txn.clone(),
            auth_addr,
        }
        .encode()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_signing_key(self.signing_key.clone())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret key
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SuggestedParams;

    fn test_txn(sender: Address) -> Transaction {
        let params = SuggestedParams::new("testnet-v1.0", "genesis", 10);
        Transaction::payment(sender, Address::new([2u8; 32]), 1_000_000, &params)
    }

    #[test]
    fn test_from_seed_is_deterministic() {
        let a = KeyPair::from_seed(&[127u8; 32]);
        let b = KeyPair::from_seed(&[127u8; 32]);
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(KeyPair::generate().address(), KeyPair::generate().address());
    }

    #[test]
    fn test_sign_transaction_verifies() {
        let kp = KeyPair::from_seed(&[127u8; 32]);
        let txn = test_txn(kp.address());

        let bytes = kp.sign_transaction(&txn).unwrap();
        let signed = SignedTransaction::decode(&bytes).unwrap();

        assert_eq!(signed.txn, txn);
        assert_eq!(signed.auth_addr, None);
        assert!(signed.verify().is_ok());
    }

    #[test]
    fn test_rekeyed_sender_records_auth_addr() {
        let kp = KeyPair::from_seed(&[127u8; 32]);
        let txn = test_txn(Address::new([5u8; 32]));

        let bytes = kp.sign_transaction(&txn).unwrap();
        let signed = SignedTransaction::decode(&bytes).unwrap();

        assert_eq!(signed.auth_addr, Some(kp.address()));
        assert_eq!(signed.signer(), kp.address());
        assert!(signed.verify().is_ok());
    }

    #[test]
    fn test_tampered_transaction_fails_verification() {
        let kp = KeyPair::from_seed(&[127u8; 32]);
        let bytes = kp.sign_transaction(&test_txn(kp.address())).unwrap();

        let mut signed = SignedTransaction::decode(&bytes).unwrap();
        signed.txn.fee += 1;
        assert!(matches!(signed.verify(), Err(Error::Signature(_))));
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = KeyPair::from_seed(&[127u8; 32]);
        let debug = format!("{:?}", kp);
        assert!(debug.contains("address"));
        assert!(!debug.contains("signing_key"));
    }
}
