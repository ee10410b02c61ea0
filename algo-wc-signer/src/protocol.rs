//! Wire protocol for transaction signing requests.
//!
//! A signing request is a JSON-RPC call to [`SIGN_TXN_METHOD`] whose params
//! are the positional list `[WalletTransaction[], SignTxnOpts?]`. The answer
//! is an array of base64 signed transactions or nulls, one per record, in
//! request order. Position is the only correlation between a record and its
//! result.

use std::fmt;

use algo_txn::{Address, Transaction};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// RPC method carrying a signing request.
pub const SIGN_TXN_METHOD: &str = "algo_signTxn";

/// Chain id advertised when creating a session.
pub const ALGORAND_CHAIN_ID: u64 = 4160;

/// Per-slot signing results, same length and order as the request.
pub type SigningOutcome = Vec<Option<Vec<u8>>>;

/// Errors converting between transactions and their wire form.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid base64 at index {index}: {source}")]
    Base64 {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Invalid transaction at index {index}: {source}")]
    Transaction {
        index: usize,
        #[source]
        source: algo_txn::Error,
    },

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected {expected} results, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Multisig account description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigMetadata {
    /// Multisig version
    pub version: u8,
    /// Minimum number of signatures required
    pub threshold: u8,
    /// Possible signers. Order is significant.
    pub addrs: Vec<Address>,
}

/// Who is expected to sign a record.
///
/// On the wire `signers` is tri-state: an absent field, an empty list and a
/// populated list all mean different things and must not be collapsed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Signers {
    /// Field absent: the signer is inferred from the transaction
    #[default]
    Inferred,
    /// Empty list: no signature required, the record is informational
    NotRequired,
    /// Explicit signer list (never empty)
    Required(Vec<Address>),
}

impl Signers {
    /// Build from a list, mapping an empty list to [`Signers::NotRequired`].
    pub fn from_list(list: Vec<Address>) -> Self {
        if list.is_empty() {
            Signers::NotRequired
        } else {
            Signers::Required(list)
        }
    }

    pub fn is_inferred(&self) -> bool {
        matches!(self, Signers::Inferred)
    }

    pub fn is_required(&self) -> bool {
        match self {
            Signers::Inferred => true,
            Signers::NotRequired => false,
            Signers::Required(list) => !list.is_empty(),
        }
    }
}

impl Serialize for Signers {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Signers::Inferred => serializer.serialize_none(),
            Signers::NotRequired => serializer.serialize_seq(Some(0))?.end(),
            Signers::Required(list) => list.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Signers {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Vec<Address>>::deserialize(deserializer)? {
            None => Signers::Inferred,
            Some(list) => Signers::from_list(list),
        })
    }
}

/// One record of a signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    /// Base64 of the canonical unsigned transaction encoding
    pub txn: String,
    /// Signing address of a rekeyed account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_addr: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msig: Option<MultisigMetadata>,
    #[serde(default, skip_serializing_if = "Signers::is_inferred")]
    pub signers: Signers,
    /// Why this transaction is requested. Never inspected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Request-level options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignTxnOpts {
    /// Why the group is requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Params of a signing request: `[WalletTransaction[], SignTxnOpts?]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignTxnParams {
    pub txns: Vec<WalletTransaction>,
    pub opts: Option<SignTxnOpts>,
}

impl SignTxnParams {
    /// Build params; options are only attached for a non-empty message.
    pub fn new(txns: Vec<WalletTransaction>, message: Option<&str>) -> Self {
        let opts = message.filter(|m| !m.is_empty()).map(|m| SignTxnOpts {
            message: Some(m.to_string()),
        });
        Self { txns, opts }
    }

    /// The group message, if any.
    pub fn message(&self) -> Option<&str> {
        self.opts.as_ref().and_then(|o| o.message.as_deref())
    }
}

impl Serialize for SignTxnParams {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = if self.opts.is_some() { 2 } else { 1 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.txns)?;
        if let Some(opts) = &self.opts {
            seq.serialize_element(opts)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SignTxnParams {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ParamsVisitor;

        impl<'de> Visitor<'de> for ParamsVisitor {
            type Value = SignTxnParams;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("[WalletTransaction[], SignTxnOpts?]")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let txns = seq
                    .next_element::<Vec<WalletTransaction>>()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let opts = seq.next_element::<Option<SignTxnOpts>>()?.flatten();
                // Non-standard trailing params are tolerated
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(SignTxnParams { txns, opts })
            }
        }

        deserializer.deserialize_seq(ParamsVisitor)
    }
}

/// A transaction the requesting side wants signed, with its signing policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub txn: Transaction,
    /// False marks the transaction as informational only
    pub should_sign: bool,
    /// Expected signer(s); `None` lets the receiver infer from the sender
    pub signer: Option<Vec<Address>>,
    pub auth_addr: Option<Address>,
    pub msig: Option<MultisigMetadata>,
    pub message: Option<String>,
}

impl TransactionIntent {
    /// A transaction that must be signed by its (inferred) signer.
    pub fn new(txn: Transaction) -> Self {
        Self {
            txn,
            should_sign: true,
            signer: None,
            auth_addr: None,
            msig: None,
            message: None,
        }
    }

    /// A transaction included for context only.
    pub fn informational(txn: Transaction) -> Self {
        Self {
            should_sign: false,
            ..Self::new(txn)
        }
    }

    pub fn with_signer(mut self, signer: Address) -> Self {
        self.signer = Some(vec![signer]);
        self
    }

    pub fn with_signers(mut self, signers: Vec<Address>) -> Self {
        self.signer = Some(signers);
        self
    }

    pub fn with_auth_addr(mut self, auth_addr: Address) -> Self {
        self.auth_addr = Some(auth_addr);
        self
    }

    pub fn with_msig(mut self, msig: MultisigMetadata) -> Self {
        self.msig = Some(msig);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Signer field as it goes on the wire.
    pub fn signers(&self) -> Signers {
        if !self.should_sign {
            return Signers::NotRequired;
        }
        match &self.signer {
            Some(list) => Signers::from_list(list.clone()),
            None => Signers::Inferred,
        }
    }

    fn to_wire(&self) -> Result<WalletTransaction, algo_txn::Error> {
        Ok(WalletTransaction {
            txn: STANDARD.encode(self.txn.encode()?),
            auth_addr: self.auth_addr,
            msig: self.msig.clone(),
            signers: self.signers(),
            message: self.message.clone(),
        })
    }
}

/// A decoded record as presented to the signing side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningTransaction {
    pub txn: Transaction,
    pub signers: Signers,
    pub auth_addr: Option<Address>,
    pub msig: Option<MultisigMetadata>,
    pub message: Option<String>,
}

impl SigningTransaction {
    /// Whether a signature is expected for this record.
    pub fn must_sign(&self) -> bool {
        self.signers.is_required()
    }

    /// The signer implied by the transaction itself.
    pub fn declared_signer(&self) -> Address {
        self.auth_addr.unwrap_or(self.txn.sender)
    }

    fn from_wire(index: usize, record: &WalletTransaction) -> Result<Self, CodecError> {
        let raw = STANDARD
            .decode(&record.txn)
            .map_err(|source| CodecError::Base64 { index, source })?;
        let txn =
            Transaction::decode(&raw).map_err(|source| CodecError::Transaction { index, source })?;
        Ok(Self {
            txn,
            signers: record.signers.clone(),
            auth_addr: record.auth_addr,
            msig: record.msig.clone(),
            message: record.message.clone(),
        })
    }
}

/// A decoded signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub txns: Vec<SigningTransaction>,
    pub message: Option<String>,
}

impl SigningRequest {
    /// Decode every record of the params, preserving order.
    pub fn decode(params: &SignTxnParams) -> Result<Self, CodecError> {
        let txns = params
            .txns
            .iter()
            .enumerate()
            .map(|(index, record)| SigningTransaction::from_wire(index, record))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            txns,
            message: params.message().map(str::to_string),
        })
    }
}

/// Encode a group of intents into request params.
pub fn encode_request(
    intents: &[TransactionIntent],
    message: Option<&str>,
) -> Result<SignTxnParams, CodecError> {
    let txns = intents
        .iter()
        .enumerate()
        .map(|(index, intent)| {
            intent
                .to_wire()
                .map_err(|source| CodecError::Transaction { index, source })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SignTxnParams::new(txns, message))
}

/// Encode signing results for the response. Nulls stay null.
pub fn encode_outcome(outcome: &[Option<Vec<u8>>]) -> Vec<Option<String>> {
    outcome
        .iter()
        .map(|slot| slot.as_ref().map(|bytes| STANDARD.encode(bytes)))
        .collect()
}

/// Decode a response, checking it answers exactly `expected` records.
///
/// Null and empty-string elements both read as unsigned.
pub fn decode_outcome(
    result: Vec<Option<String>>,
    expected: usize,
) -> Result<SigningOutcome, CodecError> {
    if result.len() != expected {
        return Err(CodecError::LengthMismatch {
            expected,
            actual: result.len(),
        });
    }

    result
        .into_iter()
        .enumerate()
        .map(|(index, slot)| match slot {
            Some(text) if !text.is_empty() => STANDARD
                .decode(text)
                .map(Some)
                .map_err(|source| CodecError::Base64 { index, source }),
            _ => Ok(None),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use algo_txn::SuggestedParams;
    use serde_json::json;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 32])
    }

    fn payment(sender: Address, amount: u64) -> Transaction {
        let params = SuggestedParams::new("testnet-v1.0", "genesis", 100);
        Transaction::payment(sender, addr(0xee), amount, &params)
    }

    #[test]
    fn test_params_without_message_is_single_element() {
        let params = encode_request(&[TransactionIntent::new(payment(addr(1), 5))], None).unwrap();
        let value = serde_json::to_value(&params).unwrap();

        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array[0].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_params_with_message_has_options() {
        let params = encode_request(
            &[TransactionIntent::new(payment(addr(1), 5))],
            Some("Please sign"),
        )
        .unwrap();
        let value = serde_json::to_value(&params).unwrap();

        assert_eq!(value[1], json!({ "message": "Please sign" }));
    }

    #[test]
    fn test_empty_message_is_dropped() {
        let params = SignTxnParams::new(Vec::new(), Some(""));
        assert_eq!(params.opts, None);
    }

    #[test]
    fn test_signers_field_is_tristate_on_the_wire() {
        let txn = payment(addr(1), 5);
        let params = encode_request(
            &[
                TransactionIntent::new(txn.clone()),
                TransactionIntent::informational(txn.clone()),
                TransactionIntent::new(txn).with_signer(addr(1)),
            ],
            None,
        )
        .unwrap();
        let value = serde_json::to_value(&params).unwrap();
        let records = value[0].as_array().unwrap();

        assert!(records[0].get("signers").is_none());
        assert_eq!(records[1]["signers"], json!([]));
        assert_eq!(records[2]["signers"], json!([addr(1).to_string()]));
    }

    #[test]
    fn test_informational_ignores_declared_signer() {
        let intent = TransactionIntent::informational(payment(addr(1), 5)).with_signer(addr(1));
        assert_eq!(intent.signers(), Signers::NotRequired);
    }

    #[test]
    fn test_null_signers_reads_as_inferred() {
        let record: WalletTransaction =
            serde_json::from_value(json!({ "txn": "", "signers": null })).unwrap();
        assert_eq!(record.signers, Signers::Inferred);
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let intent = TransactionIntent::new(payment(addr(1), 5))
            .with_auth_addr(addr(2))
            .with_msig(MultisigMetadata {
                version: 1,
                threshold: 2,
                addrs: vec![addr(1), addr(2), addr(3)],
            })
            .with_message("rent");
        let params = encode_request(&[intent], None).unwrap();
        let value = serde_json::to_value(&params).unwrap();
        let record = &value[0][0];

        assert_eq!(record["authAddr"], json!(addr(2).to_string()));
        assert_eq!(record["msig"]["threshold"], json!(2));
        assert_eq!(record["message"], json!("rent"));
    }

    #[test]
    fn test_decode_preserves_intent_semantics() {
        let msig = MultisigMetadata {
            version: 1,
            threshold: 1,
            addrs: vec![addr(3), addr(4)],
        };
        let intents = vec![
            TransactionIntent::new(payment(addr(1), 1)),
            TransactionIntent::informational(payment(addr(2), 2)).with_message("fee payer"),
            TransactionIntent::new(payment(addr(3), 3)).with_signers(vec![addr(3), addr(4)]),
            TransactionIntent::new(payment(addr(5), 4))
                .with_signer(addr(6))
                .with_auth_addr(addr(6)),
            TransactionIntent::new(payment(addr(3), 5)).with_msig(msig),
        ];

        let params = encode_request(&intents, Some("group")).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        let params: SignTxnParams = serde_json::from_str(&json).unwrap();
        let request = SigningRequest::decode(&params).unwrap();

        assert_eq!(request.message.as_deref(), Some("group"));
        assert_eq!(request.txns.len(), intents.len());
        for (decoded, intent) in request.txns.iter().zip(&intents) {
            assert_eq!(decoded.txn, intent.txn);
            assert_eq!(decoded.must_sign(), intent.should_sign);
            assert_eq!(decoded.signers, intent.signers());
            assert_eq!(decoded.auth_addr, intent.auth_addr);
            assert_eq!(decoded.msig, intent.msig);
            assert_eq!(decoded.message, intent.message);
        }
    }

    #[test]
    fn test_declared_signer_prefers_auth_addr() {
        let params = encode_request(
            &[
                TransactionIntent::new(payment(addr(1), 1)),
                TransactionIntent::new(payment(addr(1), 1)).with_auth_addr(addr(9)),
            ],
            None,
        )
        .unwrap();
        let request = SigningRequest::decode(&params).unwrap();

        assert_eq!(request.txns[0].declared_signer(), addr(1));
        assert_eq!(request.txns[1].declared_signer(), addr(9));
    }

    #[test]
    fn test_decode_reports_bad_record_index() {
        let good = encode_request(&[TransactionIntent::new(payment(addr(1), 1))], None)
            .unwrap()
            .txns
            .remove(0);
        let bad = WalletTransaction {
            txn: "not base64!".to_string(),
            ..good.clone()
        };
        let params = SignTxnParams::new(vec![good, bad], None);

        let err = SigningRequest::decode(&params).unwrap_err();
        assert!(matches!(err, CodecError::Base64 { index: 1, .. }));
    }

    #[test]
    fn test_missing_record_list_rejected() {
        let result: Result<SignTxnParams, _> = serde_json::from_value(json!([]));
        assert!(result.is_err());
    }

    #[test]
    fn test_null_options_tolerated() {
        let params: SignTxnParams = serde_json::from_value(json!([[], null])).unwrap();
        assert!(params.txns.is_empty());
        assert_eq!(params.message(), None);
    }

    #[test]
    fn test_outcome_keeps_nulls_in_place() {
        let outcome = vec![None, Some(vec![1, 2, 3]), None];
        let encoded = encode_outcome(&outcome);
        assert_eq!(encoded, vec![None, Some("AQID".to_string()), None]);

        let decoded = decode_outcome(encoded, 3).unwrap();
        assert_eq!(decoded, outcome);
    }

    #[test]
    fn test_empty_string_result_reads_as_unsigned() {
        let decoded = decode_outcome(vec![Some(String::new())], 1).unwrap();
        assert_eq!(decoded, vec![None]);
    }

    #[test]
    fn test_outcome_length_mismatch() {
        let err = decode_outcome(vec![None, None], 3).unwrap_err();
        assert!(matches!(
            err,
            CodecError::LengthMismatch {
                expected: 3,
                actual: 2
            }
        ));

        let err = decode_outcome(vec![None, None], 1).unwrap_err();
        assert!(matches!(err, CodecError::LengthMismatch { .. }));
    }
}
