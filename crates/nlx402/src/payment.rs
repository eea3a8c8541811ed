use serde::Serialize;

use crate::quote::Nonce;

/// Durable proof that `tx_signature` paid for `nonce` and unlocked `token_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub tx_signature: String,
    pub nonce: Nonce,
    pub wallet: String,
    pub amount_lamports: u64,
    pub token_id: String,
    pub confirmed_at: i64,
}

/// Result of checking a transaction against a quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub amount_lamports: u64,
    pub sender: String,
    pub finalized: bool,
    /// Slot of the transaction; `None` when answered from a prior record.
    pub slot: Option<u64>,
    /// Set when the signature was already recorded for the same nonce.
    pub prior: Option<PaymentRecord>,
}
