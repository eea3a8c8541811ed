//! Read-only view of the Solana ledger used to confirm payments.
//!
//! - [`LedgerClient`]: signature status and transaction lookup
//! - [`PollPolicy`]: how long and how often to wait for finality
//!
//! See [`crate::solana::SolanaRpcClient`] for the JSON-RPC implementation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{FINALITY_TIMEOUT_SECS, POLL_INITIAL_BACKOFF_MS, POLL_MAX_BACKOFF_MS};

/// Solana commitment levels, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(format!("unknown commitment level: {other}")),
        }
    }
}

/// Status of a signature as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: u64,
    /// `None` when the node has seen the signature but reports no level.
    pub commitment: Option<Commitment>,
    /// On-chain execution error, rendered as text.
    pub err: Option<String>,
}

impl SignatureStatus {
    pub fn reaches(&self, target: Commitment) -> bool {
        self.commitment.is_some_and(|c| c >= target)
    }
}

/// A native SOL transfer instruction (top-level or inner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub source: String,
    pub destination: String,
    pub lamports: u64,
}

/// The parts of a confirmed transaction needed to verify a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub fee_payer: String,
    pub err: Option<String>,
    pub transfers: Vec<Transfer>,
    /// Text of every memo instruction, top-level and inner.
    pub memos: Vec<String>,
}

impl LedgerTransaction {
    /// Sum of lamports moved from `source` to `destination`.
    pub fn lamports_between(&self, source: &str, destination: &str) -> u64 {
        self.transfers
            .iter()
            .filter(|t| t.source == source && t.destination == destination)
            .fold(0u64, |acc, t| acc.saturating_add(t.lamports))
    }

    /// Whether any memo is exactly `binding` or `binding` followed by `:`.
    pub fn has_memo(&self, binding: &str) -> bool {
        self.memos.iter().any(|memo| {
            memo.strip_prefix(binding)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("ledger response decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Transport(_) => true,
            // Node behind / slot skipped / block not yet available.
            LedgerError::Rpc { code, .. } => matches!(code, -32004 | -32005 | -32007 | -32014),
            LedgerError::Decode(_) => false,
        }
    }
}

/// Read-only ledger access.
pub trait LedgerClient: Send + Sync {
    /// Current status of `signature`, or `None` if the cluster has not seen it.
    fn signature_status(
        &self,
        signature: &str,
    ) -> impl std::future::Future<Output = Result<Option<SignatureStatus>, LedgerError>> + Send;

    /// Fetch a transaction at the given commitment, or `None` if unavailable.
    fn get_transaction(
        &self,
        signature: &str,
        commitment: Commitment,
    ) -> impl std::future::Future<Output = Result<Option<LedgerTransaction>, LedgerError>> + Send;
}

impl<T: LedgerClient> LedgerClient for Arc<T> {
    fn signature_status(
        &self,
        signature: &str,
    ) -> impl std::future::Future<Output = Result<Option<SignatureStatus>, LedgerError>> + Send
    {
        (**self).signature_status(signature)
    }

    fn get_transaction(
        &self,
        signature: &str,
        commitment: Commitment,
    ) -> impl std::future::Future<Output = Result<Option<LedgerTransaction>, LedgerError>> + Send
    {
        (**self).get_transaction(signature, commitment)
    }
}

/// How the verifier waits for a signature to reach the target commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub commitment: Commitment,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            commitment: Commitment::Finalized,
            initial_backoff: Duration::from_millis(POLL_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(POLL_MAX_BACKOFF_MS),
            timeout: Duration::from_secs(FINALITY_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_ordering() {
        let status = SignatureStatus {
            slot: 1,
            commitment: Some(Commitment::Confirmed),
            err: None,
        };
        assert!(status.reaches(Commitment::Processed));
        assert!(status.reaches(Commitment::Confirmed));
        assert!(!status.reaches(Commitment::Finalized));
        assert_eq!("Finalized".parse::<Commitment>(), Ok(Commitment::Finalized));
    }

    #[test]
    fn transfers_are_summed_per_pair() {
        let tx = LedgerTransaction {
            signature: "sig".into(),
            slot: 10,
            block_time: Some(0),
            fee_payer: "payer".into(),
            err: None,
            transfers: vec![
                Transfer {
                    source: "payer".into(),
                    destination: "treasury".into(),
                    lamports: 4,
                },
                Transfer {
                    source: "payer".into(),
                    destination: "treasury".into(),
                    lamports: 6,
                },
                Transfer {
                    source: "other".into(),
                    destination: "treasury".into(),
                    lamports: 100,
                },
            ],
            memos: Vec::new(),
        };
        assert_eq!(tx.lamports_between("payer", "treasury"), 10);
        assert_eq!(tx.lamports_between("payer", "elsewhere"), 0);
    }

    #[test]
    fn memo_binding_needs_a_field_boundary() {
        let tx = LedgerTransaction {
            signature: "sig".into(),
            slot: 10,
            block_time: None,
            fee_payer: "payer".into(),
            err: None,
            transfers: Vec::new(),
            memos: vec!["hello".into(), "nlx402:abcd:rpc".into()],
        };
        assert!(tx.has_memo("nlx402:abcd"));
        assert!(!tx.has_memo("nlx402:abc"));
        assert!(!tx.has_memo("nlx402:abcde"));

        let exact = LedgerTransaction {
            memos: vec!["nlx402:abcd".into()],
            ..tx
        };
        assert!(exact.has_memo("nlx402:abcd"));
    }
}
