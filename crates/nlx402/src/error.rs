use thiserror::Error;

use crate::ledger::LedgerError;

/// JSON-RPC "invalid params", returned by Solana for malformed signatures.
const RPC_INVALID_PARAMS: i64 = -32602;

/// Errors returned by nlx402 operations.
#[derive(Debug, Error)]
pub enum Nlx402Error {
    #[error("query count {0} is not a published tier")]
    InvalidTier(u64),

    #[error("quote nonce is expired or unknown")]
    NonceExpired,

    #[error("quote nonce has already been consumed")]
    NonceAlreadyConsumed,

    #[error("transaction {0} not found on the ledger")]
    TransactionNotFound(String),

    #[error("transaction {0} did not reach finality in time")]
    TransactionNotConfirmed(String),

    #[error("payment of {paid} lamports is below the quoted {required} lamports")]
    InsufficientPayment { paid: u64, required: u64 },

    #[error("transaction does not transfer to the quote recipient")]
    InvalidRecipient,

    #[error("transaction failed on-chain: {0}")]
    TransactionFailed(String),

    #[error("access token has expired")]
    TokenExpired,

    #[error("access token quota exhausted")]
    QuotaExceeded,

    #[error("access token is not recognized")]
    InvalidToken,

    #[error("wallet does not match the quote")]
    WalletMismatch,

    #[error("transaction was not signed by the quoted wallet")]
    SenderMismatch,

    #[error("transaction carries no memo binding it to this quote")]
    PaymentNotBound,

    #[error("transaction signature already unlocked a different quote")]
    SignatureAlreadyUsed,

    #[error("payment was made before the quote was issued")]
    PaymentPredatesQuote,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl Nlx402Error {
    /// Stable snake_case code used in HTTP error bodies and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Nlx402Error::InvalidTier(_) => "invalid_tier",
            Nlx402Error::NonceExpired => "nonce_expired",
            Nlx402Error::NonceAlreadyConsumed => "nonce_already_consumed",
            Nlx402Error::TransactionNotFound(_) => "transaction_not_found",
            Nlx402Error::TransactionNotConfirmed(_) => "transaction_not_confirmed",
            Nlx402Error::InsufficientPayment { .. } => "insufficient_payment",
            Nlx402Error::InvalidRecipient => "invalid_recipient",
            Nlx402Error::TransactionFailed(_) => "transaction_failed",
            Nlx402Error::TokenExpired => "token_expired",
            Nlx402Error::QuotaExceeded => "quota_exceeded",
            Nlx402Error::InvalidToken => "invalid_token",
            Nlx402Error::WalletMismatch => "wallet_mismatch",
            Nlx402Error::SenderMismatch => "sender_mismatch",
            Nlx402Error::PaymentNotBound => "payment_not_bound",
            Nlx402Error::SignatureAlreadyUsed => "signature_already_used",
            Nlx402Error::PaymentPredatesQuote => "payment_predates_quote",
            Nlx402Error::InvalidRequest(_) => "invalid_request",
            Nlx402Error::Ledger(_) => "ledger_error",
            Nlx402Error::Storage(_) => "storage_error",
        }
    }

    /// Whether the same request may succeed if retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Nlx402Error::TransactionNotConfirmed(_)
                | Nlx402Error::Ledger(_)
                | Nlx402Error::Storage(_)
        )
    }
}

impl From<rusqlite::Error> for Nlx402Error {
    fn from(e: rusqlite::Error) -> Self {
        Nlx402Error::Storage(e.to_string())
    }
}

impl From<LedgerError> for Nlx402Error {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Rpc { code, message } if code == RPC_INVALID_PARAMS => {
                Nlx402Error::InvalidRequest(message)
            }
            other => Nlx402Error::Ledger(other.to_string()),
        }
    }
}
