//! Storage traits for quotes, access tokens and payment records.
//!
//! Every correctness-bearing transition is a single atomic operation on the
//! backend: nonce consumption is a compare-and-swap, quota consumption is a
//! conditional increment, and unlock commits nonce + record + token together.

pub mod memory;
pub mod sqlite;

use serde::Serialize;

use crate::error::Nlx402Error;
use crate::payment::PaymentRecord;
use crate::quote::{Nonce, Quote};
use crate::token::{AccessToken, ConsumeOutcome, TokenPolicy};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Durable, TTL-aware store of quotes keyed by nonce.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait NonceStore: Send + Sync {
    /// Store a new pending quote. Fails if the nonce already exists.
    fn put(&self, quote: &Quote) -> Result<(), Nlx402Error>;

    /// Read a quote with its state projected to now.
    fn get(&self, nonce: &Nonce) -> Result<Option<Quote>, Nlx402Error>;

    /// Atomically move a quote from pending to consumed.
    ///
    /// Succeeds exactly once per nonce. Later calls fail
    /// `NonceAlreadyConsumed`; any call past `expires_at` (or for an unknown
    /// nonce) fails `NonceExpired`.
    fn consume(&self, nonce: &Nonce) -> Result<Quote, Nlx402Error>;

    /// Delete quotes whose `expires_at + retention_secs` has passed. Returns number purged.
    fn purge_expired(&self, retention_secs: u64) -> usize;
}

/// Durable store of access tokens with an atomic quota decrement.
pub trait TokenStore: Send + Sync {
    fn insert_token(&self, token: &AccessToken) -> Result<(), Nlx402Error>;

    fn get_token(&self, token_id: &str) -> Result<Option<AccessToken>, Nlx402Error>;

    /// Increment `queries_used` by `units` only if the token is unexpired and
    /// the result stays within `queries_allowed`.
    fn consume_token(&self, token_id: &str, units: u64) -> Result<ConsumeOutcome, Nlx402Error>;

    /// Delete tokens whose `expires_at + retention_secs` has passed. Returns number purged.
    fn purge_expired_tokens(&self, retention_secs: u64) -> usize;

    /// Mint and store a fresh token for `wallet`.
    fn create_token(
        &self,
        wallet: &str,
        queries_allowed: u64,
        policy: &TokenPolicy,
    ) -> Result<AccessToken, Nlx402Error> {
        let token = AccessToken::issue(wallet, queries_allowed, policy);
        self.insert_token(&token)?;
        Ok(token)
    }
}

/// Lookup of settled payments by transaction signature.
pub trait PaymentRecordStore: Send + Sync {
    fn get_payment(&self, tx_signature: &str) -> Result<Option<PaymentRecord>, Nlx402Error>;
}

/// Counters reported by `GET /stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub pending_quotes: u64,
    pub consumed_quotes: u64,
    pub active_tokens: u64,
    pub total_queries_used: u64,
    pub payments_recorded: u64,
}

/// A backend able to commit an unlock as one all-or-nothing step.
pub trait IssuanceStore: NonceStore + TokenStore + PaymentRecordStore {
    /// Consume `record.nonce`, insert `record`, and insert `token` atomically.
    ///
    /// On any failure nothing is written: the nonce stays pending and no
    /// token exists. A signature already recorded fails `SignatureAlreadyUsed`.
    fn commit_unlock(&self, record: &PaymentRecord, token: &AccessToken)
        -> Result<(), Nlx402Error>;

    fn stats(&self) -> Result<StoreStats, Nlx402Error>;
}

/// Helper to get current unix timestamp in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Cutoff for purging rows that expired more than `retention_secs` ago.
pub(crate) fn purge_cutoff(retention_secs: u64) -> i64 {
    unix_now().saturating_sub(i64::try_from(retention_secs).unwrap_or(i64::MAX))
}
