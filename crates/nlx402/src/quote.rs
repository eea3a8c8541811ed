use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{
    lamports_to_sol, BPS_DENOMINATOR, DEFAULT_RECIPIENT, MEMO_PREFIX, PRICE_PER_QUERY_LAMPORTS,
    QUOTE_TTL_SECS,
};
use crate::error::Nlx402Error;
use crate::security::validate_pubkey;
use crate::store::{unix_now, NonceStore};

/// Single-use 128-bit identifier binding a quote to one future payment.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; 16]);

impl Nonce {
    /// Fresh nonce from the OS CSPRNG.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First 8 hex chars, for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Memo a payment must carry to settle the quote minted with this nonce.
    pub fn payment_memo(&self) -> String {
        format!("{MEMO_PREFIX}:{self}")
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.short())
    }
}

impl FromStr for Nonce {
    type Err = Nlx402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s.trim(), &mut bytes).map_err(|_| {
            Nlx402Error::InvalidRequest("nonce must be 32 hex characters".to_string())
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle of a quote. Both non-pending states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteState {
    Pending,
    Consumed,
    Expired,
}

impl QuoteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteState::Pending => "pending",
            QuoteState::Consumed => "consumed",
            QuoteState::Expired => "expired",
        }
    }
}

impl FromStr for QuoteState {
    type Err = Nlx402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QuoteState::Pending),
            "consumed" => Ok(QuoteState::Consumed),
            "expired" => Ok(QuoteState::Expired),
            other => Err(Nlx402Error::Storage(format!("unknown quote state: {other}"))),
        }
    }
}

/// A priced offer for a batch of queries, payable once before `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub nonce: Nonce,
    pub wallet: String,
    pub query_count: u64,
    pub price_lamports: u64,
    pub discount_bps: u16,
    pub recipient: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub state: QuoteState,
}

impl Quote {
    /// State as observed at `now`: a pending quote past its deadline reads as expired.
    pub fn state_at(&self, now: i64) -> QuoteState {
        match self.state {
            QuoteState::Pending if self.expires_at <= now => QuoteState::Expired,
            state => state,
        }
    }

    pub fn price_sol(&self) -> f64 {
        lamports_to_sol(self.price_lamports)
    }

    /// Seconds left before the quote lapses.
    pub fn valid_for(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }
}

/// A published pricing bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub query_count: u64,
    pub discount_bps: u16,
}

/// The published tier table. Only these query counts can be quoted.
pub const TIERS: [Tier; 4] = [
    Tier {
        query_count: 100,
        discount_bps: 0,
    },
    Tier {
        query_count: 1_000,
        discount_bps: 500,
    },
    Tier {
        query_count: 10_000,
        discount_bps: 1_000,
    },
    Tier {
        query_count: 100_000,
        discount_bps: 1_500,
    },
];

impl Tier {
    /// Look up the tier for an exact query count.
    pub fn for_query_count(query_count: u64) -> Result<Tier, Nlx402Error> {
        TIERS
            .iter()
            .copied()
            .find(|t| t.query_count == query_count)
            .ok_or(Nlx402Error::InvalidTier(query_count))
    }

    /// `query_count × base × (10000 − discount) / 10000`, in lamports.
    pub fn price_lamports(&self) -> Result<u64, Nlx402Error> {
        let overflow = || Nlx402Error::InvalidTier(self.query_count);
        let undiscounted = self
            .query_count
            .checked_mul(PRICE_PER_QUERY_LAMPORTS)
            .ok_or_else(overflow)?;
        let keep = BPS_DENOMINATOR
            .checked_sub(u64::from(self.discount_bps))
            .ok_or_else(overflow)?;
        Ok(undiscounted.checked_mul(keep).ok_or_else(overflow)? / BPS_DENOMINATOR)
    }
}

/// Prices query batches and mints nonces. Holds no per-quote state of its own.
pub struct QuoteService {
    store: Arc<dyn NonceStore>,
    recipient: String,
    ttl: Duration,
}

impl QuoteService {
    pub fn new(store: Arc<dyn NonceStore>) -> Self {
        Self {
            store,
            recipient: DEFAULT_RECIPIENT.to_string(),
            ttl: Duration::from_secs(QUOTE_TTL_SECS),
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn tiers(&self) -> &'static [Tier] {
        &TIERS
    }

    /// Price `query_count` queries for `wallet` and store a pending quote.
    pub fn generate_quote(&self, wallet: &str, query_count: u64) -> Result<Quote, Nlx402Error> {
        let tier = Tier::for_query_count(query_count)?;
        validate_pubkey(wallet)?;

        let now = unix_now();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let quote = Quote {
            nonce: Nonce::random(),
            wallet: wallet.to_string(),
            query_count,
            price_lamports: tier.price_lamports()?,
            discount_bps: tier.discount_bps,
            recipient: self.recipient.clone(),
            created_at: now,
            expires_at: now.saturating_add(ttl),
            state: QuoteState::Pending,
        };
        self.store.put(&quote)?;

        tracing::info!(
            nonce = %quote.nonce.short(),
            wallet = %wallet,
            query_count,
            price_lamports = quote.price_lamports,
            "quote issued"
        );
        Ok(quote)
    }

    /// Pre-flight check that a nonce is still payable by `wallet`. Never consumes.
    pub fn verify_quote(&self, nonce: &Nonce, wallet: &str) -> Result<Quote, Nlx402Error> {
        let quote = self.store.get(nonce)?.ok_or(Nlx402Error::NonceExpired)?;
        match quote.state {
            QuoteState::Pending => {}
            QuoteState::Consumed => return Err(Nlx402Error::NonceAlreadyConsumed),
            QuoteState::Expired => return Err(Nlx402Error::NonceExpired),
        }
        if quote.wallet != wallet {
            return Err(Nlx402Error::WalletMismatch);
        }
        Ok(quote)
    }
}
