use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::constants::{DEFAULT_RATE_LIMIT_PER_SEC, TOKEN_TTL_SECS};
use crate::security::{generate_token_id, redact};
use crate::store::unix_now;

/// Issuance parameters applied to every new access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub ttl: Duration,
    pub rate_limit_per_sec: u32,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(TOKEN_TTL_SECS),
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Exhausted,
    Expired,
}

/// A bearer credential entitling its holder to `queries_allowed` metered calls.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub token_id: String,
    pub wallet: String,
    pub queries_allowed: u64,
    pub queries_used: u64,
    pub issued_at: i64,
    pub expires_at: i64,
    pub rate_limit_per_sec: u32,
}

impl AccessToken {
    /// Mint a new, unused token for `wallet`.
    pub fn issue(wallet: &str, queries_allowed: u64, policy: &TokenPolicy) -> Self {
        let now = unix_now();
        let ttl = i64::try_from(policy.ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            token_id: generate_token_id(),
            wallet: wallet.to_string(),
            queries_allowed,
            queries_used: 0,
            issued_at: now,
            expires_at: now.saturating_add(ttl),
            rate_limit_per_sec: policy.rate_limit_per_sec,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.queries_allowed.saturating_sub(self.queries_used)
    }

    pub fn status_at(&self, now: i64) -> TokenStatus {
        if now >= self.expires_at {
            TokenStatus::Expired
        } else if self.queries_used >= self.queries_allowed {
            TokenStatus::Exhausted
        } else {
            TokenStatus::Active
        }
    }

    /// Seconds until expiry, floored at zero.
    pub fn expires_in(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_id", &redact(&self.token_id))
            .field("wallet", &self.wallet)
            .field("queries_allowed", &self.queries_allowed)
            .field("queries_used", &self.queries_used)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .finish()
    }
}

/// Post-update counters returned by a successful quota decrement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeOutcome {
    pub wallet: String,
    pub queries_used: u64,
    pub queries_allowed: u64,
    pub rate_limit_per_sec: u32,
}

impl ConsumeOutcome {
    pub fn remaining(&self) -> u64 {
        self.queries_allowed.saturating_sub(self.queries_used)
    }
}
