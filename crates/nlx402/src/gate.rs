use std::sync::Arc;

use crate::error::Nlx402Error;
use crate::security::redact;
use crate::store::TokenStore;
use crate::token::{AccessToken, ConsumeOutcome};

/// Longest bearer string accepted before touching storage.
const MAX_TOKEN_LEN: usize = 128;

/// Outcome of admitting a metered call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub wallet: String,
    pub queries_used: u64,
    pub remaining: u64,
    pub rate_limit_per_sec: u32,
}

impl From<ConsumeOutcome> for Admission {
    fn from(outcome: ConsumeOutcome) -> Self {
        Self {
            remaining: outcome.remaining(),
            wallet: outcome.wallet,
            queries_used: outcome.queries_used,
            rate_limit_per_sec: outcome.rate_limit_per_sec,
        }
    }
}

/// Per-request quota check run before any metered work.
pub struct Gate {
    tokens: Arc<dyn TokenStore>,
}

impl Gate {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self { tokens }
    }

    /// Consume `units` from the token. Nothing downstream may run on `Err`.
    pub fn admit(&self, token_id: &str, units: u64) -> Result<Admission, Nlx402Error> {
        if token_id.is_empty() || token_id.len() > MAX_TOKEN_LEN {
            return Err(Nlx402Error::InvalidToken);
        }
        match self.tokens.consume_token(token_id, units) {
            Ok(outcome) => Ok(outcome.into()),
            Err(e) => {
                tracing::debug!(token = %redact(token_id), reason = e.kind(), "gate rejected request");
                Err(e)
            }
        }
    }

    /// Read a token without consuming quota.
    pub fn status(&self, token_id: &str) -> Result<AccessToken, Nlx402Error> {
        if token_id.is_empty() || token_id.len() > MAX_TOKEN_LEN {
            return Err(Nlx402Error::InvalidToken);
        }
        self.tokens
            .get_token(token_id)?
            .ok_or(Nlx402Error::InvalidToken)
    }
}

/// Extract the credential from an `Authorization: Bearer <token>` header value.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::token::TokenPolicy;

    #[test]
    fn parse_bearer_accepts_case_insensitive_scheme() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer  abc "), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("abc"), None);
    }

    #[test]
    fn admit_reports_remaining_quota() {
        let store = Arc::new(InMemoryStore::new());
        let token = store
            .create_token("wallet", 5, &TokenPolicy::default())
            .unwrap();
        let gate = Gate::new(store);

        let admission = gate.admit(&token.token_id, 2).unwrap();
        assert_eq!(admission.remaining, 3);
        assert_eq!(admission.wallet, "wallet");
        assert_eq!(admission.rate_limit_per_sec, 10);
        assert!(matches!(
            gate.admit(&token.token_id, 4),
            Err(Nlx402Error::QuotaExceeded)
        ));
        assert!(matches!(gate.admit("", 1), Err(Nlx402Error::InvalidToken)));
    }

    #[test]
    fn status_does_not_consume() {
        let store = Arc::new(InMemoryStore::new());
        let token = store
            .create_token("wallet", 5, &TokenPolicy::default())
            .unwrap();
        let gate = Gate::new(store);

        assert_eq!(gate.status(&token.token_id).unwrap().queries_used, 0);
        assert_eq!(gate.status(&token.token_id).unwrap().remaining(), 5);
        assert!(matches!(gate.status("nope"), Err(Nlx402Error::InvalidToken)));
    }
}
