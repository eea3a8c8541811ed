use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{
    purge_cutoff, unix_now, IssuanceStore, NonceStore, PaymentRecordStore, StoreStats, TokenStore,
};
use crate::error::Nlx402Error;
use crate::payment::PaymentRecord;
use crate::quote::{Nonce, Quote, QuoteState};
use crate::token::{AccessToken, ConsumeOutcome, TokenStatus};

/// In-memory store backed by DashMap. Fast but lost on restart.
///
/// Atomicity comes from DashMap's per-shard write locks: the guard returned
/// by `get_mut` / `entry` is held across each check-and-set. `commit_unlock`
/// takes locks in the order quotes → payments → tokens.
pub struct InMemoryStore {
    quotes: DashMap<Nonce, Quote>,
    payments: DashMap<String, PaymentRecord>,
    tokens: DashMap<String, AccessToken>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            quotes: DashMap::new(),
            payments: DashMap::new(),
            tokens: DashMap::new(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_consumable(quote: &Quote, now: i64) -> Result<(), Nlx402Error> {
    if quote.expires_at <= now {
        return Err(Nlx402Error::NonceExpired);
    }
    if quote.state != QuoteState::Pending {
        return Err(Nlx402Error::NonceAlreadyConsumed);
    }
    Ok(())
}

impl NonceStore for InMemoryStore {
    fn put(&self, quote: &Quote) -> Result<(), Nlx402Error> {
        match self.quotes.entry(quote.nonce) {
            Entry::Occupied(_) => Err(Nlx402Error::Storage("duplicate nonce".to_string())),
            Entry::Vacant(v) => {
                v.insert(quote.clone());
                Ok(())
            }
        }
    }

    fn get(&self, nonce: &Nonce) -> Result<Option<Quote>, Nlx402Error> {
        let now = unix_now();
        Ok(self.quotes.get(nonce).map(|q| {
            let mut quote = q.clone();
            quote.state = quote.state_at(now);
            quote
        }))
    }

    fn consume(&self, nonce: &Nonce) -> Result<Quote, Nlx402Error> {
        let mut quote = self
            .quotes
            .get_mut(nonce)
            .ok_or(Nlx402Error::NonceExpired)?;
        check_consumable(&quote, unix_now())?;
        quote.state = QuoteState::Consumed;
        Ok(quote.clone())
    }

    fn purge_expired(&self, retention_secs: u64) -> usize {
        let cutoff = purge_cutoff(retention_secs);
        let before = self.quotes.len();
        self.quotes.retain(|_, q| q.expires_at >= cutoff);
        before - self.quotes.len()
    }
}

impl TokenStore for InMemoryStore {
    fn insert_token(&self, token: &AccessToken) -> Result<(), Nlx402Error> {
        match self.tokens.entry(token.token_id.clone()) {
            Entry::Occupied(_) => Err(Nlx402Error::Storage("duplicate token id".to_string())),
            Entry::Vacant(v) => {
                v.insert(token.clone());
                Ok(())
            }
        }
    }

    fn get_token(&self, token_id: &str) -> Result<Option<AccessToken>, Nlx402Error> {
        Ok(self.tokens.get(token_id).map(|t| t.clone()))
    }

    fn consume_token(&self, token_id: &str, units: u64) -> Result<ConsumeOutcome, Nlx402Error> {
        if units == 0 {
            return Err(Nlx402Error::InvalidRequest(
                "units must be at least 1".to_string(),
            ));
        }
        let mut token = self
            .tokens
            .get_mut(token_id)
            .ok_or(Nlx402Error::InvalidToken)?;
        if token.status_at(unix_now()) == TokenStatus::Expired {
            return Err(Nlx402Error::TokenExpired);
        }
        let used = token
            .queries_used
            .checked_add(units)
            .filter(|used| *used <= token.queries_allowed)
            .ok_or(Nlx402Error::QuotaExceeded)?;
        token.queries_used = used;
        Ok(ConsumeOutcome {
            wallet: token.wallet.clone(),
            queries_used: token.queries_used,
            queries_allowed: token.queries_allowed,
            rate_limit_per_sec: token.rate_limit_per_sec,
        })
    }

    fn purge_expired_tokens(&self, retention_secs: u64) -> usize {
        let cutoff = purge_cutoff(retention_secs);
        let before = self.tokens.len();
        self.tokens.retain(|_, t| t.expires_at >= cutoff);
        let purged = before - self.tokens.len();
        if purged > 0 {
            self.payments
                .retain(|_, record| self.tokens.contains_key(&record.token_id));
        }
        purged
    }
}

impl PaymentRecordStore for InMemoryStore {
    fn get_payment(&self, tx_signature: &str) -> Result<Option<PaymentRecord>, Nlx402Error> {
        Ok(self.payments.get(tx_signature).map(|r| r.clone()))
    }
}

impl IssuanceStore for InMemoryStore {
    fn commit_unlock(
        &self,
        record: &PaymentRecord,
        token: &AccessToken,
    ) -> Result<(), Nlx402Error> {
        // Hold the quote's shard lock until every write has landed.
        let mut quote = self
            .quotes
            .get_mut(&record.nonce)
            .ok_or(Nlx402Error::NonceExpired)?;
        check_consumable(&quote, unix_now())?;

        match self.payments.entry(record.tx_signature.clone()) {
            Entry::Occupied(_) => return Err(Nlx402Error::SignatureAlreadyUsed),
            Entry::Vacant(v) => {
                self.insert_token(token)?;
                v.insert(record.clone());
            }
        }
        quote.state = QuoteState::Consumed;
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats, Nlx402Error> {
        let now = unix_now();
        let mut stats = StoreStats::default();
        for quote in self.quotes.iter() {
            match quote.state_at(now) {
                QuoteState::Pending => stats.pending_quotes += 1,
                QuoteState::Consumed => stats.consumed_quotes += 1,
                QuoteState::Expired => {}
            }
        }
        for token in self.tokens.iter() {
            if token.status_at(now) == TokenStatus::Active {
                stats.active_tokens += 1;
            }
            stats.total_queries_used += token.queries_used;
        }
        stats.payments_recorded = self.payments.len() as u64;
        Ok(stats)
    }
}
