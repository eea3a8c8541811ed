use std::sync::Arc;

use crate::error::Nlx402Error;
use crate::ledger::{LedgerClient, PollPolicy};
use crate::payment::PaymentRecord;
use crate::quote::{Nonce, QuoteState};
use crate::security::{redact, validate_pubkey, validate_signature};
use crate::store::{unix_now, IssuanceStore, PaymentRecordStore};
use crate::token::{AccessToken, TokenPolicy};
use crate::verifier::PaymentVerifier;

/// Result of a successful unlock.
#[derive(Debug, Clone)]
pub struct Unlocked {
    pub token: AccessToken,
    /// True when this call replayed an earlier unlock of the same payment.
    pub already_unlocked: bool,
}

/// Exchanges a verified payment for an access token.
///
/// Flow: prior-record lookup → quote checks → ledger verification (no lock
/// held) → one atomic commit of nonce consumption, payment record and token.
pub struct TokenIssuer<L> {
    store: Arc<dyn IssuanceStore>,
    verifier: PaymentVerifier<L>,
    policy: TokenPolicy,
}

impl<L: LedgerClient> TokenIssuer<L> {
    pub fn new<S: IssuanceStore + 'static>(store: Arc<S>, ledger: L) -> Self {
        let payments: Arc<dyn PaymentRecordStore> = store.clone();
        Self {
            store,
            verifier: PaymentVerifier::new(ledger, payments),
            policy: TokenPolicy::default(),
        }
    }

    pub fn with_token_policy(mut self, policy: TokenPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.verifier = self.verifier.with_poll_policy(policy);
        self
    }

    pub fn token_policy(&self) -> &TokenPolicy {
        &self.policy
    }

    pub fn verifier(&self) -> &PaymentVerifier<L> {
        &self.verifier
    }

    /// Unlock an access token for `nonce`, paid by `tx_signature` from `wallet`.
    ///
    /// Idempotent per `(nonce, tx_signature)`: a repeat call returns the same
    /// token with `already_unlocked = true`.
    pub async fn unlock(
        &self,
        nonce: &Nonce,
        wallet: &str,
        tx_signature: &str,
    ) -> Result<Unlocked, Nlx402Error> {
        validate_pubkey(wallet)?;
        validate_signature(tx_signature)?;

        if let Some(record) = self.store.get_payment(tx_signature)? {
            return self.replay(record, nonce, wallet);
        }

        let quote = self.store.get(nonce)?.ok_or(Nlx402Error::NonceExpired)?;
        match quote.state {
            QuoteState::Pending => {}
            QuoteState::Consumed => {
                // Committed between the record lookup above and this read.
                return match self.store.get_payment(tx_signature)? {
                    Some(record) => self.replay(record, nonce, wallet),
                    None => Err(Nlx402Error::NonceAlreadyConsumed),
                };
            }
            QuoteState::Expired => return Err(Nlx402Error::NonceExpired),
        }
        if quote.wallet != wallet {
            return Err(Nlx402Error::WalletMismatch);
        }

        let verification = self.verifier.verify(tx_signature, &quote).await?;
        if let Some(record) = verification.prior {
            // Another request committed this payment while we were verifying.
            return self.replay(record, nonce, wallet);
        }

        let token = AccessToken::issue(&quote.wallet, quote.query_count, &self.policy);
        let record = PaymentRecord {
            tx_signature: tx_signature.to_string(),
            nonce: quote.nonce,
            wallet: quote.wallet.clone(),
            amount_lamports: verification.amount_lamports,
            token_id: token.token_id.clone(),
            confirmed_at: unix_now(),
        };

        if let Err(e) = self.store.commit_unlock(&record, &token) {
            // A concurrent retry with this same signature may have committed first.
            if matches!(
                e,
                Nlx402Error::NonceAlreadyConsumed | Nlx402Error::SignatureAlreadyUsed
            ) {
                if let Some(prior) = self.store.get_payment(tx_signature)? {
                    return self.replay(prior, nonce, wallet);
                }
            }
            tracing::warn!(
                nonce = %nonce.short(),
                tx = %tx_signature,
                error = %e,
                "unlock commit rejected"
            );
            return Err(e);
        }

        tracing::info!(
            nonce = %nonce.short(),
            wallet = %wallet,
            token = %redact(&token.token_id),
            queries = token.queries_allowed,
            "access token unlocked"
        );
        Ok(Unlocked {
            token,
            already_unlocked: false,
        })
    }

    fn replay(
        &self,
        record: PaymentRecord,
        nonce: &Nonce,
        wallet: &str,
    ) -> Result<Unlocked, Nlx402Error> {
        if record.nonce != *nonce {
            return Err(Nlx402Error::SignatureAlreadyUsed);
        }
        if record.wallet != wallet {
            return Err(Nlx402Error::WalletMismatch);
        }
        let token = self
            .store
            .get_token(&record.token_id)?
            .ok_or(Nlx402Error::TokenExpired)?;
        tracing::debug!(nonce = %nonce.short(), "returning previously unlocked token");
        Ok(Unlocked {
            token,
            already_unlocked: true,
        })
    }
}
