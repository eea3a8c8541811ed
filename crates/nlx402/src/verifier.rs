use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::constants::{MAX_FINALITY_TIMEOUT_SECS, MAX_PAYMENT_LEAD_SECS};
use crate::error::Nlx402Error;
use crate::ledger::{LedgerClient, LedgerTransaction, PollPolicy};
use crate::payment::PaymentVerification;
use crate::quote::Quote;
use crate::security::validate_signature;
use crate::store::PaymentRecordStore;

/// Confirms that a submitted transaction settles a quote.
///
/// Holds no lock while waiting on the ledger: concurrent unlocks of the same
/// nonce all verify, then race to the atomic commit.
pub struct PaymentVerifier<L> {
    ledger: L,
    payments: Arc<dyn PaymentRecordStore>,
    policy: PollPolicy,
}

impl<L: LedgerClient> PaymentVerifier<L> {
    pub fn new(ledger: L, payments: Arc<dyn PaymentRecordStore>) -> Self {
        Self {
            ledger,
            payments,
            policy: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn poll_policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Verify that `tx_signature` pays `quote` in full from `quote.wallet` and
    /// carries the quote's `nlx402:<nonce>` memo.
    ///
    /// A signature already recorded for this quote's nonce is answered from
    /// the record without touching the ledger.
    pub async fn verify(
        &self,
        tx_signature: &str,
        quote: &Quote,
    ) -> Result<PaymentVerification, Nlx402Error> {
        validate_signature(tx_signature)?;

        if let Some(record) = self.payments.get_payment(tx_signature)? {
            if record.nonce != quote.nonce {
                tracing::warn!(
                    tx = %tx_signature,
                    nonce = %quote.nonce.short(),
                    recorded_nonce = %record.nonce.short(),
                    "signature replay across nonces rejected"
                );
                return Err(Nlx402Error::SignatureAlreadyUsed);
            }
            return Ok(PaymentVerification {
                amount_lamports: record.amount_lamports,
                sender: record.wallet.clone(),
                finalized: true,
                slot: None,
                prior: Some(record),
            });
        }

        let tx = self.await_transaction(tx_signature).await?;
        let amount = check_transaction(&tx, quote)?;

        tracing::info!(
            tx = %tx_signature,
            nonce = %quote.nonce.short(),
            slot = tx.slot,
            amount_lamports = amount,
            "payment verified"
        );

        Ok(PaymentVerification {
            amount_lamports: amount,
            sender: tx.fee_payer,
            finalized: true,
            slot: Some(tx.slot),
            prior: None,
        })
    }

    /// Poll until the signature reaches the target commitment, then fetch it.
    async fn await_transaction(&self, signature: &str) -> Result<LedgerTransaction, Nlx402Error> {
        let timeout = self
            .policy
            .timeout
            .min(Duration::from_secs(MAX_FINALITY_TIMEOUT_SECS));
        let deadline = Instant::now() + timeout;
        let mut backoff = self.policy.initial_backoff;
        let mut final_without_body = false;

        loop {
            match self.ledger.signature_status(signature).await {
                Ok(Some(status)) => {
                    if let Some(err) = status.err {
                        tracing::warn!(tx = %signature, error = %err, "payment transaction failed on-chain");
                        return Err(Nlx402Error::TransactionFailed(err));
                    }
                    if status.reaches(self.policy.commitment) {
                        match self
                            .ledger
                            .get_transaction(signature, self.policy.commitment)
                            .await
                        {
                            Ok(Some(tx)) => return Ok(tx),
                            Ok(None) => final_without_body = true,
                            Err(e) if e.is_transient() => {
                                tracing::debug!(tx = %signature, error = %e, "transaction fetch failed, retrying");
                            }
                            Err(e) => return Err(e.into()),
                        }
                    } else {
                        tracing::debug!(
                            tx = %signature,
                            commitment = ?status.commitment,
                            "waiting for {}",
                            self.policy.commitment
                        );
                    }
                }
                Ok(None) => {
                    tracing::debug!(tx = %signature, "signature not yet visible");
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(tx = %signature, error = %e, "status poll failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(if final_without_body {
                    Nlx402Error::TransactionNotFound(signature.to_string())
                } else {
                    Nlx402Error::TransactionNotConfirmed(signature.to_string())
                });
            }
            sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(self.policy.max_backoff);
        }
    }
}

/// Check a final transaction against the quote. Returns the lamports paid.
fn check_transaction(tx: &LedgerTransaction, quote: &Quote) -> Result<u64, Nlx402Error> {
    if let Some(err) = &tx.err {
        return Err(Nlx402Error::TransactionFailed(err.clone()));
    }
    if tx.fee_payer != quote.wallet {
        return Err(Nlx402Error::SenderMismatch);
    }
    // Signatures are public; without the memo anyone could quote the payer's
    // wallet and redeem the payer's transfer.
    if !tx.has_memo(&quote.nonce.payment_memo()) {
        return Err(Nlx402Error::PaymentNotBound);
    }

    let paid = tx.lamports_between(&quote.wallet, &quote.recipient);
    if paid == 0 {
        return Err(Nlx402Error::InvalidRecipient);
    }
    if paid < quote.price_lamports {
        return Err(Nlx402Error::InsufficientPayment {
            paid,
            required: quote.price_lamports,
        });
    }

    if let Some(block_time) = tx.block_time {
        if block_time < quote.created_at - MAX_PAYMENT_LEAD_SECS {
            return Err(Nlx402Error::PaymentPredatesQuote);
        }
    }
    Ok(paid)
}
