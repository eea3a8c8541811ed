#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use nlx402::{
    Commitment, LedgerClient, LedgerError, LedgerTransaction, Nonce, PollPolicy, SignatureStatus,
    Transfer,
};

/// Deterministic base58 pubkey for test wallets.
pub fn pubkey(seed: u8) -> String {
    bs58::encode([seed; 32]).into_string()
}

/// Deterministic base58 transaction signature.
pub fn signature(seed: u8) -> String {
    bs58::encode([seed; 64]).into_string()
}

pub fn fast_poll() -> PollPolicy {
    PollPolicy {
        commitment: Commitment::Finalized,
        initial_backoff: Duration::from_millis(2),
        max_backoff: Duration::from_millis(10),
        timeout: Duration::from_millis(60),
    }
}

struct Scripted {
    status: Option<SignatureStatus>,
    tx: Option<LedgerTransaction>,
}

/// Ledger double answering from a per-signature script.
#[derive(Default)]
pub struct ScriptedLedger {
    entries: Mutex<HashMap<String, Scripted>>,
    status_calls: AtomicUsize,
}

impl ScriptedLedger {
    /// A finalized transfer of `lamports` from `from` to `to`, fee-paid by
    /// `from` and memo-bound to `nonce`.
    pub fn pay(&self, sig: &str, nonce: &Nonce, from: &str, to: &str, lamports: u64) {
        self.transfer(sig, Some(nonce.payment_memo()), from, to, lamports);
    }

    /// A finalized transfer carrying `memo`, if any.
    pub fn transfer(&self, sig: &str, memo: Option<String>, from: &str, to: &str, lamports: u64) {
        let tx = LedgerTransaction {
            signature: sig.to_string(),
            slot: 300_000_000,
            block_time: Some(chrono::Utc::now().timestamp()),
            fee_payer: from.to_string(),
            err: None,
            transfers: vec![Transfer {
                source: from.to_string(),
                destination: to.to_string(),
                lamports,
            }],
            memos: memo.into_iter().collect(),
        };
        self.script(sig, Some(finalized(None)), Some(tx));
    }

    pub fn fail(&self, sig: &str, err: &str) {
        self.script(sig, Some(finalized(Some(err.to_string()))), None);
    }

    /// Seen by the cluster but stuck below finality.
    pub fn stuck(&self, sig: &str) {
        let status = SignatureStatus {
            slot: 1,
            commitment: Some(Commitment::Confirmed),
            err: None,
        };
        self.script(sig, Some(status), None);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn script(&self, sig: &str, status: Option<SignatureStatus>, tx: Option<LedgerTransaction>) {
        self.entries
            .lock()
            .unwrap()
            .insert(sig.to_string(), Scripted { status, tx });
    }
}

fn finalized(err: Option<String>) -> SignatureStatus {
    SignatureStatus {
        slot: 300_000_000,
        commitment: Some(Commitment::Finalized),
        err,
    }
}

impl LedgerClient for ScriptedLedger {
    async fn signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(signature).and_then(|e| e.status.clone()))
    }

    async fn get_transaction(
        &self,
        signature: &str,
        _commitment: Commitment,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        tokio::task::yield_now().await;
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(signature).and_then(|e| e.tx.clone()))
    }
}
