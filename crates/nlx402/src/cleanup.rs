use std::sync::Arc;
use std::time::Duration;

use crate::store::IssuanceStore;

/// Interval between purges of expired quotes and tokens.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn a background task that periodically purges rows past retention.
pub fn start_cleanup(
    store: Arc<dyn IssuanceStore>,
    every: Duration,
    retention_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let quotes = store.purge_expired(retention_secs);
            let tokens = store.purge_expired_tokens(retention_secs);
            if quotes > 0 || tokens > 0 {
                tracing::info!(quotes, tokens, "purged expired quotes and tokens");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::{Nonce, Quote, QuoteState};
    use crate::store::{unix_now, InMemoryStore, NonceStore};

    #[tokio::test]
    async fn cleanup_task_purges_lapsed_quotes() {
        let store = Arc::new(InMemoryStore::new());
        let now = unix_now();
        let lapsed = Quote {
            nonce: Nonce::random(),
            wallet: "wallet".into(),
            query_count: 100,
            price_lamports: 10_000_000,
            discount_bps: 0,
            recipient: "recipient".into(),
            created_at: now - 400,
            expires_at: now - 100,
            state: QuoteState::Pending,
        };
        store.put(&lapsed).unwrap();

        let handle = start_cleanup(store.clone(), Duration::from_millis(10), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(store.get(&lapsed.nonce).unwrap().is_none());
    }
}
