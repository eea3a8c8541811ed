use std::sync::Arc;

use nlx402::{Gate, IssuanceStore, LedgerClient, QuoteService, SolanaRpcClient, TokenIssuer};

use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Shared application state
pub struct AppState<L = SolanaRpcClient> {
    pub config: Arc<GatewayConfig>,
    pub store: Arc<dyn IssuanceStore>,
    pub quotes: QuoteService,
    pub issuer: TokenIssuer<L>,
    pub gate: Gate,
    /// Client for forwarding metered calls upstream
    pub http_client: reqwest::Client,
}

impl<L: LedgerClient> AppState<L> {
    pub fn new<S: IssuanceStore + 'static>(
        config: GatewayConfig,
        store: Arc<S>,
        ledger: L,
    ) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {e}")))?;

        let protocol = config.protocol();
        let quotes = QuoteService::new(store.clone())
            .with_recipient(protocol.recipient.clone())
            .with_ttl(protocol.quote_ttl);
        let issuer = TokenIssuer::new(store.clone(), ledger)
            .with_token_policy(protocol.token)
            .with_poll_policy(protocol.poll);
        let gate = Gate::new(store.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            quotes,
            issuer,
            gate,
            http_client,
        })
    }
}
