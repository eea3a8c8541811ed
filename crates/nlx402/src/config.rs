use std::time::Duration;

use crate::constants::{DEFAULT_RECIPIENT, QUOTE_TTL_SECS, RECORD_RETENTION_SECS};
use crate::ledger::PollPolicy;
use crate::token::TokenPolicy;

/// Runtime protocol parameters. Decouples services from compile-time
/// constants so deployments can change the treasury, TTLs and finality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Address that receives every quoted payment.
    pub recipient: String,
    pub quote_ttl: Duration,
    pub token: TokenPolicy,
    pub poll: PollPolicy,
    /// Grace period before expired rows are purged.
    pub retention: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            recipient: DEFAULT_RECIPIENT.to_string(),
            quote_ttl: Duration::from_secs(QUOTE_TTL_SECS),
            token: TokenPolicy::default(),
            poll: PollPolicy::default(),
            retention: Duration::from_secs(RECORD_RETENTION_SECS),
        }
    }
}
