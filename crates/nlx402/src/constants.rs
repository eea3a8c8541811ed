/// Lamports in one SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Base price of a single metered query (0.0001 SOL).
pub const PRICE_PER_QUERY_LAMPORTS: u64 = 100_000;

/// Basis points denominator for tier discounts.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// How long a quote nonce stays payable.
pub const QUOTE_TTL_SECS: u64 = 300;

/// Lifetime of an access token once unlocked.
pub const TOKEN_TTL_SECS: u64 = 86_400;

/// Advisory per-second rate attached to every token.
pub const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 10;

/// How long consumed/expired rows are kept after expiry so duplicate
/// requests still observe a precise error instead of "unknown".
pub const RECORD_RETENTION_SECS: u64 = 3_600;

/// A payment may land at most this long before the quote it settles.
pub const MAX_PAYMENT_LEAD_SECS: i64 = 120;

/// WHISTLE X402 treasury that receives every quoted payment.
pub const DEFAULT_RECIPIENT: &str = "BMiSBoT5aPCrFcxaTrHuzXMkfrtzCLMcDYqrPTVymNbU";

/// Solana mainnet JSON-RPC endpoint used for payment verification.
pub const RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Metered RPC endpoint advertised to clients after unlock.
pub const PUBLIC_RPC_ENDPOINT: &str = "https://rpc.whistle.ninja";

/// Initial delay between signature status polls.
pub const POLL_INITIAL_BACKOFF_MS: u64 = 500;

/// Upper bound on the delay between polls.
pub const POLL_MAX_BACKOFF_MS: u64 = 5_000;

/// Overall bound on waiting for finality.
pub const FINALITY_TIMEOUT_SECS: u64 = 45;

/// Longest finality wait any configuration may ask for.
pub const MAX_FINALITY_TIMEOUT_SECS: u64 = 600;

/// Prefix of the memo that binds a payment to its quote: `nlx402:<nonce>[:<feature>]`.
pub const MEMO_PREFIX: &str = "nlx402";

/// Convert lamports to a display SOL amount.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}
