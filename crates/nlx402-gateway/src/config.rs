use std::env;
use std::time::Duration;
use url::Url;

use nlx402::{Commitment, PollPolicy, ProtocolConfig, TokenPolicy};

const DEFAULT_PORT: u16 = 4402;
const DEFAULT_DB_PATH: &str = "./nlx402.db";
const DEFAULT_RATE_LIMIT_RPM: u32 = 120;

#[derive(Clone)]
pub struct GatewayConfig {
    /// Treasury that receives every quoted payment
    pub recipient: String,
    /// Solana JSON-RPC used to verify payments
    pub ledger_rpc_url: String,
    /// RPC that metered `/rpc` calls are forwarded to
    pub upstream_rpc_url: String,
    /// Endpoint advertised to clients after unlock (None = omit)
    pub public_rpc_endpoint: Option<String>,
    /// SQLite database path
    pub db_path: String,
    /// Server port
    pub port: u16,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Per-IP rate limit, requests per minute
    pub rate_limit_rpm: u32,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
    /// Commitment a payment must reach before unlock
    pub commitment: Commitment,
    /// Bound on waiting for that commitment
    pub finality_timeout: Duration,
    pub quote_ttl: Duration,
    pub token_ttl: Duration,
    pub token_rate_limit_per_sec: u32,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("recipient", &self.recipient)
            .field("ledger_rpc_url", &self.ledger_rpc_url)
            .field("upstream_rpc_url", &self.upstream_rpc_url)
            .field("public_rpc_endpoint", &self.public_rpc_endpoint)
            .field("db_path", &self.db_path)
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("commitment", &self.commitment)
            .field("finality_timeout", &self.finality_timeout)
            .field("quote_ttl", &self.quote_ttl)
            .field("token_ttl", &self.token_ttl)
            .field("token_rate_limit_per_sec", &self.token_rate_limit_per_sec)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let protocol = ProtocolConfig::default();
        Self {
            recipient: protocol.recipient,
            ledger_rpc_url: nlx402::RPC_URL.to_string(),
            upstream_rpc_url: nlx402::RPC_URL.to_string(),
            public_rpc_endpoint: Some(nlx402::PUBLIC_RPC_ENDPOINT.to_string()),
            db_path: DEFAULT_DB_PATH.to_string(),
            port: DEFAULT_PORT,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            rate_limit_rpm: DEFAULT_RATE_LIMIT_RPM,
            metrics_token: None,
            commitment: protocol.poll.commitment,
            finality_timeout: protocol.poll.timeout,
            quote_ttl: protocol.quote_ttl,
            token_ttl: protocol.token.ttl,
            token_rate_limit_per_sec: protocol.token.rate_limit_per_sec,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Optional: treasury address
        let recipient = env::var("RECIPIENT_ADDRESS")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.recipient);
        nlx402::security::validate_pubkey(&recipient)
            .map_err(|_| ConfigError::InvalidAddress(recipient.clone()))?;

        let ledger_rpc_url = url_var("LEDGER_RPC_URL", defaults.ledger_rpc_url)?;
        let upstream_rpc_url = url_var("UPSTREAM_RPC_URL", defaults.upstream_rpc_url)?;

        // Optional: advertised endpoint; empty string disables it
        let public_rpc_endpoint = match env::var("PUBLIC_RPC_ENDPOINT") {
            Ok(s) if s.is_empty() => None,
            Ok(s) => Some(s),
            Err(_) => defaults.public_rpc_endpoint,
        };

        let db_path = env::var("DB_PATH").unwrap_or(defaults.db_path);
        let port = parsed_var("PORT", defaults.port)?;

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|s| parse_origins(&s))
            .unwrap_or(defaults.allowed_origins);

        let rate_limit_rpm = parsed_var("RATE_LIMIT_RPM", defaults.rate_limit_rpm)?;
        let metrics_token = env::var("METRICS_TOKEN").ok().filter(|s| !s.is_empty());

        let commitment = match env::var("LEDGER_COMMITMENT") {
            Ok(s) => s
                .parse()
                .map_err(|_| ConfigError::InvalidValue("LEDGER_COMMITMENT", s))?,
            Err(_) => defaults.commitment,
        };

        let finality_timeout = bounded_finality_timeout(parsed_var(
            "FINALITY_TIMEOUT_SECS",
            defaults.finality_timeout.as_secs(),
        )?)?;
        let quote_ttl =
            Duration::from_secs(parsed_var("QUOTE_TTL_SECS", defaults.quote_ttl.as_secs())?);
        let token_ttl =
            Duration::from_secs(parsed_var("TOKEN_TTL_SECS", defaults.token_ttl.as_secs())?);
        let token_rate_limit_per_sec =
            parsed_var("TOKEN_RATE_LIMIT_PER_SEC", defaults.token_rate_limit_per_sec)?;

        if allowed_origins.iter().any(|o| o == "*") {
            tracing::warn!("ALLOWED_ORIGINS contains '*'; any site can call the payment endpoints");
        }
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set; /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            recipient,
            ledger_rpc_url,
            upstream_rpc_url,
            public_rpc_endpoint,
            db_path,
            port,
            allowed_origins,
            rate_limit_rpm,
            metrics_token,
            commitment,
            finality_timeout,
            quote_ttl,
            token_ttl,
            token_rate_limit_per_sec,
        })
    }

    /// Protocol parameters for the core services.
    pub fn protocol(&self) -> ProtocolConfig {
        let defaults = ProtocolConfig::default();
        ProtocolConfig {
            recipient: self.recipient.clone(),
            quote_ttl: self.quote_ttl,
            token: TokenPolicy {
                ttl: self.token_ttl,
                rate_limit_per_sec: self.token_rate_limit_per_sec,
            },
            poll: PollPolicy {
                commitment: self.commitment,
                timeout: self.finality_timeout,
                ..defaults.poll
            },
            retention: defaults.retention,
        }
    }
}

fn url_var(name: &'static str, default: String) -> Result<String, ConfigError> {
    let value = env::var(name).ok().filter(|s| !s.is_empty()).unwrap_or(default);
    Url::parse(&value).map_err(|_| ConfigError::InvalidUrl(value.clone()))?;
    Ok(value)
}

fn parsed_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(s) => s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, s)),
        Err(_) => Ok(default),
    }
}

fn bounded_finality_timeout(secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 || secs > nlx402::MAX_FINALITY_TIMEOUT_SECS {
        return Err(ConfigError::InvalidValue(
            "FINALITY_TIMEOUT_SECS",
            format!("{secs} (expected 1..={})", nlx402::MAX_FINALITY_TIMEOUT_SECS),
        ));
    }
    Ok(Duration::from_secs(secs))
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
