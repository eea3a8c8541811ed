//! Nonce-locked pay-per-query access for metered Solana RPC.
//!
//! A client asks for a price quote, pays it on-chain in SOL, then trades
//! the transaction signature for a time-boxed, quota-limited bearer token.
//!
//! # Pipeline
//!
//! - **Quote** ([`QuoteService`]): prices a published tier and mints a single-use nonce
//! - **Verify** ([`PaymentVerifier`]): waits for finality and checks sender, recipient and amount
//! - **Unlock** ([`TokenIssuer`]): consumes the nonce, records the payment and issues a token atomically
//! - **Gate** ([`Gate`]): decrements the token's quota before every metered call
//!
//! # Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nlx402::{Gate, QuoteService, SolanaRpcClient, SqliteStore, TokenIssuer};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("./nlx402.db")?);
//! let quotes = QuoteService::new(store.clone());
//! let issuer = TokenIssuer::new(store.clone(), SolanaRpcClient::new(nlx402::RPC_URL)?);
//! let gate = Gate::new(store);
//!
//! let quote = quotes.generate_quote("BMiSBoT5aPCrFcxaTrHuzXMkfrtzCLMcDYqrPTVymNbU", 100)?;
//! // ... wallet pays quote.price_lamports to quote.recipient ...
//! # let signature = "";
//! let unlocked = issuer.unlock(&quote.nonce, &quote.wallet, signature).await?;
//! let admission = gate.admit(&unlocked.token.token_id, 1)?;
//! println!("{} queries left", admission.remaining);
//! # Ok(())
//! # }
//! ```

// Core types
pub mod config;
pub mod constants;
pub mod error;
pub mod payment;
pub mod quote;
pub mod security;
pub mod token;

// Storage
pub mod store;

// Ledger access and verification
pub mod ledger;
pub mod solana;
pub mod verifier;

// Issuance and metering
pub mod cleanup;
pub mod gate;
pub mod issuer;

// Re-exports
pub use config::ProtocolConfig;
pub use constants::*;
pub use error::Nlx402Error;
pub use gate::{parse_bearer, Admission, Gate};
pub use issuer::{TokenIssuer, Unlocked};
pub use ledger::{
    Commitment, LedgerClient, LedgerError, LedgerTransaction, PollPolicy, SignatureStatus,
    Transfer,
};
pub use payment::{PaymentRecord, PaymentVerification};
pub use quote::{Nonce, Quote, QuoteService, QuoteState, Tier, TIERS};
pub use solana::SolanaRpcClient;
pub use store::{
    InMemoryStore, IssuanceStore, NonceStore, PaymentRecordStore, SqliteStore, StoreStats,
    TokenStore,
};
pub use token::{AccessToken, ConsumeOutcome, TokenPolicy, TokenStatus};
pub use verifier::PaymentVerifier;
