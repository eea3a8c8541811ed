//! Shared security helpers: constant-time comparison, bearer token minting,
//! and base58 validation of Solana identifiers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::Nlx402Error;

/// Bytes of entropy in an access token id.
pub const TOKEN_ID_BYTES: usize = 32;

/// Constant-time byte comparison that does not leak input lengths or content.
///
/// Both inputs are hashed to fixed-length SHA-256 digests before comparison,
/// so timing reveals neither the content nor the length of either input.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

/// Mint a fresh bearer token id from the OS CSPRNG.
pub fn generate_token_id() -> String {
    let bytes: [u8; TOKEN_ID_BYTES] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Shorten a secret or identifier for log output.
pub fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(8).collect();
    format!("{prefix}…")
}

/// Validate a base58 Solana public key (32 bytes).
pub fn validate_pubkey(value: &str) -> Result<(), Nlx402Error> {
    decode_exact(value, 32, "wallet address")
}

/// Validate a base58 Solana transaction signature (64 bytes).
pub fn validate_signature(value: &str) -> Result<(), Nlx402Error> {
    decode_exact(value, 64, "transaction signature")
}

fn decode_exact(value: &str, len: usize, what: &str) -> Result<(), Nlx402Error> {
    let bytes = bs58::decode(value)
        .into_vec()
        .map_err(|_| Nlx402Error::InvalidRequest(format!("{what} is not valid base58")))?;
    if bytes.len() != len {
        return Err(Nlx402Error::InvalidRequest(format!(
            "{what} must decode to {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}
