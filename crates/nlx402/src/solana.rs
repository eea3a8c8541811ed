use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::ledger::{
    Commitment, LedgerClient, LedgerError, LedgerTransaction, SignatureStatus, Transfer,
};

/// Per-request timeout for ledger RPC calls. Polling retries above this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SYSTEM_PROGRAM: &str = "system";
const MEMO_PROGRAM: &str = "spl-memo";

/// [`LedgerClient`] over Solana JSON-RPC (`getSignatureStatuses`, `getTransaction`).
#[derive(Clone)]
pub struct SolanaRpcClient {
    http: reqwest::Client,
    url: String,
}

impl SolanaRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, url))
    }

    pub fn with_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("{method} request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(LedgerError::Transport(format!("{method} returned HTTP {status}")));
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(format!("{method} response: {e}")))?;

        if let Some(error) = envelope.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        match envelope.result {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| LedgerError::Decode(format!("{method} result: {e}"))),
        }
    }
}

impl LedgerClient for SolanaRpcClient {
    async fn signature_status(
        &self,
        signature: &str,
    ) -> Result<Option<SignatureStatus>, LedgerError> {
        let result: Option<RpcStatuses> = self
            .call(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": true }]),
            )
            .await?;

        let status = result
            .and_then(|r| r.value.into_iter().next())
            .flatten()
            .map(|s| SignatureStatus {
                slot: s.slot,
                commitment: s.confirmation_status,
                err: s.err.filter(|e| !e.is_null()).map(|e| e.to_string()),
            });
        Ok(status)
    }

    async fn get_transaction(
        &self,
        signature: &str,
        commitment: Commitment,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        let result: Option<RpcTransaction> = self
            .call(
                "getTransaction",
                json!([
                    signature,
                    {
                        "encoding": "jsonParsed",
                        "commitment": commitment.as_str(),
                        "maxSupportedTransactionVersion": 0,
                    }
                ]),
            )
            .await?;

        result
            .map(|tx| tx.into_ledger_transaction(signature))
            .transpose()
    }
}

#[derive(Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcStatuses {
    value: Vec<Option<RpcSignatureStatus>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcSignatureStatus {
    slot: u64,
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    confirmation_status: Option<Commitment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    slot: u64,
    #[serde(default)]
    block_time: Option<i64>,
    #[serde(default)]
    meta: Option<RpcMeta>,
    transaction: RpcTransactionBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMeta {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    inner_instructions: Option<Vec<RpcInnerInstructions>>,
}

#[derive(Deserialize)]
struct RpcInnerInstructions {
    instructions: Vec<RpcInstruction>,
}

#[derive(Deserialize)]
struct RpcTransactionBody {
    message: RpcMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMessage {
    account_keys: Vec<RpcAccountKey>,
    instructions: Vec<RpcInstruction>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RpcAccountKey {
    Parsed { pubkey: String },
    Plain(String),
}

impl RpcAccountKey {
    fn pubkey(&self) -> &str {
        match self {
            RpcAccountKey::Parsed { pubkey } => pubkey,
            RpcAccountKey::Plain(pubkey) => pubkey,
        }
    }
}

#[derive(Deserialize)]
struct RpcInstruction {
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    parsed: Option<Value>,
}

impl RpcInstruction {
    /// Decode a system-program `transfer` / `transferWithSeed`, if this is one.
    fn as_transfer(&self) -> Option<Transfer> {
        if self.program.as_deref() != Some(SYSTEM_PROGRAM) {
            return None;
        }
        let parsed = self.parsed.as_ref()?;
        let kind = parsed.get("type")?.as_str()?;
        if kind != "transfer" && kind != "transferWithSeed" {
            return None;
        }
        let info = parsed.get("info")?;
        Some(Transfer {
            source: info.get("source")?.as_str()?.to_string(),
            destination: info.get("destination")?.as_str()?.to_string(),
            lamports: info.get("lamports")?.as_u64()?,
        })
    }

    /// Text of an SPL memo instruction, if this is one.
    fn as_memo(&self) -> Option<String> {
        if self.program.as_deref() != Some(MEMO_PROGRAM) {
            return None;
        }
        self.parsed.as_ref()?.as_str().map(str::to_string)
    }
}

impl RpcTransaction {
    fn into_ledger_transaction(self, signature: &str) -> Result<LedgerTransaction, LedgerError> {
        let fee_payer = self
            .transaction
            .message
            .account_keys
            .first()
            .map(|k| k.pubkey().to_string())
            .ok_or_else(|| LedgerError::Decode("transaction has no account keys".to_string()))?;

        let top_level = &self.transaction.message.instructions;
        let mut transfers: Vec<Transfer> =
            top_level.iter().filter_map(RpcInstruction::as_transfer).collect();
        let mut memos: Vec<String> = top_level.iter().filter_map(RpcInstruction::as_memo).collect();

        let (err, inner) = match self.meta {
            Some(meta) => (
                meta.err.filter(|e| !e.is_null()).map(|e| e.to_string()),
                meta.inner_instructions.unwrap_or_default(),
            ),
            None => (None, Vec::new()),
        };
        for instruction in inner.iter().flat_map(|group| group.instructions.iter()) {
            transfers.extend(instruction.as_transfer());
            memos.extend(instruction.as_memo());
        }

        Ok(LedgerTransaction {
            signature: signature.to_string(),
            slot: self.slot,
            block_time: self.block_time,
            fee_payer,
            err,
            transfers,
            memos,
        })
    }
}
