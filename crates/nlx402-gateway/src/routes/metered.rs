use actix_web::{web, HttpRequest, HttpResponse};
use nlx402::store::unix_now;
use nlx402::LedgerClient;

use crate::error::GatewayError;
use crate::middleware::{bearer_token, require_access};
use crate::proxy::forward_rpc;
use crate::routes::RPC_BODY_LIMIT;
use crate::state::AppState;

/// Quota units a JSON-RPC body costs: one per call, one per batch entry.
pub fn rpc_units(body: &[u8]) -> Result<u64, GatewayError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::BadRequest(format!("invalid JSON-RPC body: {e}")))?;
    match value {
        serde_json::Value::Object(_) => Ok(1),
        serde_json::Value::Array(batch) if batch.is_empty() => Err(GatewayError::BadRequest(
            "empty JSON-RPC batch".to_string(),
        )),
        serde_json::Value::Array(batch) => Ok(batch.len() as u64),
        _ => Err(GatewayError::BadRequest(
            "JSON-RPC body must be an object or a batch".to_string(),
        )),
    }
}

/// POST /rpc - Metered JSON-RPC passthrough
///
/// The gate runs before anything is sent upstream; a rejected call never
/// leaves the gateway.
pub async fn rpc<L: LedgerClient + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<L>>,
) -> Result<HttpResponse, GatewayError> {
    let units = rpc_units(&body)?;
    let admission = require_access(&state.gate, &req, units)?;

    tracing::debug!(
        wallet = %admission.wallet,
        units,
        remaining = admission.remaining,
        "forwarding metered call"
    );

    forward_rpc(
        &state.http_client,
        &state.config.upstream_rpc_url,
        body,
        &admission,
    )
    .await
}

/// GET /token - Status of the presented bearer token; consumes nothing
pub async fn token_status<L: LedgerClient + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<L>>,
) -> Result<HttpResponse, GatewayError> {
    let token = state.gate.status(bearer_token(&req)?)?;
    let now = unix_now();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "wallet": token.wallet,
        "status": token.status_at(now),
        "queriesAllowed": token.queries_allowed,
        "queriesUsed": token.queries_used,
        "remaining": token.remaining(),
        "issuedAt": token.issued_at,
        "expiresAt": token.expires_at,
        "expiresIn": token.expires_in(now),
        "rateLimitPerSec": token.rate_limit_per_sec,
    })))
}

pub fn configure<L: LedgerClient + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/rpc")
            .app_data(web::PayloadConfig::new(RPC_BODY_LIMIT))
            .route(web::post().to(rpc::<L>)),
    )
    .route("/token", web::get().to(token_status::<L>));
}
