use actix_web::{web, HttpResponse};
use nlx402::store::unix_now;
use nlx402::{LedgerClient, Nonce};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::metrics::{UNLOCKS_TOTAL, UNLOCK_LATENCY};
use crate::routes::json_config;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    pub nonce: Nonce,
    pub wallet: String,
    pub tx_signature: String,
}

/// POST /unlock - Trade a confirmed payment for an access token
///
/// Blocks while the payment reaches the configured commitment, bounded by
/// the finality timeout. A client that retries after 504 with the same
/// signature either completes the unlock or receives the token already issued.
pub async fn unlock<L: LedgerClient + 'static>(
    body: web::Json<UnlockRequest>,
    state: web::Data<AppState<L>>,
) -> Result<HttpResponse, GatewayError> {
    let timer = UNLOCK_LATENCY.start_timer();
    let result = state
        .issuer
        .unlock(&body.nonce, body.wallet.trim(), body.tx_signature.trim())
        .await;
    timer.observe_duration();

    let unlocked = match result {
        Ok(unlocked) => unlocked,
        Err(e) => {
            UNLOCKS_TOTAL.with_label_values(&[e.kind()]).inc();
            return Err(e.into());
        }
    };
    let label = if unlocked.already_unlocked {
        "replayed"
    } else {
        "issued"
    };
    UNLOCKS_TOTAL.with_label_values(&[label]).inc();

    let token = &unlocked.token;
    let mut response = serde_json::json!({
        "accessToken": token.token_id,
        "queriesAllowed": token.queries_allowed,
        "queriesUsed": token.queries_used,
        "expiresIn": token.expires_in(unix_now()),
        "expiresAt": token.expires_at,
        "rateLimitPerSec": token.rate_limit_per_sec,
        "alreadyUnlocked": unlocked.already_unlocked,
    });
    if let Some(ref endpoint) = state.config.public_rpc_endpoint {
        response["rpcEndpoint"] = serde_json::json!(endpoint);
    }

    Ok(HttpResponse::Ok().json(response))
}

pub fn configure<L: LedgerClient + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/unlock")
            .app_data(json_config())
            .route(web::post().to(unlock::<L>)),
    );
}
