use actix_web::{web, HttpResponse};
use nlx402::store::unix_now;
use nlx402::{LedgerClient, Nonce, Tier};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::metrics::QUOTES_ISSUED;
use crate::routes::json_config;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub wallet: String,
    pub query_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub nonce: Nonce,
    pub wallet: String,
}

/// POST /quote - Price a tier and mint a single-use nonce
pub async fn quote<L: LedgerClient + 'static>(
    body: web::Json<QuoteRequest>,
    state: web::Data<AppState<L>>,
) -> Result<HttpResponse, GatewayError> {
    let quote = state
        .quotes
        .generate_quote(body.wallet.trim(), body.query_count)?;
    QUOTES_ISSUED
        .with_label_values(&[&quote.query_count.to_string()])
        .inc();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "nonce": quote.nonce,
        "amountLamports": quote.price_lamports,
        "amountSol": quote.price_sol(),
        "recipient": quote.recipient,
        "memo": quote.nonce.payment_memo(),
        "queryCount": quote.query_count,
        "discountBps": quote.discount_bps,
        "expiresAt": quote.expires_at,
        "validFor": quote.valid_for(unix_now()),
    })))
}

/// POST /verify - Check that a quote is still payable, without consuming it
pub async fn verify<L: LedgerClient + 'static>(
    body: web::Json<VerifyRequest>,
    state: web::Data<AppState<L>>,
) -> Result<HttpResponse, GatewayError> {
    let quote = state.quotes.verify_quote(&body.nonce, body.wallet.trim())?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "nonce": quote.nonce,
        "queryCount": quote.query_count,
        "amountLamports": quote.price_lamports,
        "recipient": quote.recipient,
        "expiresAt": quote.expires_at,
    })))
}

/// GET /tiers - Published price table
pub async fn tiers<L: LedgerClient + 'static>(state: web::Data<AppState<L>>) -> HttpResponse {
    let tiers: Vec<_> = state
        .quotes
        .tiers()
        .iter()
        .map(|tier: &Tier| {
            let price = tier.price_lamports().ok();
            serde_json::json!({
                "queryCount": tier.query_count,
                "discountBps": tier.discount_bps,
                "amountLamports": price,
                "amountSol": price.map(nlx402::lamports_to_sol),
            })
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "recipient": state.quotes.recipient(),
        "pricePerQueryLamports": nlx402::PRICE_PER_QUERY_LAMPORTS,
        "tiers": tiers,
    }))
}

pub fn configure<L: LedgerClient + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/quote")
            .app_data(json_config())
            .route(web::post().to(quote::<L>)),
    )
    .service(
        web::resource("/verify")
            .app_data(json_config())
            .route(web::post().to(verify::<L>)),
    )
    .route("/tiers", web::get().to(tiers::<L>));
}
