use actix_web::{web, HttpRequest, HttpResponse};
use nlx402::security::constant_time_eq;
use nlx402::{parse_bearer, LedgerClient};

use crate::metrics::REGISTRY;
use crate::state::AppState;

/// GET /health - Health check endpoint
pub async fn health<L: LedgerClient + 'static>(state: web::Data<AppState<L>>) -> HttpResponse {
    let mut response = serde_json::json!({
        "status": "ok",
        "service": "nlx402-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    });

    if let Err(e) = state.store.stats() {
        tracing::error!("Store unavailable: {}", e);
        response["status"] = serde_json::json!("degraded");
        response["store_status"] = serde_json::json!("degraded");
    }

    if response["status"] == "degraded" {
        HttpResponse::ServiceUnavailable().json(response)
    } else {
        HttpResponse::Ok().json(response)
    }
}

/// GET /metrics - Prometheus metrics endpoint (optionally auth-gated)
pub async fn metrics<L: LedgerClient + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<L>>,
) -> HttpResponse {
    if let Some(ref expected_token) = state.config.metrics_token {
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer)
            .map(|token| constant_time_eq(token.as_bytes(), expected_token.as_bytes()))
            .unwrap_or(false);

        if !authorized {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Valid Bearer token required for /metrics"
            }));
        }
    }

    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().body("Failed to encode metrics");
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

pub fn configure<L: LedgerClient + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::<L>))
        .route("/metrics", web::get().to(metrics::<L>));
}
