use actix_web::{web, HttpResponse};
use nlx402::LedgerClient;

use crate::error::GatewayError;
use crate::state::AppState;

/// GET /stats - Aggregate quote, token and payment counts
pub async fn stats<L: LedgerClient + 'static>(
    state: web::Data<AppState<L>>,
) -> Result<HttpResponse, GatewayError> {
    let stats = state.store.stats()?;
    Ok(HttpResponse::Ok().json(stats))
}

pub fn configure<L: LedgerClient + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.route("/stats", web::get().to(stats::<L>));
}
