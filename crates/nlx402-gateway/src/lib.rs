pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use state::AppState;

use actix_web::web;
use nlx402::LedgerClient;

/// Mount every gateway route. Shared by the binary and the integration tests.
pub fn configure<L: LedgerClient + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.configure(routes::health::configure::<L>)
        .configure(routes::quote::configure::<L>)
        .configure(routes::unlock::configure::<L>)
        .configure(routes::metered::configure::<L>)
        .configure(routes::stats::configure::<L>);
}
