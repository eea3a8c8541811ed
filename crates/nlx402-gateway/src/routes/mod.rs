pub mod health;
pub mod metered;
pub mod quote;
pub mod stats;
pub mod unlock;

use actix_web::web;

use crate::error::GatewayError;

/// JSON body limit for the payment endpoints.
pub const JSON_BODY_LIMIT: usize = 64 * 1024;

/// Body limit for metered RPC calls.
pub const RPC_BODY_LIMIT: usize = 1024 * 1024;

/// JSON extractor config that reports malformed bodies in the gateway's error shape.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_BODY_LIMIT)
        .error_handler(|err, _req| GatewayError::BadRequest(err.to_string()).into())
}
