use actix_web::{HttpRequest, HttpResponseBuilder};
use nlx402::{parse_bearer, Admission, Gate};

use crate::error::GatewayError;
use crate::metrics::GATE_DECISIONS;

/// Extract the access token from `Authorization: Bearer …`.
pub fn bearer_token(req: &HttpRequest) -> Result<&str, GatewayError> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer)
        .ok_or(GatewayError::MissingBearer)
}

/// Run the gate for a metered request. On `Err` the caller must not do any
/// downstream work.
pub fn require_access(
    gate: &Gate,
    req: &HttpRequest,
    units: u64,
) -> Result<Admission, GatewayError> {
    let token = match bearer_token(req) {
        Ok(token) => token,
        Err(e) => {
            GATE_DECISIONS.with_label_values(&["missing_token"]).inc();
            return Err(e);
        }
    };
    match gate.admit(token, units) {
        Ok(admission) => {
            GATE_DECISIONS.with_label_values(&["admitted"]).inc();
            Ok(admission)
        }
        Err(e) => {
            GATE_DECISIONS.with_label_values(&[e.kind()]).inc();
            Err(e.into())
        }
    }
}

/// Attach quota headers to a metered response.
pub fn quota_headers(builder: &mut HttpResponseBuilder, admission: &Admission) {
    builder.insert_header(("X-Quota-Remaining", admission.remaining.to_string()));
    builder.insert_header(("X-RateLimit-Limit", admission.rate_limit_per_sec.to_string()));
}
