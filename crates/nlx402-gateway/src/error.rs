use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use nlx402::Nlx402Error;
use std::fmt;

/// Seconds a client should wait before retrying a transient failure.
const RETRY_AFTER_SECS: &str = "5";

#[derive(Debug)]
pub enum GatewayError {
    /// Protocol error from quote, unlock or gate
    Protocol(Nlx402Error),
    /// Missing or malformed Authorization header
    MissingBearer,
    /// Malformed request body or parameters
    BadRequest(String),
    /// Upstream RPC unreachable or misbehaving
    Upstream(String),
    /// Internal error
    Internal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Protocol(e) => write!(f, "{}", e),
            GatewayError::MissingBearer => write!(f, "missing bearer token"),
            GatewayError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            GatewayError::Upstream(msg) => write!(f, "upstream error: {}", msg),
            GatewayError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<Nlx402Error> for GatewayError {
    fn from(e: Nlx402Error) -> Self {
        GatewayError::Protocol(e)
    }
}

fn protocol_status(e: &Nlx402Error) -> StatusCode {
    match e {
        Nlx402Error::InvalidTier(_)
        | Nlx402Error::InvalidRequest(_)
        | Nlx402Error::WalletMismatch => StatusCode::BAD_REQUEST,
        Nlx402Error::InvalidToken | Nlx402Error::TokenExpired => StatusCode::UNAUTHORIZED,
        Nlx402Error::InsufficientPayment { .. }
        | Nlx402Error::InvalidRecipient
        | Nlx402Error::SenderMismatch
        | Nlx402Error::PaymentNotBound
        | Nlx402Error::TransactionFailed(_)
        | Nlx402Error::TransactionNotFound(_)
        | Nlx402Error::PaymentPredatesQuote => StatusCode::PAYMENT_REQUIRED,
        Nlx402Error::NonceAlreadyConsumed | Nlx402Error::SignatureAlreadyUsed => {
            StatusCode::CONFLICT
        }
        Nlx402Error::NonceExpired => StatusCode::GONE,
        Nlx402Error::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        Nlx402Error::TransactionNotConfirmed(_) => StatusCode::GATEWAY_TIMEOUT,
        Nlx402Error::Ledger(_) => StatusCode::BAD_GATEWAY,
        Nlx402Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Protocol(e) => protocol_status(e),
            GatewayError::MissingBearer => StatusCode::UNAUTHORIZED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let GatewayError::Protocol(e) = self {
            if e.is_retryable() {
                builder.insert_header(("Retry-After", RETRY_AFTER_SECS));
            }
        }
        match self {
            GatewayError::Protocol(Nlx402Error::Storage(msg)) => {
                tracing::error!("Storage error: {}", msg);
                builder.json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
            GatewayError::Protocol(Nlx402Error::Ledger(msg)) => {
                tracing::error!("Ledger error: {}", msg);
                builder.json(serde_json::json!({
                    "error": "ledger_error",
                    "message": "Failed to reach the payment ledger"
                }))
            }
            GatewayError::Protocol(e) => builder.json(serde_json::json!({
                "error": e.kind(),
                "message": e.to_string()
            })),
            GatewayError::MissingBearer => builder
                .insert_header(("WWW-Authenticate", "Bearer"))
                .json(serde_json::json!({
                    "error": "invalid_token",
                    "message": "Authorization: Bearer <accessToken> header required"
                })),
            GatewayError::BadRequest(msg) => builder.json(serde_json::json!({
                "error": "invalid_request",
                "message": msg
            })),
            GatewayError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                builder.json(serde_json::json!({
                    "error": "upstream_error",
                    "message": "Failed to reach upstream RPC"
                }))
            }
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                builder.json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_status_mapping() {
        let cases = [
            (Nlx402Error::InvalidTier(7), 400),
            (Nlx402Error::TokenExpired, 401),
            (Nlx402Error::InvalidToken, 401),
            (
                Nlx402Error::InsufficientPayment {
                    paid: 1,
                    required: 2,
                },
                402,
            ),
            (Nlx402Error::PaymentNotBound, 402),
            (Nlx402Error::NonceAlreadyConsumed, 409),
            (Nlx402Error::NonceExpired, 410),
            (Nlx402Error::QuotaExceeded, 429),
            (Nlx402Error::TransactionNotConfirmed("s".into()), 504),
            (Nlx402Error::Storage("disk".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(GatewayError::from(err).status_code().as_u16(), status);
        }
    }

    #[test]
    fn test_storage_details_are_redacted() {
        let resp = GatewayError::from(Nlx402Error::Storage("/var/db locked".into())).error_response();
        assert_eq!(resp.status(), 500);
    }

    #[test]
    fn test_ledger_outage_asks_client_to_retry() {
        let resp = GatewayError::from(Nlx402Error::Ledger("connection reset".into())).error_response();
        assert_eq!(resp.status(), 502);
        assert_eq!(resp.headers().get("retry-after").unwrap(), RETRY_AFTER_SECS);

        let resp = GatewayError::from(Nlx402Error::SenderMismatch).error_response();
        assert!(resp.headers().get("retry-after").is_none());
    }
}
