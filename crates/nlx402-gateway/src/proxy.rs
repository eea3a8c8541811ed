use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::HttpResponse;
use nlx402::Admission;

use crate::error::GatewayError;
use crate::metrics::UPSTREAM_LATENCY;
use crate::middleware::quota_headers;

/// Allowlist of response headers to forward from the upstream.
/// Prevents leaking internal upstream headers (e.g. Server, X-Powered-By).
const ALLOWED_RESPONSE_HEADERS: &[&str] = &["content-type", "cache-control", "date"];

/// Maximum upstream response body size (10 MB).
const MAX_RESPONSE_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Forward an admitted JSON-RPC body to the upstream RPC and relay its answer.
///
/// None of the caller's headers are forwarded, so the bearer token never
/// leaves the gateway.
pub async fn forward_rpc(
    client: &reqwest::Client,
    upstream_url: &str,
    body: Bytes,
    admission: &Admission,
) -> Result<HttpResponse, GatewayError> {
    let timer = UPSTREAM_LATENCY.start_timer();
    let mut response = client
        .post(upstream_url)
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| GatewayError::Upstream(format!("request failed: {e}")))?;

    let status = response.status();
    let headers = response.headers().clone();

    // Check Content-Length before reading (fast path)
    if let Some(cl) = response.content_length() {
        if cl > MAX_RESPONSE_BODY_SIZE as u64 {
            return Err(GatewayError::Upstream(format!(
                "response too large: {cl} bytes (max {MAX_RESPONSE_BODY_SIZE})"
            )));
        }
    }

    // Chunked responses are bounded as they stream in.
    let mut body_buf = Vec::with_capacity(
        response
            .content_length()
            .map(|cl| cl as usize)
            .unwrap_or(8192)
            .min(MAX_RESPONSE_BODY_SIZE),
    );
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| GatewayError::Upstream(format!("failed to read response: {e}")))?
    {
        if body_buf.len() + chunk.len() > MAX_RESPONSE_BODY_SIZE {
            return Err(GatewayError::Upstream(format!(
                "response too large (max {MAX_RESPONSE_BODY_SIZE} bytes)"
            )));
        }
        body_buf.extend_from_slice(&chunk);
    }
    timer.observe_duration();

    let mut builder = HttpResponse::build(
        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
    );
    for (name, value) in headers.iter() {
        if ALLOWED_RESPONSE_HEADERS.contains(&name.as_str()) {
            if let Ok(value_str) = value.to_str() {
                builder.insert_header((name.as_str(), value_str));
            }
        }
    }
    quota_headers(&mut builder, admission);

    Ok(builder.body(body_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_response_headers() {
        assert!(ALLOWED_RESPONSE_HEADERS.contains(&"content-type"));
        assert!(!ALLOWED_RESPONSE_HEADERS.contains(&"server"));
        assert!(!ALLOWED_RESPONSE_HEADERS.contains(&"set-cookie"));
    }
}
