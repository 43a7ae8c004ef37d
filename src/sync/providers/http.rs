//! Shared HTTP plumbing for live providers

use reqwest::{RequestBuilder, Response, StatusCode, header};
use serde_json::Value;

use super::ProviderError;
use crate::sync::USER_AGENT;

/// Send a request and decode a JSON body
///
/// Timeouts map to 504, other transport failures to 502, and non-success
/// statuses keep their code plus any `Retry-After` seconds.
pub(crate) async fn send_json(request: RequestBuilder) -> Result<Value, ProviderError> {
    let response = request
        .header(header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(status_error(response).await);
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::api(StatusCode::BAD_GATEWAY.as_u16(), e.to_string()))
}

fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::api(StatusCode::GATEWAY_TIMEOUT.as_u16(), "request timed out")
    } else {
        ProviderError::api(StatusCode::BAD_GATEWAY.as_u16(), error.to_string())
    }
}

async fn status_error(response: Response) -> ProviderError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();

    ProviderError::ApiError {
        status: status.as_u16(),
        message: truncate(&body, 200),
        retry_after,
    }
}

/// Retry-After in delta-seconds form; HTTP dates are ignored
pub(crate) fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn truncate(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    body.chars().take(max_chars).collect::<String>() + "..."
}

/// Array at `key`, or an empty slice
pub(crate) fn array_at<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
