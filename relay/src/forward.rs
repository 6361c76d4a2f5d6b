use crate::errors::RelayError;
use http::StatusCode;
use hyper::body::Bytes;
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// The upstream's answer, reduced to what the relay sends back: the upstream
/// status code and a JSON body.
#[derive(Debug)]
pub struct Relayed {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

/// Send the collected inbound body to `target` and interpret the answer.
///
/// The body is forwarded as-is with the caller's `Content-Type`. A JSON
/// upstream body is relayed verbatim; anything else is wrapped in a
/// `{success, message}` envelope. The timeout covers the entire cycle,
/// including collecting the upstream body.
pub async fn send_to_target(
    client: &reqwest::Client,
    target: &Url,
    content_type: &str,
    body: Bytes,
    forward_timeout: Duration,
) -> Result<Relayed, RelayError> {
    // Use host as identifier for error messages
    let target_identifier = target
        .host_str()
        .map(str::to_string)
        .unwrap_or_else(|| target.to_string());

    let (status, is_json, text) = timeout(forward_timeout, async {
        let response = client
            .post(target.clone())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                RelayError::UpstreamRequestFailed(target_identifier.clone(), e.to_string())
            })?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        let text = response
            .text()
            .await
            .map_err(|e| RelayError::ResponseBodyError(e.to_string()))?;

        Ok::<_, RelayError>((status, is_json, text))
    })
    .await
    .map_err(|_| RelayError::UpstreamTimeout(target_identifier.clone()))??;

    let body = if is_json {
        serde_json::from_str(&text).map_err(|e| RelayError::UpstreamBodyNotJson(e.to_string()))?
    } else {
        json!({ "success": true, "message": text })
    };

    Ok(Relayed { status, body })
}
