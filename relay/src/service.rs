use crate::errors::RelayError;
use crate::forward::send_to_target;
use crate::metrics_defs::RELAY_REQUESTS;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service as HyperService;
use hyper::{Method, Request, Response, StatusCode, Uri};
use serde_json::json;
use shared::counter;
use shared::http::{empty_response, json_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const WEBHOOK_PATH: &str = "/api/webhook";
const HEALTH_PATH: &str = "/health";

/// Stateless relay endpoint: accepts `POST /api/webhook?target=<url>`,
/// forwards the raw body to the target, and relays the answer. Each call is
/// one request/response cycle with no shared mutable state, so any number of
/// relays may run concurrently.
pub struct RelayService {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    forward_timeout: Duration,
}

#[derive(Debug, PartialEq)]
enum Route {
    Preflight,
    Forward(Url),
    MissingTarget,
    InvalidTarget,
    MethodNotAllowed,
    Health,
    NotFound,
}

impl RelayService {
    pub fn new(forward_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                forward_timeout,
            }),
        }
    }
}

impl Inner {
    fn route(method: &Method, uri: &Uri) -> Route {
        if method == Method::GET && uri.path() == HEALTH_PATH {
            return Route::Health;
        }
        if uri.path() != WEBHOOK_PATH {
            return Route::NotFound;
        }
        match *method {
            Method::OPTIONS => Route::Preflight,
            Method::POST => match target_from_query(uri.query()) {
                None => Route::MissingTarget,
                Some(Err(_)) => Route::InvalidTarget,
                Some(Ok(url)) => Route::Forward(url),
            },
            _ => Route::MethodNotAllowed,
        }
    }

    async fn respond(
        &self,
        route: Route,
        content_type: &str,
        body: Bytes,
    ) -> Result<Response<BoxBody<Bytes, RelayError>>, RelayError> {
        let mut response = match route {
            Route::Preflight => empty_response(StatusCode::OK)?,
            Route::Health => json_response(StatusCode::OK, &json!({ "status": "ok" }))?,
            Route::NotFound => json_response(StatusCode::NOT_FOUND, &json!({ "error": "Not found" }))?,
            Route::MethodNotAllowed => {
                counter!(RELAY_REQUESTS, "outcome" => "method_not_allowed").increment(1);
                json_response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &json!({ "error": "Method not allowed" }),
                )?
            }
            Route::MissingTarget => {
                counter!(RELAY_REQUESTS, "outcome" => "missing_target").increment(1);
                json_response(
                    StatusCode::BAD_REQUEST,
                    &json!({ "error": "Missing target URL" }),
                )?
            }
            Route::InvalidTarget => {
                counter!(RELAY_REQUESTS, "outcome" => "invalid_target").increment(1);
                json_response(
                    StatusCode::BAD_REQUEST,
                    &json!({ "error": "Invalid target URL" }),
                )?
            }
            Route::Forward(target) => {
                match send_to_target(
                    &self.client,
                    &target,
                    content_type,
                    body,
                    self.forward_timeout,
                )
                .await
                {
                    Ok(relayed) => {
                        counter!(RELAY_REQUESTS, "outcome" => "forwarded").increment(1);
                        json_response(relayed.status, &relayed.body)?
                    }
                    Err(e) => {
                        // Never leak upstream failure detail to the caller
                        tracing::error!(target = %target, error = %e, "relay upstream failed");
                        counter!(RELAY_REQUESTS, "outcome" => "upstream_failed").increment(1);
                        json_response(StatusCode::INTERNAL_SERVER_ERROR, &failure_envelope())?
                    }
                }
            }
        };

        apply_cors(&mut response);
        Ok(response)
    }
}

fn failure_envelope() -> serde_json::Value {
    json!({ "success": false, "error": true, "message": "Proxy request failed" })
}

fn apply_cors<B>(response: &mut Response<B>) {
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-origin",
        hyper::header::HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-methods",
        hyper::header::HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        hyper::header::HeaderValue::from_static("Content-Type"),
    );
}

fn target_from_query(query: Option<&str>) -> Option<Result<Url, url::ParseError>> {
    let raw = url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "target")
        .map(|(_, value)| value.into_owned())?;
    Some(Url::parse(&raw))
}

impl HyperService<Request<Incoming>> for RelayService {
    type Response = Response<BoxBody<Bytes, RelayError>>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let route = Inner::route(&parts.method, &parts.uri);

            let content_type = parts
                .headers
                .get(hyper::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();

            // The inbound body is opaque bytes; it is never parsed or altered
            let body_bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::error!(error = %e, "failed to read relay request body");
                    let mut response = json_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &failure_envelope(),
                    )?;
                    apply_cors(&mut response);
                    return Ok(response);
                }
            };

            inner.respond(route, &content_type, body_bytes).await
        })
    }
}
