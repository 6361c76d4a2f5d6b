use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Accept connections on `host:port` and serve them with `service`.
///
/// Connections are handed to hyper with h1/h2 auto-detection. The loop only
/// returns on a bind or accept error; per-connection failures are dropped.
pub async fn run_http_service<S, E>(host: &str, port: u16, service: S) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    let service_arc = Arc::new(service);

    loop {
        let (stream, _peer_addr) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        let io = TokioIo::new(stream);
        let svc = service_arc.clone();

        // Hand the connection to hyper; auto-detect h1/h2 on this socket
        tokio::spawn(async move {
            let _ = Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await;
        });
    }
}

/// Build a response carrying a serialized JSON body.
pub fn json_response<E>(
    status: StatusCode,
    value: &serde_json::Value,
) -> Result<Response<BoxBody<Bytes, E>>, http::Error> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(
            Full::new(Bytes::from(value.to_string()))
                .map_err(|e| match e {})
                .boxed(),
        )
}

/// Build an empty-bodied response with the given status.
pub fn empty_response<E>(status: StatusCode) -> Result<Response<BoxBody<Bytes, E>>, http::Error> {
    Response::builder().status(status).body(
        Full::new(Bytes::new())
            .map_err(|e| match e {})
            .boxed(),
    )
}
