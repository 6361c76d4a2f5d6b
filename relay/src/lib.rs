pub mod config;
mod errors;
mod forward;
pub mod metrics_defs;
mod service;

pub use errors::RelayError;
pub use service::RelayService;

use shared::http::run_http_service;

/// Run the relay listener until the process is torn down.
pub async fn run(config: config::Config) -> Result<(), RelayError> {
    let service = RelayService::new(config.forward_timeout());
    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        "relay listening"
    );
    run_http_service(&config.listener.host, config.listener.port, service).await
}
