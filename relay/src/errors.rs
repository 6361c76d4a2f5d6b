use thiserror::Error;

/// Errors that can occur while serving relay requests.
///
/// Most of these never reach the caller: the service converts them into the
/// generic failure envelope before responding.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to read upstream response body: {0}")]
    ResponseBodyError(String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Failed to parse upstream JSON body: {0}")]
    UpstreamBodyNotJson(String),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
