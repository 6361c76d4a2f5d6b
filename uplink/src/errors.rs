use thiserror::Error;

pub use crate::validate::ValidateError;

/// Errors from the history store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("History store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("History store returned status {0}")]
    Status(http::StatusCode),

    #[error("History store returned no row")]
    EmptyReply,

    #[error("History store API key is not configured")]
    MissingApiKey,

    #[error("Invalid history store URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors from dispatching a payload to the external processor.
///
/// `Timeout` is deliberately distinct from other failures so callers can word
/// the outcome differently.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Timed out waiting for the processor")]
    Timeout,

    #[error("Failed to build dispatch payload: {0}")]
    Payload(String),

    #[error("Dispatch request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Pre-flight submission failures. None of these leave a record behind.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("A submission is already in flight")]
    Busy,

    #[error("No file selected")]
    MissingFile,

    #[error("No platform selected")]
    MissingPlatform,

    #[error(transparent)]
    Validation(#[from] ValidateError),
}
