use crate::config::Config;
use crate::errors::DispatchError;
use crate::record::{ProcessorReply, UploadType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::StatusCode;
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Everything the processor needs about one submission.
#[derive(Clone, Debug)]
pub struct TransferPayload {
    pub file_name: String,
    pub bytes: Bytes,
    pub content_type: String,
    pub extension: String,
    pub platform: String,
    pub upload_type: UploadType,
    pub uploaded_at: DateTime<Utc>,
    /// Present when the history record was created successfully
    pub record_id: Option<String>,
}

/// The processor's answer: transport status plus the structured body, when
/// the body was JSON.
#[derive(Debug)]
pub struct DispatchReply {
    pub status: StatusCode,
    pub body: Option<ProcessorReply>,
}

/// How a payload reaches its destination. The relay-vs-direct routing
/// decision is injected here rather than branched inline, so each path is
/// independently testable.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        destination: &Url,
        payload: &TransferPayload,
        bound: Duration,
    ) -> Result<DispatchReply, DispatchError>;
}

/// Pick the transport for the calling environment: secure-origin callers go
/// through the relay to avoid mixed-content blocks, insecure-origin callers
/// post straight to the destination.
///
/// Assumes `config.validate()` passed; without a relay URL the secure-origin
/// choice falls back to direct dispatch.
pub fn select_transport(config: &Config) -> Arc<dyn Transport> {
    match (config.secure_origin, &config.relay_url) {
        (true, Some(relay_url)) => Arc::new(RelayTransport::new(relay_url.clone())),
        _ => Arc::new(DirectTransport::new()),
    }
}

fn build_form(payload: &TransferPayload) -> Result<Form, DispatchError> {
    let file_part = Part::bytes(payload.bytes.to_vec())
        .file_name(payload.file_name.clone())
        .mime_str(&payload.content_type)
        .map_err(|e| DispatchError::Payload(e.to_string()))?;

    let mut form = Form::new()
        .part("file", file_part)
        .text("platform", payload.platform.clone())
        .text("fileType", payload.content_type.clone())
        .text("fileExtension", payload.extension.clone())
        .text("uploadType", payload.upload_type.as_str().to_string())
        .text("uploadedAt", payload.uploaded_at.to_rfc3339());
    if let Some(record_id) = &payload.record_id {
        form = form.text("recordId", record_id.clone());
    }
    Ok(form)
}

/// Post the form and collect the reply, all within the bounded wait.
async fn post_form(
    client: &reqwest::Client,
    endpoint: Url,
    form: Form,
    bound: Duration,
) -> Result<DispatchReply, DispatchError> {
    timeout(bound, async {
        let response = client.post(endpoint).multipart(form).send().await?;
        let status = response.status();

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        // A body the processor did not structure carries no verdict
        let body = if is_json {
            response.json::<ProcessorReply>().await.ok()
        } else {
            None
        };

        Ok(DispatchReply { status, body })
    })
    .await
    .map_err(|_| DispatchError::Timeout)?
}

/// Multipart POST straight to the destination.
pub struct DirectTransport {
    client: reqwest::Client,
}

impl DirectTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for DirectTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn send(
        &self,
        destination: &Url,
        payload: &TransferPayload,
        bound: Duration,
    ) -> Result<DispatchReply, DispatchError> {
        let form = build_form(payload)?;
        post_form(&self.client, destination.clone(), form, bound).await
    }
}

/// Multipart POST to the relay's webhook endpoint, with the destination
/// carried in the `target` query parameter.
pub struct RelayTransport {
    client: reqwest::Client,
    relay_url: Url,
}

impl RelayTransport {
    pub fn new(relay_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url,
        }
    }

    fn endpoint_for(&self, destination: &Url) -> Result<Url, DispatchError> {
        let mut endpoint = self
            .relay_url
            .join("api/webhook")
            .map_err(|e| DispatchError::Payload(e.to_string()))?;
        endpoint
            .query_pairs_mut()
            .append_pair("target", destination.as_str());
        Ok(endpoint)
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn send(
        &self,
        destination: &Url,
        payload: &TransferPayload,
        bound: Duration,
    ) -> Result<DispatchReply, DispatchError> {
        let endpoint = self.endpoint_for(destination)?;
        let form = build_form(payload)?;
        post_form(&self.client, endpoint, form, bound).await
    }
}
