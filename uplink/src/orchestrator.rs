use crate::config::{Config, Destinations};
use crate::dispatch::{DispatchReply, TransferPayload, Transport};
use crate::errors::{DispatchError, SubmitError};
use crate::history::HistoryCache;
use crate::metrics_defs::SUBMISSIONS;
use crate::record::{NewUpload, UploadStatus, UploadType};
use crate::store::HistoryStore;
use crate::validate::{extension_of, mime_for, validate_file};
use bytes::Bytes;
use chrono::Utc;
use shared::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

/// A candidate file, as picked by the caller.
#[derive(Clone, Debug)]
pub struct FileSelection {
    pub name: String,
    pub bytes: Bytes,
    /// MIME type when the caller knows it; guessed from the extension
    /// otherwise
    pub content_type: Option<String>,
}

#[derive(Debug)]
struct SelectionState {
    file: Option<FileSelection>,
    platform: Option<String>,
    upload_type: UploadType,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            file: None,
            platform: None,
            upload_type: UploadType::Po,
        }
    }
}

/// The one terminal answer each submission produces. Timeout is kept apart
/// from other failures so the caller can word it differently.
#[derive(Debug, PartialEq)]
pub enum SubmitOutcome {
    Success { row_count: Option<u32> },
    Failed { message: String },
    TimedOut,
}

impl SubmitOutcome {
    fn as_tag(&self) -> &'static str {
        match self {
            SubmitOutcome::Success { .. } => "success",
            SubmitOutcome::Failed { .. } => "failed",
            SubmitOutcome::TimedOut => "timeout",
        }
    }
}

/// Drives one submission through
/// `validating -> recording -> dispatching -> reconciling` and back to idle.
///
/// Holds the session's selection state and enforces single-flight: a second
/// submission while one is running answers `Busy` without side effects.
pub struct Submitter {
    accepted_extensions: Vec<String>,
    max_file_size_mb: u32,
    destinations: Destinations,
    dispatch_timeout: Duration,
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn HistoryStore>>,
    cache: Option<Arc<HistoryCache>>,
    selection: Mutex<SelectionState>,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Submitter {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn HistoryStore>>,
        cache: Option<Arc<HistoryCache>>,
    ) -> Self {
        Self {
            accepted_extensions: config.accepted_extensions.clone(),
            max_file_size_mb: config.max_file_size_mb,
            destinations: config.destinations.clone(),
            dispatch_timeout: config.dispatch_timeout(),
            transport,
            store,
            cache,
            selection: Mutex::new(SelectionState::default()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_dispatch_timeout(mut self, bound: Duration) -> Self {
        self.dispatch_timeout = bound;
        self
    }

    /// Validate and take a file. A rejected file leaves the selection as it
    /// was.
    pub async fn choose_file(&self, file: FileSelection) -> Result<(), SubmitError> {
        validate_file(
            &file.name,
            file.bytes.len() as u64,
            &self.accepted_extensions,
            self.max_file_size_mb,
        )?;
        self.selection.lock().await.file = Some(file);
        Ok(())
    }

    pub async fn choose_platform(&self, platform: impl Into<String>) {
        self.selection.lock().await.platform = Some(platform.into());
    }

    pub async fn choose_upload_type(&self, upload_type: UploadType) {
        self.selection.lock().await.upload_type = upload_type;
    }

    pub async fn can_submit(&self) -> bool {
        let selection = self.selection.lock().await;
        selection.file.is_some()
            && selection.platform.is_some()
            && !self.in_flight.load(Ordering::Acquire)
    }

    /// What is still missing before submission, for prompting the user.
    pub async fn selection_hint(&self) -> Option<&'static str> {
        let selection = self.selection.lock().await;
        match (&selection.file, &selection.platform) {
            (None, None) => Some("Please upload a file and select a platform"),
            (Some(_), None) => Some("Please select a platform to continue"),
            (None, Some(_)) => Some("Please upload a file to continue"),
            (Some(_), Some(_)) => None,
        }
    }

    /// Run one submission end to end. Exactly one `SubmitOutcome` is
    /// produced; the in-flight guard is released on every path.
    pub async fn submit(&self) -> Result<SubmitOutcome, SubmitError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SubmitError::Busy);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let outcome = self.submit_inner().await?;
        counter!(SUBMISSIONS, "outcome" => outcome.as_tag()).increment(1);
        Ok(outcome)
    }

    async fn submit_inner(&self) -> Result<SubmitOutcome, SubmitError> {
        // validating
        let (file, platform, upload_type) = {
            let selection = self.selection.lock().await;
            let file = selection.file.clone().ok_or(SubmitError::MissingFile)?;
            let platform = selection
                .platform
                .clone()
                .ok_or(SubmitError::MissingPlatform)?;
            (file, platform, selection.upload_type)
        };
        validate_file(
            &file.name,
            file.bytes.len() as u64,
            &self.accepted_extensions,
            self.max_file_size_mb,
        )?;

        let uploaded_at = Utc::now();

        // recording: failure degrades history visibility, never blocks the
        // submission
        let record_id = match &self.store {
            Some(store) => {
                let upload = NewUpload::new(
                    file.name.clone(),
                    platform.clone(),
                    upload_type,
                    uploaded_at,
                );
                match store.insert(upload).await {
                    Ok(record) => {
                        let id = record.id.clone();
                        if let Some(cache) = &self.cache {
                            cache.push_front(record).await;
                        }
                        Some(id)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "upload record creation failed; continuing without history");
                        None
                    }
                }
            }
            None => None,
        };

        // dispatching
        let extension = extension_of(&file.name).unwrap_or_default();
        let content_type = file
            .content_type
            .clone()
            .unwrap_or_else(|| mime_for(&extension).to_string());
        let payload = TransferPayload {
            file_name: file.name.clone(),
            bytes: file.bytes.clone(),
            content_type,
            extension,
            platform: platform.clone(),
            upload_type,
            uploaded_at,
            record_id: record_id.clone(),
        };
        let destination = self.destination_for(upload_type);

        tracing::info!(
            file = %file.name,
            platform = %platform,
            upload_type = upload_type.as_str(),
            transport = self.transport.name(),
            "dispatching upload"
        );
        let result = self
            .transport
            .send(destination, &payload, self.dispatch_timeout)
            .await;

        // reconciling
        Ok(self.resolve(result, record_id.as_deref()).await)
    }

    fn destination_for(&self, upload_type: UploadType) -> &Url {
        match upload_type {
            UploadType::Po => &self.destinations.po,
            UploadType::Grn => &self.destinations.grn,
        }
    }

    async fn resolve(
        &self,
        result: Result<DispatchReply, DispatchError>,
        record_id: Option<&str>,
    ) -> SubmitOutcome {
        match result {
            Ok(reply) if reply.status.is_success() => match reply.body {
                Some(body) if body.indicates_failure() => {
                    let message = body
                        .message
                        .unwrap_or_else(|| "Processor reported failure".to_string());
                    self.settle_failed(record_id, &message).await;
                    SubmitOutcome::Failed { message }
                }
                body => {
                    let row_count = body.and_then(|b| b.row_count);
                    self.settle_success(record_id, row_count).await;
                    let mut selection = self.selection.lock().await;
                    selection.file = None;
                    selection.platform = None;
                    SubmitOutcome::Success { row_count }
                }
            },
            Ok(reply) => {
                let message = format!("Processor responded with status {}", reply.status);
                self.settle_failed(record_id, &message).await;
                SubmitOutcome::Failed { message }
            }
            Err(DispatchError::Timeout) => {
                self.settle_failed(record_id, "Timed out waiting for the processor")
                    .await;
                SubmitOutcome::TimedOut
            }
            Err(e) => {
                tracing::error!(error = %e, "dispatch failed");
                let message =
                    "There was an error sending your file. Please try again.".to_string();
                self.settle_failed(record_id, &message).await;
                SubmitOutcome::Failed { message }
            }
        }
    }

    async fn settle_success(&self, record_id: Option<&str>, row_count: Option<u32>) {
        let Some(id) = record_id else { return };
        if let Some(store) = &self.store
            && let Err(e) = store.mark_success(id, row_count).await
        {
            tracing::warn!(record_id = id, error = %e, "failed to mark record success");
        }
        if let Some(cache) = &self.cache {
            cache.apply(id, UploadStatus::Success, row_count, None).await;
        }
    }

    /// Best effort: a failing status update is logged, never escalated.
    async fn settle_failed(&self, record_id: Option<&str>, message: &str) {
        let Some(id) = record_id else { return };
        if let Some(store) = &self.store
            && let Err(e) = store.mark_failed(id, message).await
        {
            tracing::warn!(record_id = id, error = %e, "failed to mark record failed");
        }
        if let Some(cache) = &self.cache {
            cache
                .apply(id, UploadStatus::Failed, None, Some(message.to_string()))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DirectTransport;
    use crate::errors::ValidateError;
    use crate::store::MemoryHistoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server_uri: &str) -> Config {
        serde_yaml::from_str(&format!(
            r#"
destinations:
    po: "{server_uri}/po"
    grn: "{server_uri}/grn"
"#
        ))
        .unwrap()
    }

    struct Fixture {
        submitter: Arc<Submitter>,
        store: Arc<MemoryHistoryStore>,
        cache: Arc<HistoryCache>,
    }

    fn fixture(server_uri: &str, bound: Duration) -> Fixture {
        let store = Arc::new(MemoryHistoryStore::new());
        let cache = Arc::new(HistoryCache::new(store.clone(), 20));
        let submitter = Submitter::new(
            &test_config(server_uri),
            Arc::new(DirectTransport::new()),
            Some(store.clone()),
            Some(cache.clone()),
        )
        .with_dispatch_timeout(bound);
        Fixture {
            submitter: Arc::new(submitter),
            store,
            cache,
        }
    }

    fn po_file() -> FileSelection {
        FileSelection {
            name: "po1.csv".to_string(),
            bytes: Bytes::from(vec![b'x'; 500 * 1024]),
            content_type: None,
        }
    }

    async fn select_po(submitter: &Submitter) {
        submitter.choose_file(po_file()).await.unwrap();
        submitter.choose_platform("zepto").await;
        submitter.choose_upload_type(UploadType::Po).await;
    }

    #[tokio::test]
    async fn test_successful_submission_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/po"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "rowCount": 42 })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), Duration::from_secs(5));
        select_po(&f.submitter).await;
        assert!(f.submitter.can_submit().await);

        let outcome = f.submitter.submit().await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Success { row_count: Some(42) });

        let rows = f.store.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, UploadStatus::Success);
        assert_eq!(rows[0].row_count, Some(42));
        assert_eq!(rows[0].file_name, "po1.csv");
        assert_eq!(rows[0].platform, "zepto");

        // The cache was patched without a refresh
        assert_eq!(f.cache.snapshot().await[0].status, UploadStatus::Success);

        // Selection cleared: a new submission needs fresh input
        assert!(!f.submitter.can_submit().await);
        assert_eq!(
            f.submitter.selection_hint().await,
            Some("Please upload a file and select a platform")
        );
    }

    #[tokio::test]
    async fn test_timeout_marks_record_failed_without_row_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "rowCount": 42 }))
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), Duration::from_millis(50));
        select_po(&f.submitter).await;

        let outcome = f.submitter.submit().await.unwrap();
        assert_eq!(outcome, SubmitOutcome::TimedOut);

        let rows = f.store.recent(10).await.unwrap();
        assert_eq!(rows[0].status, UploadStatus::Failed);
        assert_eq!(rows[0].row_count, None);

        // Failure keeps the selection so the user can retry
        assert!(f.submitter.can_submit().await);
    }

    #[tokio::test]
    async fn test_processor_verdict_overrides_transport_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": false, "message": "bad rows" })),
            )
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), Duration::from_secs(5));
        select_po(&f.submitter).await;

        let outcome = f.submitter.submit().await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Failed {
                message: "bad rows".to_string()
            }
        );
        let rows = f.store.recent(10).await.unwrap();
        assert_eq!(rows[0].status, UploadStatus::Failed);
        assert_eq!(rows[0].error_message.as_deref(), Some("bad rows"));
    }

    #[tokio::test]
    async fn test_non_success_status_fails_submission() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), Duration::from_secs(5));
        select_po(&f.submitter).await;

        match f.submitter.submit().await.unwrap() {
            SubmitOutcome::Failed { message } => assert!(message.contains("500")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_submission_is_busy_while_first_runs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true }))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), Duration::from_secs(5));
        select_po(&f.submitter).await;

        let first = {
            let submitter = f.submitter.clone();
            tokio::spawn(async move { submitter.submit().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            f.submitter.submit().await,
            Err(SubmitError::Busy)
        ));

        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, SubmitOutcome::Success { .. }));

        // The guard is released once the first submission settles
        assert!(!f.submitter.can_submit().await); // selection was cleared
        select_po(&f.submitter).await;
        assert!(f.submitter.can_submit().await);
    }

    #[tokio::test]
    async fn test_degraded_configuration_submits_without_store() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;

        let submitter = Submitter::new(
            &test_config(&server.uri()),
            Arc::new(DirectTransport::new()),
            None,
            None,
        );
        select_po(&submitter).await;

        let outcome = submitter.submit().await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Success { row_count: None });
    }

    #[tokio::test]
    async fn test_choose_file_rejects_invalid_candidates() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri(), Duration::from_secs(5));

        let err = f
            .submitter
            .choose_file(FileSelection {
                name: "orders.exe".to_string(),
                bytes: Bytes::from_static(b"MZ"),
                content_type: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidateError::Extension { .. })
        ));

        // Nothing was selected, so submitting reports the missing file
        assert!(matches!(
            f.submitter.submit().await,
            Err(SubmitError::MissingFile)
        ));
        // And the in-flight guard was released by the early return
        assert!(matches!(
            f.submitter.submit().await,
            Err(SubmitError::MissingFile)
        ));
    }

    #[tokio::test]
    async fn test_grn_uploads_route_to_grn_destination() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/grn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), Duration::from_secs(5));
        f.submitter
            .choose_file(FileSelection {
                name: "grn7.xlsx".to_string(),
                bytes: Bytes::from_static(b"PK"),
                content_type: None,
            })
            .await
            .unwrap();
        f.submitter.choose_platform("blinkit").await;
        f.submitter.choose_upload_type(UploadType::Grn).await;

        let outcome = f.submitter.submit().await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn test_record_creation_failure_does_not_block_submission() {
        // Store pointing at nothing: every call fails
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/po"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&server)
            .await;

        struct FailingStore;

        #[async_trait::async_trait]
        impl crate::store::HistoryStore for FailingStore {
            async fn insert(
                &self,
                _upload: NewUpload,
            ) -> Result<crate::record::UploadRecord, crate::errors::StoreError> {
                Err(crate::errors::StoreError::EmptyReply)
            }
            async fn recent(
                &self,
                _limit: usize,
            ) -> Result<Vec<crate::record::UploadRecord>, crate::errors::StoreError> {
                Ok(vec![])
            }
            async fn mark_success(
                &self,
                _id: &str,
                _row_count: Option<u32>,
            ) -> Result<(), crate::errors::StoreError> {
                Ok(())
            }
            async fn mark_failed(
                &self,
                _id: &str,
                _error_message: &str,
            ) -> Result<(), crate::errors::StoreError> {
                Ok(())
            }
            async fn fail_stale(
                &self,
                _cutoff: chrono::DateTime<Utc>,
            ) -> Result<u64, crate::errors::StoreError> {
                Ok(0)
            }
        }

        let submitter = Submitter::new(
            &test_config(&server.uri()),
            Arc::new(DirectTransport::new()),
            Some(Arc::new(FailingStore)),
            None,
        );
        select_po(&submitter).await;

        let outcome = submitter.submit().await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Success { .. }));
    }
}
