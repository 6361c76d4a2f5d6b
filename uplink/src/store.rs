use crate::config::HistoryConfig;
use crate::errors::StoreError;
use crate::record::{NewUpload, UploadRecord, UploadStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use url::Url;

/// Diagnostic written to records failed by the staleness sweep.
pub const STALE_ERROR_MESSAGE: &str = "Timed out while processing";

/// Adapter over the remote table of upload records.
///
/// The status transitions are conditional on the row still being
/// `processing`: a write that loses the race against another writer becomes a
/// no-op instead of resurrecting a terminal record.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create a row; the store assigns the id.
    async fn insert(&self, upload: NewUpload) -> Result<UploadRecord, StoreError>;

    /// Most recent rows first.
    async fn recent(&self, limit: usize) -> Result<Vec<UploadRecord>, StoreError>;

    async fn mark_success(&self, id: &str, row_count: Option<u32>) -> Result<(), StoreError>;

    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<(), StoreError>;

    /// Fail every `processing` row older than `cutoff`; returns how many rows
    /// were affected. Terminal rows are never touched.
    async fn fail_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// PostgREST-style history table over HTTP.
pub struct HttpHistoryStore {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl HttpHistoryStore {
    pub fn new(config: &HistoryConfig) -> Result<Self, StoreError> {
        let api_key = config.resolved_api_key().ok_or(StoreError::MissingApiKey)?;
        let endpoint = config.url.join(&format!("rest/v1/{}", config.table))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.endpoint.clone())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(StoreError::Status(response.status()))
    }
}

#[async_trait]
impl HistoryStore for HttpHistoryStore {
    async fn insert(&self, upload: NewUpload) -> Result<UploadRecord, StoreError> {
        let response = self
            .request(reqwest::Method::POST)
            .header("Prefer", "return=representation")
            .json(&json!([upload]))
            .send()
            .await?;

        let rows: Vec<UploadRecord> = check_status(response)?.json().await?;
        rows.into_iter().next().ok_or(StoreError::EmptyReply)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<UploadRecord>, StoreError> {
        let response = self
            .request(reqwest::Method::GET)
            .query(&[
                ("select", "*".to_string()),
                ("order", "uploaded_at.desc".to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        Ok(check_status(response)?.json().await?)
    }

    async fn mark_success(&self, id: &str, row_count: Option<u32>) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::PATCH)
            .query(&[
                ("id", format!("eq.{id}")),
                ("status", "eq.processing".to_string()),
            ])
            .json(&json!({
                "status": UploadStatus::Success,
                "row_count": row_count,
            }))
            .send()
            .await?;

        check_status(response)?;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::PATCH)
            .query(&[
                ("id", format!("eq.{id}")),
                ("status", "eq.processing".to_string()),
            ])
            .json(&json!({
                "status": UploadStatus::Failed,
                "error_message": error_message,
            }))
            .send()
            .await?;

        check_status(response)?;
        Ok(())
    }

    async fn fail_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let response = self
            .request(reqwest::Method::PATCH)
            .header("Prefer", "return=representation")
            .query(&[
                ("status", "eq.processing".to_string()),
                ("uploaded_at", format!("lt.{}", cutoff.to_rfc3339())),
            ])
            .json(&json!({
                "status": UploadStatus::Failed,
                "error_message": STALE_ERROR_MESSAGE,
            }))
            .send()
            .await?;

        let rows: Vec<serde_json::Value> = check_status(response)?.json().await?;
        Ok(rows.len() as u64)
    }
}

/// In-process store backing the persistence-free configuration and the tests.
/// Implements the same conditional-update guard as the HTTP adapter.
#[derive(Default)]
pub struct MemoryHistoryStore {
    rows: Mutex<Vec<UploadRecord>>,
    next_id: AtomicU64,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn insert(&self, upload: NewUpload) -> Result<UploadRecord, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let record = UploadRecord {
            id: format!("mem-{id}"),
            file_name: upload.file_name,
            platform: upload.platform,
            upload_type: upload.upload_type,
            status: upload.status,
            uploaded_at: upload.uploaded_at,
            row_count: None,
            error_message: None,
        };
        self.rows.lock().await.push(record.clone());
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<UploadRecord>, StoreError> {
        let mut rows = self.rows.lock().await.clone();
        rows.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_success(&self, id: &str, row_count: Option<u32>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows
            .iter_mut()
            .find(|row| row.id == id && row.status == UploadStatus::Processing)
        {
            row.status = UploadStatus::Success;
            row.row_count = row_count;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error_message: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows
            .iter_mut()
            .find(|row| row.id == id && row.status == UploadStatus::Processing)
        {
            row.status = UploadStatus::Failed;
            row.error_message = Some(error_message.to_string());
        }
        Ok(())
    }

    async fn fail_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let mut affected = 0;
        for row in rows
            .iter_mut()
            .filter(|row| row.status == UploadStatus::Processing && row.uploaded_at < cutoff)
        {
            row.status = UploadStatus::Failed;
            row.error_message = Some(STALE_ERROR_MESSAGE.to_string());
            affected += 1;
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UploadType;
    use chrono::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn new_upload(file_name: &str, uploaded_at: DateTime<Utc>) -> NewUpload {
        NewUpload::new(
            file_name.to_string(),
            "zepto".to_string(),
            UploadType::Po,
            uploaded_at,
        )
    }

    fn history_config(server: &MockServer) -> HistoryConfig {
        serde_yaml::from_str(&format!(
            "url: \"{}\"\napi_key: \"test-key\"\n",
            server.uri()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_terminal_status_is_never_overwritten() {
        let store = MemoryHistoryStore::new();
        let record = store.insert(new_upload("po1.csv", Utc::now())).await.unwrap();

        store.mark_success(&record.id, Some(42)).await.unwrap();
        // A stale handle racing in later must not rewrite the terminal state
        store.mark_failed(&record.id, "timed out").await.unwrap();

        let rows = store.recent(10).await.unwrap();
        assert_eq!(rows[0].status, UploadStatus::Success);
        assert_eq!(rows[0].row_count, Some(42));
        assert_eq!(rows[0].error_message, None);
    }

    #[tokio::test]
    async fn test_memory_fail_stale_respects_cutoff() {
        let store = MemoryHistoryStore::new();
        let now = Utc::now();
        let old = store
            .insert(new_upload("old.csv", now - Duration::minutes(3)))
            .await
            .unwrap();
        let fresh = store
            .insert(new_upload("fresh.csv", now - Duration::minutes(1)))
            .await
            .unwrap();
        let done = store
            .insert(new_upload("done.csv", now - Duration::minutes(5)))
            .await
            .unwrap();
        store.mark_success(&done.id, None).await.unwrap();

        let affected = store.fail_stale(now - Duration::minutes(2)).await.unwrap();
        assert_eq!(affected, 1);

        let rows = store.recent(10).await.unwrap();
        let by_id = |id: &str| rows.iter().find(|r| r.id == id).unwrap();
        assert_eq!(by_id(&old.id).status, UploadStatus::Failed);
        assert_eq!(
            by_id(&old.id).error_message.as_deref(),
            Some(STALE_ERROR_MESSAGE)
        );
        assert_eq!(by_id(&fresh.id).status, UploadStatus::Processing);
        assert_eq!(by_id(&done.id).status, UploadStatus::Success);
    }

    #[tokio::test]
    async fn test_memory_fail_stale_is_idempotent() {
        let store = MemoryHistoryStore::new();
        let now = Utc::now();
        store
            .insert(new_upload("old.csv", now - Duration::minutes(3)))
            .await
            .unwrap();

        assert_eq!(store.fail_stale(now).await.unwrap(), 1);
        assert_eq!(store.fail_stale(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_recent_orders_and_limits() {
        let store = MemoryHistoryStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store
                .insert(new_upload(
                    &format!("f{i}.csv"),
                    now - Duration::minutes(i),
                ))
                .await
                .unwrap();
        }

        let rows = store.recent(3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].file_name, "f0.csv");
        assert_eq!(rows[2].file_name, "f2.csv");
    }

    #[tokio::test]
    async fn test_http_insert_sends_representation_request() {
        let server = MockServer::start().await;
        let uploaded_at: DateTime<Utc> = "2026-08-01T10:00:00Z".parse().unwrap();

        Mock::given(method("POST"))
            .and(path("/rest/v1/uploads"))
            .and(header("apikey", "test-key"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(json!([{
                "file_name": "po1.csv",
                "platform": "zepto",
                "upload_type": "po",
                "status": "processing",
                "uploaded_at": "2026-08-01T10:00:00Z",
            }])))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{
                "id": "b1f4",
                "file_name": "po1.csv",
                "platform": "zepto",
                "upload_type": "po",
                "status": "processing",
                "uploaded_at": "2026-08-01T10:00:00Z",
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpHistoryStore::new(&history_config(&server)).unwrap();
        let record = store
            .insert(new_upload("po1.csv", uploaded_at))
            .await
            .unwrap();
        assert_eq!(record.id, "b1f4");
        assert_eq!(record.status, UploadStatus::Processing);
    }

    #[tokio::test]
    async fn test_http_mark_success_is_conditional_on_processing() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/uploads"))
            .and(query_param("id", "eq.b1f4"))
            .and(query_param("status", "eq.processing"))
            .and(body_json(json!({ "status": "success", "row_count": 42 })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpHistoryStore::new(&history_config(&server)).unwrap();
        store.mark_success("b1f4", Some(42)).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_fail_stale_counts_affected_rows() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/uploads"))
            .and(query_param("status", "eq.processing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "a" }, { "id": "b" }
            ])))
            .mount(&server)
            .await;

        let store = HttpHistoryStore::new(&history_config(&server)).unwrap();
        let affected = store.fail_stale(Utc::now()).await.unwrap();
        assert_eq!(affected, 2);
    }

    #[tokio::test]
    async fn test_http_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/uploads"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = HttpHistoryStore::new(&history_config(&server)).unwrap();
        let err = store.recent(5).await.unwrap_err();
        assert!(matches!(err, StoreError::Status(status) if status.as_u16() == 401));
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let config: HistoryConfig =
            serde_yaml::from_str("url: \"https://abc.supabase.example\"\n").unwrap();
        // No key in config; the env override may be set in the test
        // environment, so only assert when it is absent.
        if std::env::var(crate::config::STORE_API_KEY_ENV).is_err() {
            assert!(matches!(
                HttpHistoryStore::new(&config),
                Err(StoreError::MissingApiKey)
            ));
        }
    }
}
