use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of document being uploaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadType {
    /// Purchase order
    Po,
    /// Goods received note
    Grn,
}

impl UploadType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            UploadType::Po => "po",
            UploadType::Grn => "grn",
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            UploadType::Po => "PO",
            UploadType::Grn => "GRN",
        }
    }
}

/// Lifecycle state of an upload record.
///
/// `Processing` transitions to exactly one terminal state and never reverts.
/// The store adapters enforce this with conditional updates; callers never
/// rewrite a terminal row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Processing,
    Success,
    Failed,
}

impl UploadStatus {
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Processing)
    }
}

/// One submission attempt, as stored in the history table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Opaque identifier assigned by the store on insert
    pub id: String,
    pub file_name: String,
    pub platform: String,
    pub upload_type: UploadType,
    pub status: UploadStatus,
    pub uploaded_at: DateTime<Utc>,
    /// Rows the processor reported, set only on transition to `Success`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u32>,
    /// Diagnostic set only on transition to `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Row shape for creating an upload record; the store assigns the id.
#[derive(Clone, Debug, Serialize)]
pub struct NewUpload {
    pub file_name: String,
    pub platform: String,
    pub upload_type: UploadType,
    pub status: UploadStatus,
    pub uploaded_at: DateTime<Utc>,
}

impl NewUpload {
    pub fn new(
        file_name: String,
        platform: String,
        upload_type: UploadType,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            file_name,
            platform,
            upload_type,
            status: UploadStatus::Processing,
            uploaded_at,
        }
    }
}

/// Structured body the external processor may return.
///
/// Everything is optional; processors that answer with plain text produce no
/// structured reply at all.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProcessorReply {
    pub success: Option<bool>,
    pub error: Option<bool>,
    pub message: Option<String>,
    #[serde(default, alias = "rowCount")]
    pub row_count: Option<u32>,
}

impl ProcessorReply {
    /// The processor's judgment overrides transport success: an explicit
    /// error flag or `success: false` means the submission failed even on a
    /// 2xx response.
    pub fn indicates_failure(&self) -> bool {
        self.error == Some(true) || self.success == Some(false)
    }
}
