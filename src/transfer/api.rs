use crate::error::Result;
use crate::format::OutputFormat;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Called with `(bytes_sent, total_bytes)` while an upload is in flight
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Body of `POST /upload-url`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    pub filename: String,
    pub file_type: String,
}

/// Write-once upload slot issued by the presign endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSlot {
    pub upload_url: String,
    pub key: String,
}

/// Body of `POST /optimize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub key: String,
    pub output_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformResponse {
    pub download_url: String,
    pub optimized_size: u64,
    pub new_filename: String,
}

/// Error payload the backend returns on failure
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        let non_empty = |m: &String| !m.trim().is_empty();
        self.error.filter(non_empty).or(self.message.filter(non_empty))
    }
}

/// Backend operations used by the transform pipeline
#[async_trait]
pub trait TransformApi: Send + Sync {
    /// Ask for a slot authorizing one direct upload
    async fn request_upload_slot(&self, filename: &str, mime: &str) -> Result<UploadSlot>;

    /// Upload the raw bytes into a slot
    async fn upload(
        &self,
        slot: &UploadSlot,
        bytes: Bytes,
        mime: &str,
        progress: ProgressCallback,
    ) -> Result<()>;

    /// Run the resize+re-encode step on an uploaded object
    async fn request_transform(&self, request: &TransformRequest) -> Result<TransformResponse>;

    /// Download a transformed output
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}
