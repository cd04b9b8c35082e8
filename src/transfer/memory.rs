//! In-memory `TransformApi` with per-stage failure injection.

use super::api::{ProgressCallback, TransformApi, TransformRequest, TransformResponse, UploadSlot};
use crate::error::{OptimizeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Stage at which the fake backend fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailStage {
    Link,
    Upload,
    Transform,
}

/// Echoes uploaded bytes back as the transform output.
/// `reported_size` overrides the size the transform step claims.
#[derive(Default)]
pub struct MemoryApi {
    objects: Mutex<HashMap<String, Bytes>>,
    failures: Mutex<HashMap<String, FailStage>>,
    broken_urls: Mutex<HashSet<String>>,
    reported_size: Mutex<Option<u64>>,
    next_key: AtomicUsize,
    uploads: AtomicUsize,
    transforms: AtomicUsize,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every file whose sanitized name equals `filename` at `stage`
    pub fn fail(&self, filename: &str, stage: FailStage) {
        lock(&self.failures).insert(filename.to_string(), stage);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Make `fetch` fail for download urls containing `fragment`
    pub fn break_downloads(&self, fragment: &str) {
        lock(&self.broken_urls).insert(fragment.to_string());
    }

    pub fn report_size(&self, size: u64) {
        *lock(&self.reported_size) = Some(size);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn transform_count(&self) -> usize {
        self.transforms.load(Ordering::SeqCst)
    }

    fn failure_for_key(&self, key: &str, stage: FailStage) -> bool {
        let filename = key.rsplit('/').next().unwrap_or(key);
        lock(&self.failures).get(filename) == Some(&stage)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl TransformApi for MemoryApi {
    async fn request_upload_slot(&self, filename: &str, _mime: &str) -> Result<UploadSlot> {
        if lock(&self.failures).get(filename) == Some(&FailStage::Link) {
            return Err(OptimizeError::Link("slot refused".to_string()));
        }
        let n = self.next_key.fetch_add(1, Ordering::SeqCst);
        let key = format!("uploads/{}/{}", n, filename);
        Ok(UploadSlot {
            upload_url: format!("memory://put/{}", key),
            key,
        })
    }

    async fn upload(
        &self,
        slot: &UploadSlot,
        bytes: Bytes,
        _mime: &str,
        progress: ProgressCallback,
    ) -> Result<()> {
        if self.failure_for_key(&slot.key, FailStage::Upload) {
            return Err(OptimizeError::Upload("storage responded with status 403".to_string()));
        }
        let total = bytes.len() as u64;
        progress(total / 2, total);
        progress(total, total);
        lock(&self.objects).insert(slot.key.clone(), bytes);
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn request_transform(&self, request: &TransformRequest) -> Result<TransformResponse> {
        if self.failure_for_key(&request.key, FailStage::Transform) {
            return Err(OptimizeError::Transform("unsupported image".to_string()));
        }
        let bytes = lock(&self.objects)
            .get(&request.key)
            .cloned()
            .ok_or_else(|| OptimizeError::Transform(format!("no object for {}", request.key)))?;

        let n = self.transforms.fetch_add(1, Ordering::SeqCst);
        let filename = request.key.rsplit('/').next().unwrap_or("image");
        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let new_filename = format!("{}.{}", stem, request.output_format.extension());
        let download_url = format!("memory://out/{}/{}", n, new_filename);

        let optimized_size = lock(&self.reported_size).unwrap_or(bytes.len() as u64);
        lock(&self.objects).insert(download_url.clone(), bytes);

        Ok(TransformResponse {
            download_url,
            optimized_size,
            new_filename,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if lock(&self.broken_urls).iter().any(|f| url.contains(f.as_str())) {
            return Err(OptimizeError::NotFound(url.to_string()));
        }
        lock(&self.objects)
            .get(url)
            .cloned()
            .ok_or_else(|| OptimizeError::NotFound(url.to_string()))
    }
}
