//! # Batch Queue Model
//!
//! Questo modulo gestisce la coda ordinata dei file selezionati e lo stato di ciascuno.
//!
//! ## Responsabilità:
//! - `FileRecord`: stato di un singolo file (ready/processing/success/error) e dei suoi output
//! - `Queue`: sequenza ordinata di record, sostituita interamente da `seed` e `reset`
//! - Rilascio degli object URL alla rimozione del record o al reset
//! - Notifica sincrona dell'observer dopo ogni mutazione (nessun batching)
//!
//! ## Ciclo di vita di un record:
//! ```text
//! Ready -> Processing(RequestingLink) -> Processing(Uploading) -> Processing(Transforming)
//!       -> Success | Error(message)
//! ```
//!
//! ## Esempio:
//! ```rust,ignore
//! let mut queue = Queue::new(10 * 1024 * 1024, Arc::new(NoopObserver));
//! let report = queue.seed(files);
//! queue.update(&report.accepted[0], |record| record.status = RecordStatus::Success);
//! ```

use crate::blob::BlobRegistry;
use crate::crop::CropSpec;
use crate::format::OutputFormat;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

/// Raw file handed to the queue
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub mime: String,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Session-scoped record id: timestamp plus a random suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RecordId(String);

impl RecordId {
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{:x}-{}", millis, &random[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Stage of a running transform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    RequestingLink,
    Uploading { sent: u64, total: u64 },
    Transforming,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RecordStatus {
    Ready,
    Processing(Stage),
    Success,
    Error(String),
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Success | RecordStatus::Error(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecordStatus::Ready => "ready",
            RecordStatus::Processing(_) => "processing",
            RecordStatus::Success => "success",
            RecordStatus::Error(_) => "error",
        }
    }
}

/// One successful transform result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformedOutput {
    pub url: String,
    pub size: u64,
    pub savings_percent: f64,
    pub file_name: String,
}

/// One queued file and its processing state
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: RecordId,
    pub file: SourceFile,
    pub status: RecordStatus,
    pub original_url: String,
    /// First successful transform, restored by revert
    pub initial: Option<TransformedOutput>,
    /// Most recent successful transform
    pub current: Option<TransformedOutput>,
    pub download_name: Option<String>,
    pub progress: Option<String>,
    pub crop: Option<CropSpec>,
    pub format: Option<OutputFormat>,
}

impl FileRecord {
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            RecordStatus::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current.as_ref().map(|o| o.url.as_str())
    }
}

/// Receives every queue mutation as it happens
pub trait QueueObserver: Send + Sync {
    fn on_change(&self, record: &FileRecord);

    fn on_remove(&self, _id: &RecordId) {}
}

/// Observer that ignores all events
pub struct NoopObserver;

impl QueueObserver for NoopObserver {
    fn on_change(&self, _record: &FileRecord) {}
}

/// File rejected at seed time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFile {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct SeedReport {
    pub accepted: Vec<RecordId>,
    pub rejected: Vec<RejectedFile>,
}

/// Ordered collection of records
pub struct Queue {
    records: Vec<FileRecord>,
    blobs: BlobRegistry,
    max_file_size: u64,
    observer: Arc<dyn QueueObserver>,
}

impl Queue {
    pub fn new(max_file_size: u64, observer: Arc<dyn QueueObserver>) -> Self {
        Self {
            records: Vec::new(),
            blobs: BlobRegistry::new(),
            max_file_size,
            observer,
        }
    }

    /// Replace the queue with one record per accepted file
    pub fn seed(&mut self, files: Vec<SourceFile>) -> SeedReport {
        self.reset();

        let mut report = SeedReport::default();
        for file in files {
            if file.size() > self.max_file_size {
                warn!(
                    "Skipping {}: {} bytes exceeds the {} byte limit",
                    file.name,
                    file.size(),
                    self.max_file_size
                );
                report.rejected.push(RejectedFile {
                    name: file.name,
                    size: file.bytes.len() as u64,
                });
                continue;
            }

            let mut id = RecordId::generate();
            while self.contains(&id) {
                id = RecordId::generate();
            }

            let original_url = self.blobs.create(file.bytes.clone());
            let record = FileRecord {
                id: id.clone(),
                file,
                status: RecordStatus::Ready,
                original_url,
                initial: None,
                current: None,
                download_name: None,
                progress: None,
                crop: None,
                format: None,
            };
            debug!("Queued {} as {}", record.file.name, id);
            self.observer.on_change(&record);
            self.records.push(record);
            report.accepted.push(id);
        }
        report
    }

    /// Remove one record and release its object URL
    pub fn remove(&mut self, id: &RecordId) -> bool {
        let Some(pos) = self.records.iter().position(|r| &r.id == id) else {
            return false;
        };
        let record = self.records.remove(pos);
        self.blobs.revoke(&record.original_url);
        self.observer.on_remove(id);
        true
    }

    /// Clear the queue and release every object URL
    pub fn reset(&mut self) {
        for record in self.records.drain(..) {
            self.blobs.revoke(&record.original_url);
            self.observer.on_remove(&record.id);
        }
    }

    /// Mutate a record and notify the observer
    pub fn update<F>(&mut self, id: &RecordId, f: F) -> bool
    where
        F: FnOnce(&mut FileRecord),
    {
        match self.records.iter_mut().find(|r| &r.id == id) {
            Some(record) => {
                f(record);
                self.observer.on_change(record);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &RecordId) -> Option<&FileRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when every record is in a terminal state
    pub fn is_settled(&self) -> bool {
        self.records.iter().all(|r| r.status.is_terminal())
    }

    pub fn successful(&self) -> impl Iterator<Item = &FileRecord> {
        self.records
            .iter()
            .filter(|r| r.status == RecordStatus::Success && r.current.is_some())
    }

    pub fn ids_with_status(&self, status: &RecordStatus) -> Vec<RecordId> {
        self.records
            .iter()
            .filter(|r| &r.status == status)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }
}

/// Cloneable handle to a queue. The lock is never held across an `.await`.
#[derive(Clone)]
pub struct SharedQueue {
    inner: Arc<Mutex<Queue>>,
}

impl SharedQueue {
    pub fn new(queue: Queue) -> Self {
        Self {
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Queue) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn update<F>(&self, id: &RecordId, f: F) -> bool
    where
        F: FnOnce(&mut FileRecord),
    {
        self.with(|q| q.update(id, f))
    }

    pub fn snapshot(&self, id: &RecordId) -> Option<FileRecord> {
        self.with(|q| q.get(id).cloned())
    }
}
