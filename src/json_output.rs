//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON per l'uso programmatico della CLI.
//!
//! ## Responsabilità:
//! - Emette un messaggio JSON per riga su stdout per ogni evento
//! - `JsonObserver` trasforma ogni mutazione della coda in un evento `record_update`
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio del batch
//! - `record_update`: Nuovo stato di un record
//! - `record_removed`: Record rimosso dalla coda
//! - `export`: Archivio scritto su disco
//! - `complete`: Fine del batch con statistiche finali
//! - `error`: Errore generale

use crate::format::OutputFormat;
use crate::progress::BatchStats;
use crate::queue::{FileRecord, QueueObserver, RecordId, RecordStatus, TransformedOutput};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Tipo di messaggio JSON
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage {
    /// Inizio del batch
    Start {
        total_files: usize,
        rejected: Vec<String>,
        output_format: Option<OutputFormat>,
        endpoint: Option<String>,
    },

    /// Nuovo stato di un record
    RecordUpdate {
        id: RecordId,
        name: String,
        status: RecordStatus,
        progress: Option<String>,
        current: Option<TransformedOutput>,
        download_name: Option<String>,
    },

    RecordRemoved { id: RecordId },

    /// Archivio scritto
    Export { path: PathBuf, entries: usize },

    /// Fine del batch
    Complete {
        succeeded: usize,
        errors: usize,
        total_original_size: u64,
        total_bytes_saved: u64,
        average_savings: f64,
        duration_seconds: f64,
    },

    /// Errore generale
    Error {
        message: String,
        details: Option<String>,
    },
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn record_update(record: &FileRecord) -> Self {
        Self::RecordUpdate {
            id: record.id.clone(),
            name: record.file.name.clone(),
            status: record.status.clone(),
            progress: record.progress.clone(),
            current: record.current.clone(),
            download_name: record.download_name.clone(),
        }
    }

    pub fn complete(stats: &BatchStats, duration_seconds: f64) -> Self {
        Self::Complete {
            succeeded: stats.succeeded,
            errors: stats.errors,
            total_original_size: stats.total_original_size,
            total_bytes_saved: stats.total_bytes_saved,
            average_savings: stats.overall_savings_percent(),
            duration_seconds,
        }
    }

    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

/// Writes every queue event as one JSON line
pub struct JsonObserver {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for JsonObserver {
    fn default() -> Self {
        Self::stdout()
    }
}

impl JsonObserver {
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    fn write(&self, message: &JsonMessage) {
        let Ok(json) = serde_json::to_string(message) else {
            return;
        };
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{}", json).and_then(|_| out.flush()) {
            debug!("Could not write JSON event: {}", e);
        }
    }
}

impl QueueObserver for JsonObserver {
    fn on_change(&self, record: &FileRecord) {
        self.write(&JsonMessage::record_update(record));
    }

    fn on_remove(&self, id: &RecordId) {
        self.write(&JsonMessage::RecordRemoved { id: id.clone() });
    }
}
