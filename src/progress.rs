//! # Progress Tracking and Statistics Module
//!
//! Questo modulo gestisce il progress tracking per record e le statistiche del batch.
//!
//! ## Responsabilità:
//! - Una progress bar `indicatif` per ogni record della coda, aggiornata ad ogni mutazione
//! - Tracking statistiche del batch (riusciti, errori, byte risparmiati)
//! - Report finale con statistiche aggregate
//!
//! ## Componenti principali:
//! - `ProgressObserver`: `QueueObserver` che disegna le barre
//! - `BatchStats`: statistiche cumulative di un `optimize_all`
//!
//! ## Visual feedback:
//! ```text
//! ⠋ holiday.jpg    [██████████████████████░░░░░░░░░░░░░░░░░░]  55% Uploading... 55%
//! ✔ logo.png       [████████████████████████████████████████] 100% 48.20 KB (62.1% saved)
//! ✘ broken.gif     [----------------------------------------]   0% the server could not optimize this image
//! ```

use crate::queue::{FileRecord, QueueObserver, RecordId, RecordStatus, Stage};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const BAR_LEN: u64 = 100;

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:<24} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn done_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:<24} [{bar:40.green}] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

/// Position of the bar for a given status, out of `BAR_LEN`
fn position(status: &RecordStatus) -> u64 {
    match status {
        RecordStatus::Ready => 0,
        RecordStatus::Processing(Stage::RequestingLink) => 5,
        RecordStatus::Processing(Stage::Uploading { sent, total }) => {
            let fraction = if *total == 0 { 1.0 } else { *sent as f64 / *total as f64 };
            10 + (fraction * 70.0) as u64
        }
        RecordStatus::Processing(Stage::Transforming) => 85,
        RecordStatus::Success => BAR_LEN,
        RecordStatus::Error(_) => 0,
    }
}

/// Status line shown next to a record's bar
pub fn status_message(record: &FileRecord) -> String {
    match &record.status {
        RecordStatus::Ready => "Waiting".to_string(),
        RecordStatus::Processing(_) => record.progress.clone().unwrap_or_default(),
        RecordStatus::Success => {
            let done = match &record.current {
                Some(output) => format!(
                    "✔ {} ({:.1}% saved)",
                    crate::file_manager::FileManager::format_size(output.size),
                    output.savings_percent
                ),
                None => "✔".to_string(),
            };
            match &record.progress {
                Some(note) => format!("{} - {}", done, note),
                None => done,
            }
        }
        RecordStatus::Error(message) => format!("✘ {}", message),
    }
}

/// Draws one bar per queued record
pub struct ProgressObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<RecordId, ProgressBar>>,
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Observer that tracks state without drawing
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Current bar position for `id`, if it has a bar
    pub fn position_of(&self, id: &RecordId) -> Option<u64> {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|bar| bar.position())
    }

    pub fn len(&self) -> usize {
        self.bars.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueObserver for ProgressObserver {
    fn on_change(&self, record: &FileRecord) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        let bar = bars.entry(record.id.clone()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(BAR_LEN));
            bar.set_style(bar_style());
            bar.set_prefix(record.file.name.clone());
            bar
        });

        if matches!(record.status, RecordStatus::Processing(_)) {
            bar.enable_steady_tick(Duration::from_millis(100));
        }
        bar.set_position(position(&record.status));
        bar.set_message(status_message(record));

        if record.status.is_terminal() {
            bar.disable_steady_tick();
            bar.set_style(done_style());
            bar.tick();
        }
    }

    fn on_remove(&self, id: &RecordId) {
        let removed = self.bars.lock().unwrap_or_else(PoisonError::into_inner).remove(id);
        if let Some(bar) = removed {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }
}

/// Statistics for one batch run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchStats {
    pub succeeded: usize,
    pub errors: usize,
    pub total_original_size: u64,
    pub total_optimized_size: u64,
    pub total_bytes_saved: u64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_success(&mut self, original_size: u64, new_size: u64) {
        self.succeeded += 1;
        self.total_original_size += original_size;
        self.total_optimized_size += new_size;
        self.total_bytes_saved += original_size.saturating_sub(new_size);
    }

    pub fn add_error(&mut self) {
        self.errors += 1;
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.errors
    }

    pub fn overall_savings_percent(&self) -> f64 {
        if self.total_original_size > 0 {
            (self.total_bytes_saved as f64 / self.total_original_size as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} files | Optimized: {} | Errors: {} | Total saved: {} ({:.2}%)",
            self.processed(),
            self.succeeded,
            self.errors,
            crate::file_manager::FileManager::format_size(self.total_bytes_saved),
            self.overall_savings_percent()
        )
    }
}
